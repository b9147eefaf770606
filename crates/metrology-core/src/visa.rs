//! VISA library transport for GPIB, USB-TMC and VXI-11 resources.
//!
//! Requires the `visa` feature and a system VISA installation (NI-VISA,
//! Keysight IO Libraries or R&S VISA). The VISA calls block, so every call
//! runs on the blocking pool and is bounded by the configured timeout.

use crate::error::InstrumentError;
use crate::resource::ResourceAddress;
use crate::transport::{ConnectOptions, Transport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use visa_rs::prelude::*;

struct Session {
    // Sessions close when the resource manager is dropped.
    _rm: DefaultRM,
    instr: visa_rs::Instrument,
}

/// Transport backed by a VISA session.
pub struct VisaTransport {
    session: Arc<Mutex<Session>>,
    name: String,
    options: ConnectOptions,
}

impl VisaTransport {
    /// Open a session to `address`.
    pub async fn open(address: &ResourceAddress, options: &ConnectOptions) -> Result<Self> {
        let name = address.to_string();
        let open_timeout = options.timeout;
        let resource = name.clone();

        let session = spawn_blocking(move || -> Result<Session> {
            let rm = DefaultRM::new().map_err(|e| {
                InstrumentError::communication(&resource, format!("VISA resource manager: {}", e))
            })?;
            let id = CString::new(resource.as_str())
                .with_context(|| format!("Resource '{}' contains a NUL byte", resource))?;
            let instr = rm
                .open(&id.into(), AccessMode::NO_LOCK, open_timeout)
                .map_err(|e| InstrumentError::communication(&resource, e.to_string()))?;
            Ok(Session { _rm: rm, instr })
        })
        .await
        .context("spawn_blocking for VISA open failed")??;

        tracing::info!("Opened VISA session to {}", name);
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            name,
            options: options.clone(),
        })
    }

    /// Run a blocking VISA operation with the transport timeout.
    async fn blocking<T, F>(&self, command: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> std::io::Result<T> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let task = spawn_blocking(move || {
            let guard = session.lock();
            op(&guard)
        });

        match timeout(self.options.timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(InstrumentError::communication(&self.name, e.to_string()).into()),
            Ok(Err(join)) => Err(anyhow::Error::new(join).context("VISA task failed")),
            Err(_) => Err(InstrumentError::Timeout {
                command: command.to_string(),
                timeout_ms: u64::try_from(self.options.timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
        }
    }
}

#[async_trait]
impl Transport for VisaTransport {
    async fn write(&self, command: &str) -> Result<()> {
        tracing::debug!(resource = %self.name, "write: {:?}", command);
        let message = format!("{}{}", command, self.options.write_terminator).into_bytes();
        self.blocking(command, move |s| (&s.instr).write_all(&message))
            .await
    }

    async fn read(&self) -> Result<String> {
        let terminator = self.options.read_terminator;
        let bytes = self
            .blocking("", move |s| {
                let mut reader = BufReader::new(&s.instr);
                let mut buf = Vec::new();
                reader.read_until(terminator, &mut buf)?;
                Ok(buf)
            })
            .await?;
        let reply = String::from_utf8_lossy(&bytes).trim().to_string();
        tracing::debug!(resource = %self.name, "reply: {:?}", reply);
        Ok(reply)
    }

    async fn clear(&self) -> Result<()> {
        self.blocking("clear", |s| {
            s.instr
                .clear()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })
        .await
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Enumerate all `INSTR` resources the VISA library can see.
pub async fn list_resources() -> Result<Vec<String>> {
    spawn_blocking(|| -> Result<Vec<String>> {
        let rm = DefaultRM::new()
            .map_err(|e| InstrumentError::communication("VISA", e.to_string()))?;
        let expr = CString::new("?*INSTR").context("Invalid search expression")?;
        let mut list = rm
            .find_res_list(&expr.into())
            .map_err(|e| InstrumentError::communication("VISA", e.to_string()))?;

        let mut found = Vec::new();
        while let Some(resource) = list
            .find_next()
            .map_err(|e| InstrumentError::communication("VISA", e.to_string()))?
        {
            found.push(resource.to_string());
        }
        tracing::info!("VISA reports {} resources", found.len());
        Ok(found)
    })
    .await
    .context("spawn_blocking for VISA enumeration failed")?
}
