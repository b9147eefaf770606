//! Instrument transports.
//!
//! A [`Transport`] moves terminated ASCII messages to and from one
//! instrument. [`StreamTransport`] covers anything that is a byte stream
//! (raw TCP sockets, serial ports, `tokio::io::duplex` in tests); VISA-only
//! interfaces live behind the `visa` feature.
//!
//! [`connect`] resolves a [`ResourceAddress`] to the right transport.

use crate::error::InstrumentError;
use crate::resource::ResourceAddress;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default I/O timeout (60 s, long enough for slow sweeps on analyzers).
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// How long to wait for a TCP connection before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Window used to discard stale bytes before a query.
const STALE_DRAIN_MS: u64 = 10;

/// Message-level access to one instrument.
///
/// Implementations serialise access internally, so a transport can be shared
/// behind `&self`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one command. The transport appends its write terminator.
    async fn write(&self, command: &str) -> Result<()>;

    /// Read one reply, without its terminator and surrounding whitespace.
    async fn read(&self) -> Result<String>;

    /// Write a command and read its reply.
    async fn query(&self, command: &str) -> Result<String> {
        self.write(command).await?;
        self.read().await
    }

    /// Discard any pending input.
    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    /// Human-readable description (usually the resource string).
    fn describe(&self) -> String;
}

/// Connection settings shared by all transports.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    /// Read timeout
    pub timeout: Duration,
    /// Appended to every written command
    pub write_terminator: String,
    /// Byte that ends a reply
    pub read_terminator: u8,
    /// Serial baud rate (ignored by other interfaces)
    pub baud_rate: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            write_terminator: "\n".to_string(),
            read_terminator: b'\n',
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl ConnectOptions {
    /// Options with a different timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Transport over any async byte stream.
pub struct StreamTransport<S> {
    stream: Mutex<BufReader<S>>,
    name: String,
    options: ConnectOptions,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream.
    pub fn new(stream: S, name: impl Into<String>, options: ConnectOptions) -> Self {
        Self {
            stream: Mutex::new(BufReader::new(stream)),
            name: name.into(),
            options,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    async fn write_locked(&self, stream: &mut BufReader<S>, command: &str) -> Result<()> {
        let message = format!("{}{}", command, self.options.write_terminator);
        tracing::debug!(resource = %self.name, "write: {:?}", command);

        let inner = stream.get_mut();
        inner
            .write_all(message.as_bytes())
            .await
            .map_err(|e| InstrumentError::communication(&self.name, e.to_string()))?;
        inner
            .flush()
            .await
            .map_err(|e| InstrumentError::communication(&self.name, e.to_string()))?;
        Ok(())
    }

    async fn read_locked(&self, stream: &mut BufReader<S>, command: &str) -> Result<String> {
        let mut buf = Vec::new();
        let result = timeout(
            self.options.timeout,
            stream.read_until(self.options.read_terminator, &mut buf),
        )
        .await;

        match result {
            Ok(Ok(0)) => Err(InstrumentError::ConnectionClosed(self.name.clone()).into()),
            Ok(Ok(_)) => {
                let reply = String::from_utf8_lossy(&buf).trim().to_string();
                tracing::debug!(resource = %self.name, "reply: {:?}", reply);
                Ok(reply)
            }
            Ok(Err(e)) => Err(InstrumentError::communication(&self.name, e.to_string()).into()),
            Err(_) => Err(InstrumentError::Timeout {
                command: command.to_string(),
                timeout_ms: self.options.timeout_ms(),
            }
            .into()),
        }
    }

    /// Throw away buffered and immediately available input.
    async fn drain_locked(&self, stream: &mut BufReader<S>) -> usize {
        let buffered = stream.buffer().len();
        stream.consume(buffered);
        let drained = buffered + drain_stale(stream.get_mut(), STALE_DRAIN_MS).await;
        if drained > 0 {
            tracing::debug!(resource = %self.name, "discarded {} stale bytes", drained);
        }
        drained
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&self, command: &str) -> Result<()> {
        let mut stream = self.stream.lock().await;
        self.write_locked(&mut stream, command).await
    }

    async fn read(&self) -> Result<String> {
        let mut stream = self.stream.lock().await;
        self.read_locked(&mut stream, "").await
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut stream = self.stream.lock().await;
        self.drain_locked(&mut stream).await;
        self.write_locked(&mut stream, command).await?;
        self.read_locked(&mut stream, command).await
    }

    async fn clear(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        self.drain_locked(&mut stream).await;
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Read and discard bytes until nothing arrives for `window_ms`.
///
/// Returns the number of bytes discarded.
pub async fn drain_stale<R: AsyncRead + Unpin>(reader: &mut R, window_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let mut total = 0usize;

    loop {
        match timeout(Duration::from_millis(window_ms), reader.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total += n,
            Ok(Err(_)) | Err(_) => break,
        }
    }

    total
}

/// Open a transport for a VISA resource.
pub async fn connect(
    address: &ResourceAddress,
    options: &ConnectOptions,
) -> Result<Box<dyn Transport>> {
    let name = address.to_string();
    match address {
        ResourceAddress::TcpSocket { host, port, .. } => {
            let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), *port)))
                .await
                .map_err(|_| {
                    InstrumentError::communication(&name, "timed out opening TCP connection")
                })?
                .map_err(|e| InstrumentError::communication(&name, e.to_string()))?;
            stream
                .set_nodelay(true)
                .map_err(|e| InstrumentError::communication(&name, e.to_string()))?;
            tracing::info!("Connected to {}", name);
            Ok(Box::new(StreamTransport::new(stream, name, options.clone())))
        }
        ResourceAddress::Serial { port } => open_serial(&name, &port.os_name(), options).await,
        _ => open_visa(address, options).await,
    }
}

#[cfg(feature = "serial")]
async fn open_serial(
    name: &str,
    path: &str,
    options: &ConnectOptions,
) -> Result<Box<dyn Transport>> {
    let port = crate::serial::open_serial_async(path, options.baud_rate, name).await?;
    tracing::info!("Opened {} on {} at {} baud", name, path, options.baud_rate);
    Ok(Box::new(StreamTransport::new(port, name, options.clone())))
}

#[cfg(not(feature = "serial"))]
async fn open_serial(
    name: &str,
    _path: &str,
    _options: &ConnectOptions,
) -> Result<Box<dyn Transport>> {
    Err(InstrumentError::FeatureNotEnabled {
        feature: "serial",
        resource: name.to_string(),
    }
    .into())
}

#[cfg(feature = "visa")]
async fn open_visa(
    address: &ResourceAddress,
    options: &ConnectOptions,
) -> Result<Box<dyn Transport>> {
    let transport = crate::visa::VisaTransport::open(address, options).await?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "visa"))]
async fn open_visa(
    address: &ResourceAddress,
    _options: &ConnectOptions,
) -> Result<Box<dyn Transport>> {
    Err(InstrumentError::FeatureNotEnabled {
        feature: "visa",
        resource: address.to_string(),
    }
    .into())
}

/// Enumerate instruments known to the VISA resource manager.
#[cfg(feature = "visa")]
pub async fn list_resources() -> Result<Vec<String>> {
    crate::visa::list_resources().await
}

/// Enumerate instruments known to the VISA resource manager.
#[cfg(not(feature = "visa"))]
pub async fn list_resources() -> Result<Vec<String>> {
    Err(InstrumentError::FeatureNotEnabled {
        feature: "visa",
        resource: "?*INSTR".to_string(),
    }
    .into())
}
