//! Simulated instrument transport.
//!
//! [`SimulatedTransport`] stands in for hardware in tests and `--simulate`
//! runs. It records every command written to it and answers queries
//! (commands containing `?`) from, in order:
//!
//! 1. an exact-match table,
//! 2. a prefix table (longest prefix wins),
//! 3. a FIFO queue of one-shot replies,
//! 4. an optional default reply.
//!
//! A query nobody answers behaves like a silent instrument: the following
//! read fails with [`InstrumentError::Timeout`].
//!
//! Older instruments answer plain commands (`RR`, a bare read after `M1`).
//! A read with nothing pending resolves the last unanswered command the same
//! way, once.
//!
//! Clones share state, so a test can keep one handle for assertions while the
//! instrument owns another.

use crate::error::InstrumentError;
use crate::transport::Transport;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Default)]
struct SimState {
    written: Vec<String>,
    exact: HashMap<String, String>,
    prefixes: Vec<(String, String)>,
    queue: VecDeque<String>,
    default_reply: Option<String>,
    failing: Vec<String>,
    pending: VecDeque<String>,
    last_query: String,
    unanswered: Option<String>,
}

impl SimState {
    fn resolve(&mut self, command: &str) -> Option<String> {
        if let Some(reply) = self.exact.get(command) {
            return Some(reply.clone());
        }
        let prefixed = self
            .prefixes
            .iter()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, reply)| reply.clone());
        if prefixed.is_some() {
            return prefixed;
        }
        self.queue
            .pop_front()
            .or_else(|| self.default_reply.clone())
    }
}

/// In-memory instrument double.
#[derive(Clone)]
pub struct SimulatedTransport {
    name: String,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTransport {
    /// A simulated instrument with no replies configured.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Always answer `command` with `reply`.
    pub fn respond_to(&self, command: &str, reply: &str) -> &Self {
        self.state
            .lock()
            .exact
            .insert(command.trim().to_string(), reply.to_string());
        self
    }

    /// Answer every query starting with `prefix` with `reply`.
    pub fn respond_prefix(&self, prefix: &str, reply: &str) -> &Self {
        self.state
            .lock()
            .prefixes
            .push((prefix.to_string(), reply.to_string()));
        self
    }

    /// Queue a one-shot reply for the next unmatched query.
    pub fn push_reply(&self, reply: &str) -> &Self {
        self.state.lock().queue.push_back(reply.to_string());
        self
    }

    /// Reply used when nothing else matches.
    pub fn set_default_reply(&self, reply: Option<&str>) -> &Self {
        self.state.lock().default_reply = reply.map(str::to_string);
        self
    }

    /// Make writes starting with `prefix` fail with a communication error.
    pub fn fail_on(&self, prefix: &str) -> &Self {
        self.state.lock().failing.push(prefix.to_string());
        self
    }

    /// Every command written so far, in order.
    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    /// Forget the recorded commands.
    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn write(&self, command: &str) -> Result<()> {
        let command = command.trim();
        let mut state = self.state.lock();

        if state
            .failing
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            return Err(InstrumentError::communication(
                &self.name,
                format!("simulated failure writing '{}'", command),
            )
            .into());
        }

        tracing::debug!(resource = %self.name, "sim write: {:?}", command);
        state.written.push(command.to_string());

        if command.contains('?') {
            state.last_query = command.to_string();
            state.unanswered = None;
            if let Some(reply) = state.resolve(command) {
                state.pending.push_back(reply);
            }
        } else {
            state.unanswered = Some(command.to_string());
        }
        Ok(())
    }

    async fn read(&self) -> Result<String> {
        let mut state = self.state.lock();
        let reply = match state.pending.pop_front() {
            Some(reply) => Some(reply),
            None => state
                .unanswered
                .take()
                .and_then(|command| state.resolve(&command)),
        };
        match reply {
            Some(reply) => Ok(reply.trim().to_string()),
            None => Err(InstrumentError::Timeout {
                command: state.last_query.clone(),
                timeout_ms: 0,
            }
            .into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.pending.clear();
        state.unanswered = None;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("SIM::{}", self.name)
    }
}
