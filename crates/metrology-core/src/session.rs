//! Common instrument handle.
//!
//! [`Instrument`] is the base every device gets: command, query, read and
//! the IEEE 488.2 common commands. Device-specific behaviour is layered on
//! top by profiles (see `metrology-driver-generic`).

use crate::reply::{parse_f64, parse_reading, Reading, ReplyFormat};
use crate::resource::ResourceAddress;
use crate::transport::{connect, ConnectOptions, Transport};
use anyhow::{Context, Result};
use std::time::Duration;

/// An open connection to one instrument.
pub struct Instrument {
    name: String,
    transport: Box<dyn Transport>,
}

impl Instrument {
    /// Parse `resource`, connect and wrap the transport.
    pub async fn open(resource: &str, options: &ConnectOptions) -> Result<Self> {
        let address = ResourceAddress::parse(resource)?;
        let transport = connect(&address, options)
            .await
            .with_context(|| format!("Failed to open {}", resource))?;
        Ok(Self::new(resource, transport))
    }

    /// Wrap an existing transport.
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    /// Instrument name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying transport.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Write a command that produces no reply.
    pub async fn command(&self, command: &str) -> Result<()> {
        tracing::debug!(instrument = %self.name, "command: {}", command);
        self.transport
            .write(command)
            .await
            .with_context(|| format!("{}: '{}' failed", self.name, command))
    }

    /// Write a query and return the trimmed reply.
    pub async fn query(&self, command: &str) -> Result<String> {
        tracing::debug!(instrument = %self.name, "query: {}", command);
        let reply = self
            .transport
            .query(command)
            .await
            .with_context(|| format!("{}: '{}' failed", self.name, command))?;
        tracing::debug!(instrument = %self.name, "reply: {}", reply);
        Ok(reply)
    }

    /// Read a reply that is already pending.
    pub async fn read(&self) -> Result<String> {
        self.transport
            .read()
            .await
            .with_context(|| format!("{}: read failed", self.name))
    }

    /// Query and parse the whole reply as a float.
    pub async fn query_f64(&self, command: &str) -> Result<f64> {
        let reply = self.query(command).await?;
        Ok(parse_f64(&reply, ReplyFormat::Float)?)
    }

    /// Query and decode the reply with `format`.
    pub async fn query_reading(&self, command: &str, format: ReplyFormat) -> Result<Reading> {
        let reply = self.query(command).await?;
        Ok(parse_reading(&reply, format)?)
    }

    /// `*IDN?`
    pub async fn identify(&self) -> Result<String> {
        self.query("*IDN?").await
    }

    /// `*RST`
    pub async fn reset(&self) -> Result<()> {
        self.command("*RST").await
    }

    /// `*CLS`
    pub async fn clear_status(&self) -> Result<()> {
        self.command("*CLS").await
    }

    /// Discard pending input on the transport.
    pub async fn clear(&self) -> Result<()> {
        self.transport.clear().await
    }

    /// Wait for the instrument to settle after a configuration change.
    pub async fn settle(&self, duration: Duration) {
        if !duration.is_zero() {
            tracing::trace!(instrument = %self.name, "settling for {:?}", duration);
            tokio::time::sleep(duration).await;
        }
    }
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("transport", &self.transport.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstrumentError;
    use crate::sim::SimulatedTransport;

    fn dmm() -> (Instrument, SimulatedTransport) {
        let sim = SimulatedTransport::new("dmm");
        sim.respond_to("*IDN?", "KEITHLEY INSTRUMENTS INC.,MODEL 2015,1234,A01");
        sim.respond_to("FETC?", "+1.234567E-03VDC,+0.000SECS");
        sim.respond_to("MEAS:VOLT?", "0.5");
        (Instrument::new("dmm", Box::new(sim.clone())), sim)
    }

    #[tokio::test]
    async fn common_commands_hit_the_wire() {
        let (dmm, sim) = dmm();
        dmm.reset().await.unwrap();
        dmm.clear_status().await.unwrap();
        assert!(dmm.identify().await.unwrap().contains("2015"));
        assert_eq!(sim.written(), vec!["*RST", "*CLS", "*IDN?"]);
    }

    #[tokio::test]
    async fn query_f64_and_reading() {
        let (dmm, _sim) = dmm();
        assert_eq!(dmm.query_f64("MEAS:VOLT?").await.unwrap(), 0.5);
        let reading = dmm
            .query_reading("FETC?", ReplyFormat::Scientific)
            .await
            .unwrap();
        assert_eq!(reading, Reading::Float(1.234567e-3));
    }

    #[tokio::test]
    async fn parse_failure_downcasts() {
        let (dmm, _sim) = dmm();
        let err = dmm.query_f64("FETC?").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstrumentError>(),
            Some(InstrumentError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn open_rejects_bad_resource() {
        let err = Instrument::open("NOPE", &ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstrumentError>(),
            Some(InstrumentError::InvalidResource { .. })
        ));
    }
}
