//! Error types for instrument communication.
//!
//! `InstrumentError` categorises the failures a caller may want to react to
//! (a timeout versus an unparseable reply versus a missing driver feature).
//! Trait seams across the workspace return `anyhow::Result`; these values are
//! wrapped into `anyhow::Error` with `?` and can be recovered with
//! `err.downcast_ref::<InstrumentError>()`.

use thiserror::Error;

/// Categorised instrument failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstrumentError {
    /// Writing to or reading from the transport failed.
    #[error("Communication with '{resource}' failed: {message}")]
    Communication {
        /// Resource or instrument name
        resource: String,
        /// Underlying failure description
        message: String,
    },

    /// No reply arrived within the configured timeout.
    #[error("Timed out after {timeout_ms} ms waiting for reply to '{command}'")]
    Timeout {
        /// Command that was waiting for a reply (empty for bare reads)
        command: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// The peer closed the connection.
    #[error("Connection to '{0}' closed by instrument")]
    ConnectionClosed(String),

    /// A reply could not be decoded into the requested format.
    #[error("Could not parse reply '{reply}' as {expected}")]
    Parse {
        /// Raw reply text
        reply: String,
        /// Expected reply format
        expected: String,
    },

    /// A VISA resource string is malformed or unsupported.
    #[error("Invalid resource '{resource}': {reason}")]
    InvalidResource {
        /// Resource string as given
        resource: String,
        /// What is wrong with it
        reason: String,
    },

    /// The resource needs a transport that was not compiled in.
    #[error("Resource '{resource}' requires the '{feature}' feature. Rebuild with --features {feature}")]
    FeatureNotEnabled {
        /// Cargo feature name
        feature: &'static str,
        /// Resource string that needed it
        resource: String,
    },

    /// A named command is not defined for this instrument.
    #[error("Instrument '{instrument}' has no command '{command}'")]
    UnknownCommand {
        /// Instrument name
        instrument: String,
        /// Requested command
        command: String,
    },

    /// A command template references a parameter nobody supplied.
    #[error("Command '{command}' needs parameter '{parameter}'")]
    MissingParameter {
        /// Command being rendered
        command: String,
        /// Placeholder without a value
        parameter: String,
    },

    /// A value lies outside the domain it is defined on.
    #[error("{value} is outside the supported range [{min}, {max}]")]
    OutOfRange {
        /// Offending value
        value: f64,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },

    /// Semantically invalid configuration (profiles, tables, grids).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl InstrumentError {
    /// Shorthand for a communication failure.
    pub fn communication(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Communication {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a reply parse failure.
    pub fn parse(reply: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::Parse {
            reply: reply.into(),
            expected: expected.into(),
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Communication { .. })
    }
}
