//! Device profile schema.
//!
//! A profile describes one instrument model's command dialect as data:
//!
//! ```toml
//! init = [{ write = "FU 1", unless_query = "FU?", equals = "FU1" }]
//!
//! [device]
//! name = "HP 3325B"
//! manufacturer = "Hewlett-Packard"
//! model = "3325B"
//! category = "signal_generator"
//!
//! [connection]
//! timeout_ms = 60000
//!
//! [parameters]
//! unit = "VR"
//!
//! [commands.set_output]
//! steps = ["FR ${frequency}HZ", "AM ${level:.4}${unit}"]
//! settle_ms = 500
//!
//! [commands.silence]
//! steps = ["AM 0VR"]
//!
//! [capabilities]
//! set_output = "set_output"
//! silence = "silence"
//! ```

use metrology_core::transport::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};
use metrology_core::{ConnectOptions, InstrumentCategory, InstrumentError, ReplyFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Parameter values by name.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Complete device profile.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceProfile {
    /// Identity and classification
    pub device: DeviceIdentity,

    /// Transport settings
    #[serde(default)]
    pub connection: ConnectionProfile,

    /// Steps run once after the connection opens
    #[serde(default)]
    pub init: Vec<Step>,

    /// Device-level parameter defaults
    #[serde(default)]
    pub parameters: ParamMap,

    /// Named commands
    #[serde(default)]
    pub commands: BTreeMap<String, CommandProfile>,

    /// Capability method name to command name
    #[serde(default)]
    pub capabilities: BTreeMap<String, String>,
}

impl DeviceProfile {
    /// Connection options derived from `[connection]`.
    pub fn connect_options(&self) -> Result<ConnectOptions, InstrumentError> {
        self.connection.connect_options()
    }

    /// Command mapped to a capability method, if any.
    pub fn capability_command(&self, method: &str) -> Option<&str> {
        self.capabilities.get(method).map(String::as_str)
    }
}

/// `[device]` table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceIdentity {
    /// Display name
    pub name: String,
    /// Manufacturer
    pub manufacturer: Option<String>,
    /// Model number
    pub model: Option<String>,
    /// Instrument category
    #[serde(default)]
    pub category: InstrumentCategory,
    /// Free-form description
    pub description: Option<String>,
}

/// `[connection]` table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionProfile {
    /// Read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Appended to every command
    #[serde(default = "default_terminator")]
    pub write_terminator: String,
    /// Reply terminator; the last byte ends a reply
    #[serde(default = "default_terminator")]
    pub read_terminator: String,
    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_terminator() -> String {
    "\n".to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            write_terminator: default_terminator(),
            read_terminator: default_terminator(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl ConnectionProfile {
    /// Transport options for this connection.
    pub fn connect_options(&self) -> Result<ConnectOptions, InstrumentError> {
        let read_terminator = *self.read_terminator.as_bytes().last().ok_or_else(|| {
            InstrumentError::Configuration("read_terminator must not be empty".into())
        })?;
        Ok(ConnectOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            write_terminator: self.write_terminator.clone(),
            read_terminator,
            baud_rate: self.baud_rate,
        })
    }
}

/// `[commands.<name>]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CommandProfile {
    /// Writes and delays, in order
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Query sent after the steps
    pub query: Option<String>,
    /// Read a reply after the steps without sending a query (talk-only
    /// instruments)
    #[serde(default)]
    pub fetch: bool,
    /// How to decode the query reply (float when omitted)
    pub reply: Option<ReplyFormat>,
    /// Delay after the steps, before the query
    #[serde(default)]
    pub settle_ms: u64,
    /// Parameter defaults for this command
    #[serde(default)]
    pub defaults: ParamMap,
    /// Free-form description
    pub description: Option<String>,
}

impl CommandProfile {
    /// Reply format, defaulting to float.
    pub fn reply_format(&self) -> ReplyFormat {
        self.reply.unwrap_or_default()
    }
}

/// One step of a command or init sequence.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Step {
    /// Unconditional write
    Write(String),
    /// Fixed delay
    Sleep {
        /// Delay in milliseconds
        sleep_ms: u64,
    },
    /// Conditional write
    Guarded {
        /// Command template
        write: String,
        /// Boolean expression over the parameters; the write is skipped when false
        #[serde(default)]
        when: Option<String>,
        /// Query whose reply decides whether the write is needed
        #[serde(default)]
        unless_query: Option<String>,
        /// Reply to `unless_query` that makes the write unnecessary
        #[serde(default)]
        equals: Option<String>,
    },
}

impl Step {
    /// Templates referenced by this step.
    pub fn templates(&self) -> Vec<&str> {
        match self {
            Step::Write(template) => vec![template.as_str()],
            Step::Sleep { .. } => Vec::new(),
            Step::Guarded {
                write,
                unless_query,
                ..
            } => {
                let mut templates = vec![write.as_str()];
                if let Some(query) = unless_query {
                    templates.push(query.as_str());
                }
                templates
            }
        }
    }
}

/// Parameter value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean (renders as ON/OFF)
    Bool(bool),
    /// Number
    Number(f64),
    /// Text
    Text(String),
}

impl ParamValue {
    /// Numeric view of the value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(v) => Some(*v),
            ParamValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Truth value: numbers are true when non-zero, text when ON/TRUE/1.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Number(v) => Some(*v != 0.0),
            ParamValue::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
                "ON" | "TRUE" | "1" => Some(true),
                "OFF" | "FALSE" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(true) => f.write_str("ON"),
            ParamValue::Bool(false) => f.write_str("OFF"),
            ParamValue::Number(v) => write!(f, "{}", v),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for ParamValue {
    type Err = std::convert::Infallible;

    /// `true`/`false` become booleans, anything numeric a number, the rest text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed {
            "true" => ParamValue::Bool(true),
            "false" => ParamValue::Bool(false),
            _ => match trimmed.parse::<f64>() {
                Ok(v) if v.is_finite() => ParamValue::Number(v),
                _ => ParamValue::Text(trimmed.to_string()),
            },
        })
    }
}

/// Parse `key=value` into a parameter.
pub fn parse_key_value(arg: &str) -> Result<(String, ParamValue), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", arg))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", arg));
    }
    let value = match value.parse::<ParamValue>() {
        Ok(v) => v,
        Err(never) => match never {},
    };
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_profile_defaults() {
        let profile: DeviceProfile = toml::from_str(
            r#"
[device]
name = "Counter"
"#,
        )
        .unwrap();
        assert_eq!(profile.device.category, InstrumentCategory::Other);
        assert_eq!(profile.connection.timeout_ms, 60_000);
        let options = profile.connect_options().unwrap();
        assert_eq!(options.read_terminator, b'\n');
        assert_eq!(options.baud_rate, 9600);
        assert!(profile.commands.is_empty());
    }

    #[test]
    fn step_forms() {
        #[derive(Deserialize)]
        struct Holder {
            steps: Vec<Step>,
        }
        let holder: Holder = toml::from_str(
            r#"
steps = [
    "OUTP ON",
    { sleep_ms = 250 },
    { write = "DC", when = "mode == \"dc\"" },
    { write = "FU 1", unless_query = "FU?", equals = "FU1" },
]
"#,
        )
        .unwrap();
        assert_eq!(holder.steps[0], Step::Write("OUTP ON".into()));
        assert_eq!(holder.steps[1], Step::Sleep { sleep_ms: 250 });
        assert!(matches!(&holder.steps[2], Step::Guarded { when: Some(w), .. } if w == "mode == \"dc\""));
        assert_eq!(holder.steps[3].templates(), vec!["FU 1", "FU?"]);
    }

    #[test]
    fn param_values() {
        assert_eq!("true".parse::<ParamValue>().unwrap(), ParamValue::Bool(true));
        assert_eq!("-10".parse::<ParamValue>().unwrap(), ParamValue::Number(-10.0));
        assert_eq!("dBm".parse::<ParamValue>().unwrap(), ParamValue::Text("dBm".into()));
        assert_eq!(ParamValue::Bool(false).to_string(), "OFF");
        assert_eq!(ParamValue::Number(1000.0).to_string(), "1000");
        assert_eq!(ParamValue::Text("on".into()).as_bool(), Some(true));
    }

    #[test]
    fn key_value_arguments() {
        assert_eq!(
            parse_key_value("frequency=1e6").unwrap(),
            ("frequency".to_string(), ParamValue::Number(1e6))
        );
        assert!(parse_key_value("frequency").is_err());
        assert!(parse_key_value("=3").is_err());
    }

    #[test]
    fn crlf_profile_uses_last_byte() {
        let connection = ConnectionProfile {
            read_terminator: "\r\n".into(),
            ..ConnectionProfile::default()
        };
        assert_eq!(connection.connect_options().unwrap().read_terminator, b'\n');

        let empty = ConnectionProfile {
            read_terminator: String::new(),
            ..ConnectionProfile::default()
        };
        assert!(empty.connect_options().is_err());
    }
}
