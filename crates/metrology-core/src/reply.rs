//! Reply decoding.
//!
//! Most instruments answer a measurement query with a bare number. Some
//! (notably older DMMs) wrap it in units and status fields such as
//! `+1.234567E-03VDC,+0.000SECS`; [`ReplyFormat::Scientific`] pulls the first
//! exponent-form number out of such replies.

use crate::error::InstrumentError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// First number written with an exponent, e.g. `-1.5E+01` or `3e-6`.
static SCIENTIFIC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[+-]?(?:\d+\.?\d*|\.\d+)[Ee][+-]?\d+").expect("Invalid scientific regex")
});

/// How to interpret a reply string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFormat {
    /// Whole trimmed reply is a float
    #[default]
    Float,
    /// First exponent-form number embedded in the reply
    Scientific,
    /// Whole trimmed reply is an integer
    Integer,
    /// `ON`/`OFF`, `1`/`0`, `TRUE`/`FALSE`
    Bool,
    /// Raw text
    Text,
}

impl fmt::Display for ReplyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplyFormat::Float => "float",
            ReplyFormat::Scientific => "scientific",
            ReplyFormat::Integer => "integer",
            ReplyFormat::Bool => "bool",
            ReplyFormat::Text => "text",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ReplyFormat {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float" => Ok(ReplyFormat::Float),
            "scientific" => Ok(ReplyFormat::Scientific),
            "integer" => Ok(ReplyFormat::Integer),
            "bool" => Ok(ReplyFormat::Bool),
            "text" => Ok(ReplyFormat::Text),
            other => Err(InstrumentError::Configuration(format!(
                "unknown reply format '{}' (float, scientific, integer, bool, text)",
                other
            ))),
        }
    }
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    /// Numeric value
    Float(f64),
    /// Integer value
    Integer(i64),
    /// Boolean state
    Bool(bool),
    /// Unparsed text
    Text(String),
}

impl Reading {
    /// Numeric view of the reading, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Float(v) => Some(*v),
            Reading::Integer(v) => Some(*v as f64),
            Reading::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Reading::Text(_) => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Float(v) => write!(f, "{}", v),
            Reading::Integer(v) => write!(f, "{}", v),
            Reading::Bool(v) => write!(f, "{}", v),
            Reading::Text(v) => f.write_str(v),
        }
    }
}

/// Decode `reply` according to `format`.
pub fn parse_reading(reply: &str, format: ReplyFormat) -> Result<Reading, InstrumentError> {
    let trimmed = reply.trim();
    let fail = || InstrumentError::parse(trimmed, format.to_string());

    match format {
        ReplyFormat::Float => trimmed
            .parse::<f64>()
            .map(Reading::Float)
            .map_err(|_| fail()),
        ReplyFormat::Scientific => {
            let token = SCIENTIFIC_REGEX.find(trimmed).ok_or_else(fail)?;
            token
                .as_str()
                .parse::<f64>()
                .map(Reading::Float)
                .map_err(|_| fail())
        }
        ReplyFormat::Integer => trimmed
            .strip_prefix('+')
            .unwrap_or(trimmed)
            .parse::<i64>()
            .map(Reading::Integer)
            .map_err(|_| fail()),
        ReplyFormat::Bool => match trimmed.to_ascii_uppercase().as_str() {
            "ON" | "1" | "TRUE" => Ok(Reading::Bool(true)),
            "OFF" | "0" | "FALSE" => Ok(Reading::Bool(false)),
            _ => Err(fail()),
        },
        ReplyFormat::Text => Ok(Reading::Text(trimmed.to_string())),
    }
}

/// Decode a numeric reply (float or scientific).
pub fn parse_f64(reply: &str, format: ReplyFormat) -> Result<f64, InstrumentError> {
    parse_reading(reply, format)?
        .as_f64()
        .ok_or_else(|| InstrumentError::parse(reply.trim(), format.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_reply() {
        assert_eq!(
            parse_reading(" -12.5\n", ReplyFormat::Float).unwrap(),
            Reading::Float(-12.5)
        );
        assert_eq!(
            parse_reading("+9.91E+37", ReplyFormat::Float).unwrap(),
            Reading::Float(9.91e37)
        );
    }

    #[test]
    fn scientific_token_from_dmm_reply() {
        let reading = parse_reading("+1.234567E-03VDC,+0.000SECS", ReplyFormat::Scientific).unwrap();
        assert_eq!(reading, Reading::Float(1.234567e-3));

        let reading = parse_reading("NDCV-1.00004E+1", ReplyFormat::Scientific).unwrap();
        assert_eq!(reading, Reading::Float(-10.0004));
    }

    #[test]
    fn format_names_round_trip() {
        for format in [ReplyFormat::Scientific, ReplyFormat::Bool, ReplyFormat::Text] {
            assert_eq!(format.to_string().parse::<ReplyFormat>().unwrap(), format);
        }
        assert_eq!("FLOAT".parse::<ReplyFormat>().unwrap(), ReplyFormat::Float);
        assert!("hex".parse::<ReplyFormat>().is_err());
    }

    #[test]
    fn scientific_miss_is_parse_error() {
        let err = parse_reading("OVERLOAD", ReplyFormat::Scientific).unwrap_err();
        assert_eq!(
            err,
            InstrumentError::Parse {
                reply: "OVERLOAD".into(),
                expected: "scientific".into()
            }
        );
    }

    #[test]
    fn float_cast_failure_is_parse_error() {
        assert!(matches!(
            parse_reading("1.0 V", ReplyFormat::Float),
            Err(InstrumentError::Parse { .. })
        ));
    }

    #[test]
    fn integer_and_bool() {
        assert_eq!(
            parse_reading("+42", ReplyFormat::Integer).unwrap(),
            Reading::Integer(42)
        );
        assert_eq!(
            parse_reading("on", ReplyFormat::Bool).unwrap(),
            Reading::Bool(true)
        );
        assert_eq!(
            parse_reading("0", ReplyFormat::Bool).unwrap(),
            Reading::Bool(false)
        );
        assert!(parse_reading("MAYBE", ReplyFormat::Bool).is_err());
    }

    #[test]
    fn text_is_trimmed_verbatim() {
        let reading = parse_reading("  FLUKE,9640A,123,1.0\r\n", ReplyFormat::Text).unwrap();
        assert_eq!(reading.to_string(), "FLUKE,9640A,123,1.0");
        assert_eq!(reading.as_f64(), None);
    }

    #[test]
    fn parse_f64_rejects_text_format() {
        assert_eq!(parse_f64("1.5", ReplyFormat::Float).unwrap(), 1.5);
        assert!(parse_f64("1.5", ReplyFormat::Text).is_err());
    }

    #[test]
    fn format_names_deserialize() {
        #[derive(Deserialize)]
        struct Holder {
            reply: ReplyFormat,
        }
        let holder: Holder = serde_json::from_str(r#"{"reply":"scientific"}"#).unwrap();
        assert_eq!(holder.reply, ReplyFormat::Scientific);
    }
}
