//! Command template rendering and step conditions.
//!
//! Templates contain `${name}` or `${name:spec}` placeholders. Supported specs:
//!
//! | spec | meaning | `1234.5678` renders as |
//! |------|---------|------------------------|
//! | `.N` | fixed precision | `.2` → `1234.57` |
//! | `.Ne` | scientific, N digits | `.3e` → `1.235E3` |
//! | `d`, `0Wd` | rounded integer, zero padded to W | `06d` → `001235` |
//! | `X`, `x`, `0WX` | rounded hexadecimal | `04X` → `04D3` |
//! | `on_off` | `ON` / `OFF` | |
//! | `01` | `1` / `0` | |
//!
//! Without a spec numbers use their shortest form, booleans render as
//! `ON`/`OFF` and text is inserted verbatim.

use crate::schema::{ParamMap, ParamValue};
use evalexpr::{
    build_operator_tree, eval_boolean_with_context, ContextWithMutableVariables, HashMapContext,
    Value,
};
use metrology_core::InstrumentError;
use regex::Regex;
use std::sync::LazyLock;

/// Matches `${param}` or `${param:spec}`.
static INTERPOLATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("Invalid interpolation regex"));

/// Render `template` for `command` with `params`.
pub fn render(template: &str, params: &ParamMap, command: &str) -> Result<String, InstrumentError> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;

    for captures in INTERPOLATION_REGEX.captures_iter(template) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        result.push_str(&template[last..whole.start()]);

        let (name, spec) = match inner.as_str().split_once(':') {
            Some((name, spec)) => (name.trim(), Some(spec.trim())),
            None => (inner.as_str().trim(), None),
        };
        let value = params
            .get(name)
            .ok_or_else(|| InstrumentError::MissingParameter {
                command: command.to_string(),
                parameter: name.to_string(),
            })?;
        result.push_str(&format_value(value, spec, name)?);
        last = whole.end();
    }

    result.push_str(&template[last..]);
    Ok(result)
}

/// Placeholder names referenced by `template`.
pub fn placeholders(template: &str) -> Vec<String> {
    INTERPOLATION_REGEX
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .map(|m| {
            let inner = m.as_str();
            inner
                .split_once(':')
                .map_or(inner, |(name, _)| name)
                .trim()
                .to_string()
        })
        .collect()
}

/// Check that every placeholder spec in `template` is understood.
pub fn check_template(template: &str) -> Result<(), String> {
    for captures in INTERPOLATION_REGEX.captures_iter(template) {
        let Some(inner) = captures.get(1) else {
            continue;
        };
        let Some((name, spec)) = inner.as_str().split_once(':') else {
            continue;
        };
        let spec = spec.trim();
        if name.trim().is_empty() {
            return Err(format!("empty placeholder name in '{}'", template));
        }
        // Any number exercises every spec the renderer accepts.
        format_value(&ParamValue::Number(1.0), Some(spec), name.trim())
            .map_err(|_| format!("unknown format spec '{}' in '{}'", spec, template))?;
    }
    Ok(())
}

fn format_value(value: &ParamValue, spec: Option<&str>, name: &str) -> Result<String, InstrumentError> {
    let Some(spec) = spec else {
        return Ok(value.to_string());
    };

    let number = || {
        value.as_f64().ok_or_else(|| {
            InstrumentError::Configuration(format!(
                "parameter '{}' = '{}' is not numeric (format '{}')",
                name, value, spec
            ))
        })
    };
    let truth = || {
        value.as_bool().ok_or_else(|| {
            InstrumentError::Configuration(format!(
                "parameter '{}' = '{}' is not a boolean (format '{}')",
                name, value, spec
            ))
        })
    };

    match spec {
        "on_off" => Ok(if truth()? { "ON" } else { "OFF" }.to_string()),
        "01" => Ok(if truth()? { "1" } else { "0" }.to_string()),
        s if s.starts_with('.') && s.ends_with('e') => {
            let digits = parse_width(&s[1..s.len() - 1], spec)?;
            Ok(format!("{:.*E}", digits, number()?))
        }
        s if s.starts_with('.') => {
            let digits = parse_width(&s[1..], spec)?;
            Ok(format!("{:.*}", digits, number()?))
        }
        s if s.ends_with('d') => {
            let width = parse_width(&s[..s.len() - 1], spec)?;
            let int = number()?.round() as i64;
            Ok(format!("{:0width$}", int, width = width))
        }
        s if s.ends_with('X') => {
            let width = parse_width(&s[..s.len() - 1], spec)?;
            let uint = number()?.round() as i64 as u64;
            Ok(format!("{:0width$X}", uint, width = width))
        }
        s if s.ends_with('x') => {
            let width = parse_width(&s[..s.len() - 1], spec)?;
            let uint = number()?.round() as i64 as u64;
            Ok(format!("{:0width$x}", uint, width = width))
        }
        _ => Err(InstrumentError::Configuration(format!(
            "unknown format spec '{}' for parameter '{}'",
            spec, name
        ))),
    }
}

/// Width or precision digits; empty means zero.
fn parse_width(digits: &str, spec: &str) -> Result<usize, InstrumentError> {
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse::<usize>()
        .map_err(|_| InstrumentError::Configuration(format!("bad width in format spec '{}'", spec)))
}

/// Evaluate a `when` expression against the parameters.
pub fn evaluate_condition(expression: &str, params: &ParamMap) -> Result<bool, InstrumentError> {
    let mut context = HashMapContext::new();
    for (name, value) in params {
        let value = match value {
            ParamValue::Bool(b) => Value::Boolean(*b),
            ParamValue::Number(v) => Value::Float(*v),
            ParamValue::Text(s) => Value::String(s.clone()),
        };
        context
            .set_value(name.clone(), value)
            .map_err(|e| InstrumentError::Configuration(e.to_string()))?;
    }
    eval_boolean_with_context(expression, &context).map_err(|e| {
        InstrumentError::Configuration(format!("condition '{}' failed: {}", expression, e))
    })
}

/// Check that a `when` expression parses.
pub fn check_condition(expression: &str) -> Result<(), String> {
    build_operator_tree(expression)
        .map(|_| ())
        .map_err(|e| format!("invalid condition '{}': {}", expression, e))
}
