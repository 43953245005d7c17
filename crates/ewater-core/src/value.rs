//! Field values and their textual forms
//!
//! The device firmware parses numbers the way a JavaScript runtime prints
//! them, so every number that leaves this crate goes through
//! [`format_number`]. Using one formatter for the canonical signing string,
//! the JSON payload and the line protocol keeps all three byte-identical.

use serde::{Deserialize, Serialize};

/// A single configuration or message field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Whether the value takes part in canonical serialization.
    ///
    /// Non-finite numbers are treated as absent. Strings are always present,
    /// including the empty string.
    pub fn is_present(&self) -> bool {
        match self {
            FieldValue::Number(n) => n.is_finite(),
            FieldValue::Bool(_) | FieldValue::Text(_) => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// JSON text for this value (compact, no surrounding whitespace).
    pub fn to_json(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) if n.is_finite() => format_number(*n),
            FieldValue::Number(_) => "null".to_string(),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()).to_string(),
        }
    }

    /// Argument text for the line protocol. Flags travel as `1`/`0`.
    pub fn to_line_arg(&self) -> String {
        match self {
            FieldValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Text(s) => s.clone(),
        }
    }

    /// Convert a JSON value into a field value; objects, arrays and null
    /// have no field representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Number),
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Number(f64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// Format a finite number in the shortest round-trip form used by
/// ECMAScript `Number.prototype.toString`.
///
/// Magnitudes in `[1e-6, 1e21)` print in plain decimal (integral values
/// without a fractional part); everything else uses exponent form with an
/// explicit sign on positive exponents (`1.5e+21`, `1e-7`).
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // covers -0 as well
        return "0".to_string();
    }

    let magnitude = value.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return format!("{value}");
    }

    let exp_form = format!("{value:e}");
    match exp_form.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{mantissa}e+{exponent}")
        }
        _ => exp_form,
    }
}
