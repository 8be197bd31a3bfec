//! Scalar binding values and the string/number coercions the condition rules rely on.
//!
//! Flow documents are authored in a browser editor, so every comparison follows the
//! browser's `String(x)` / `Number(x)` conversions. A missing binding behaves like
//! `undefined`: it stringifies to `"undefined"`, converts to `NaN` and is falsy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-session variable store. Ordered so snapshots serialize deterministically.
pub type Bindings = BTreeMap<String, Scalar>;

/// A single binding value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    String(String),
}

impl Scalar {
    /// `String(x)`.
    pub fn to_js_string(&self) -> String {
        match self {
            Scalar::String(s) => s.clone(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => number_to_js_string(*n),
        }
    }

    /// `Number(x)`.
    pub fn to_js_number(&self) -> f64 {
        match self {
            Scalar::Number(n) => *n,
            Scalar::Bool(true) => 1.0,
            Scalar::Bool(false) => 0.0,
            Scalar::String(s) => string_to_js_number(s),
        }
    }

    /// `!!x`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => *n != 0.0 && !n.is_nan(),
            Scalar::String(s) => !s.is_empty(),
        }
    }

    /// Converts a JSON scalar. Objects and arrays are kept as their JSON text; `null` has
    /// no scalar form.
    pub fn from_json(value: &serde_json::Value) -> Option<Scalar> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Scalar::Number),
            serde_json::Value::String(s) => Some(Scalar::String(s.clone())),
            other => Some(Scalar::String(other.to_string())),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_js_string())
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Scalar::Number(n)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// `String(x)` for a binding that may be absent.
pub fn js_string(value: Option<&Scalar>) -> String {
    value
        .map(Scalar::to_js_string)
        .unwrap_or_else(|| "undefined".to_string())
}

/// `Number(x)` for a binding that may be absent.
pub fn js_number(value: Option<&Scalar>) -> f64 {
    value.map(Scalar::to_js_number).unwrap_or(f64::NAN)
}

/// `!!x` for a binding that may be absent.
pub fn js_truthy(value: Option<&Scalar>) -> bool {
    value.is_some_and(Scalar::is_truthy)
}

fn number_to_js_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        // covers -0
        "0".to_string()
    } else if n.abs() >= 1e21 || n.abs() < 1e-6 {
        // Exponent form, with an explicit sign on positive exponents.
        let exp = format!("{n:e}");
        match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => format!("{mantissa}e+{power}"),
            _ => exp,
        }
    } else {
        n.to_string()
    }
}

/// `Number(s)` for strings: whitespace-trimmed, empty is zero, anything that is not a
/// complete numeric literal is `NaN`.
pub fn string_to_js_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }

    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }

    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = t.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix)
                .map(|v| v as f64)
                .unwrap_or(f64::NAN);
        }
    }

    // Rust's float parser also accepts "inf"/"nan" spellings; only plain decimal
    // literals are numbers here.
    let is_decimal_literal = t
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        && t.chars().any(|c| c.is_ascii_digit());
    if !is_decimal_literal {
        return f64::NAN;
    }

    t.parse::<f64>().unwrap_or(f64::NAN)
}
