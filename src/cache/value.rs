//! The opaque payload type stored by the cache subsystem, plus the small
//! tagged-union numeric discrimination counters need: rather than treating
//! a stored value as "any value", `Increment`/`Decrement` recognize a
//! closed set of numeric-ish shapes and fail cleanly on anything else.

use serde::{Deserialize, Serialize};

/// A value stored under a cache key. Opaque to the contract except for the
/// numeric coercion `Increment`/`Decrement` perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl CacheValue {
    /// Coerce to a signed 64-bit integer for counter operations. Supported
    /// source kinds: signed/unsigned integer, 32/64-bit float parsable as
    /// an integer, decimal string. Anything else (bool, null, bytes,
    /// non-numeric JSON) is not convertible.
    pub fn as_counter(&self) -> Option<i64> {
        match self {
            CacheValue::Int(n) => Some(*n),
            CacheValue::Float(f) => float_to_i64(*f),
            CacheValue::Text(s) => s
                .parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64)),
            CacheValue::Json(v) => v
                .as_i64()
                .or_else(|| v.as_u64().and_then(|n| i64::try_from(n).ok()))
                .or_else(|| v.as_f64().and_then(float_to_i64)),
            CacheValue::Bool(_) | CacheValue::Null | CacheValue::Bytes(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CacheValue::Null => "null",
            CacheValue::Bool(_) => "bool",
            CacheValue::Int(_) => "int",
            CacheValue::Float(_) => "float",
            CacheValue::Text(_) => "text",
            CacheValue::Bytes(_) => "bytes",
            CacheValue::Json(_) => "json",
        }
    }
}

fn float_to_i64(f: f64) -> Option<i64> {
    if !f.is_finite() || f.fract() != 0.0 {
        return None;
    }
    if f < i64::MIN as f64 || f > i64::MAX as f64 {
        return None;
    }
    Some(f as i64)
}

impl From<i64> for CacheValue {
    fn from(n: i64) -> Self {
        CacheValue::Int(n)
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        CacheValue::Text(s.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> Self {
        CacheValue::Text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_and_float_and_string_counters_convert() {
        assert_eq!(CacheValue::Int(5).as_counter(), Some(5));
        assert_eq!(CacheValue::Float(5.0).as_counter(), Some(5));
        assert_eq!(CacheValue::Float(5.5).as_counter(), None);
        assert_eq!(CacheValue::Text("42".into()).as_counter(), Some(42));
        assert_eq!(CacheValue::Text("42.0".into()).as_counter(), Some(42));
        assert_eq!(CacheValue::Text("not a number".into()).as_counter(), None);
        assert_eq!(CacheValue::Bool(true).as_counter(), None);
        assert_eq!(CacheValue::Null.as_counter(), None);
    }
}
