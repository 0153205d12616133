//! Untyped configuration maps consumed by driver factories.
//!
//! The crate never reads files or environment variables itself — that is
//! the embedding application's job. It only accepts an already-built map
//! and parses the keys each driver documents.

use std::collections::HashMap;
use std::time::Duration;

/// A single configuration value. Untyped at the boundary so the same map
/// shape works for every driver kind; each factory coerces the keys it
/// cares about and ignores the rest.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ConfigValue>),
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        ConfigValue::Int(n)
    }
}

impl From<u64> for ConfigValue {
    fn from(n: u64) -> Self {
        ConfigValue::Int(n as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(n: f64) -> Self {
        ConfigValue::Float(n)
    }
}

pub type ConfigMap = HashMap<String, ConfigValue>;

/// Lookup helpers shared by every driver factory. Unknown keys are simply
/// never looked up (and so are silently ignored); a missing
/// *required* key is the factory's job to turn into
/// `ErrInvalidConfiguration`.
pub trait ConfigMapExt {
    fn get_str(&self, key: &str) -> Option<&str>;
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_i64(&self, key: &str) -> Option<i64>;
    fn get_u64(&self, key: &str) -> Option<u64>;
    fn get_duration(&self, key: &str) -> Option<Duration>;
}

impl ConfigMapExt for ConfigMap {
    fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            ConfigValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            ConfigValue::Int(n) => Some(*n),
            ConfigValue::Float(f) => Some(*f as i64),
            ConfigValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_i64(key).and_then(|n| u64::try_from(n).ok())
    }

    /// Recognizes either a plain integer (seconds) or a parsable string
    /// such as `"30s"`, `"5m"`, `"1h"` — driver keys like `expiry` and
    /// `health_check_interval` accept either form.
    fn get_duration(&self, key: &str) -> Option<Duration> {
        match self.get(key)? {
            ConfigValue::Int(n) => Some(Duration::from_secs((*n).max(0) as u64)),
            ConfigValue::Float(f) => Some(Duration::from_secs_f64(f.max(0.0))),
            ConfigValue::String(s) => parse_duration_str(s),
            _ => None,
        }
    }
}

fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let (number, suffix) = s.split_at(s.find(|c: char| !c.is_ascii_digit() && c != '.')?);
    let value: f64 = number.parse().ok()?;
    let multiplier = match suffix {
        "ms" => 0.001,
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        "d" => 86400.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(value * multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_suffixes() {
        assert_eq!(parse_duration_str("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_str("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration_str("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration_str("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration_str("42"), Some(Duration::from_secs(42)));
        assert_eq!(parse_duration_str("nonsense"), None);
    }

    #[test]
    fn config_map_ext_reads_typed_values() {
        let mut map: ConfigMap = HashMap::new();
        map.insert("host".into(), "localhost".into());
        map.insert("port".into(), 6379i64.into());
        map.insert("health_check".into(), true.into());
        map.insert("expiry".into(), "1h".into());

        assert_eq!(map.get_str("host"), Some("localhost"));
        assert_eq!(map.get_i64("port"), Some(6379));
        assert_eq!(map.get_bool("health_check"), Some(true));
        assert_eq!(map.get_duration("expiry"), Some(Duration::from_secs(3600)));
        assert_eq!(map.get_str("missing"), None);
    }
}
