//! Typed access to the `key=value` options of one clause.
//!
//! Values are stored as the literal strings from the connection string and
//! converted on demand. Sizes accept `KB`, `MB` and `GB` suffixes (bare
//! numbers are kilobytes); durations accept `ms`, `s`, `m`, `h` and `d`
//! (bare numbers are seconds). Unlike lookups with silent fallbacks, a
//! present-but-malformed value is a [`ConfigurationError`] so mistakes
//! surface at configure time.

use std::time::Duration;

use crate::error::ConfigurationError;

/// Ordered `key=value` option set for one transport clause.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionMap {
    entries: Vec<(String, String)>,
}

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an option, rejecting duplicate keys.
    pub(crate) fn insert(
        &mut self,
        clause: &str,
        key: String,
        value: String,
    ) -> Result<(), ConfigurationError> {
        if self.get(&key).is_some() {
            return Err(ConfigurationError::DuplicateOption {
                clause: clause.to_string(),
                key,
            });
        }
        self.entries.push((key, value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigurationError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(invalid(key, raw, "expected a boolean")),
            },
        }
    }

    pub fn get_u32(&self, key: &str, default: u32) -> Result<u32, ConfigurationError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| invalid(key, raw, "expected a non-negative integer")),
        }
    }

    pub fn get_u16(&self, key: &str, default: u16) -> Result<u16, ConfigurationError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| invalid(key, raw, "expected a port number")),
        }
    }

    /// Byte size with an optional `KB`/`MB`/`GB` suffix; bare values are
    /// kilobytes.
    pub fn get_size(&self, key: &str, default: u64) -> Result<u64, ConfigurationError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => {
                let trimmed = raw.trim();
                let upper = trimmed.to_ascii_uppercase();
                let (digits, factor) = if let Some(n) = upper.strip_suffix("KB") {
                    (n.to_string(), 1024)
                } else if let Some(n) = upper.strip_suffix("MB") {
                    (n.to_string(), 1024 * 1024)
                } else if let Some(n) = upper.strip_suffix("GB") {
                    (n.to_string(), 1024 * 1024 * 1024)
                } else {
                    (upper, 1024)
                };
                digits
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .and_then(|n| n.checked_mul(factor))
                    .ok_or_else(|| invalid(key, raw, "expected a size such as \"16MB\""))
            }
        }
    }

    /// Duration with an optional `ms`/`s`/`m`/`h`/`d` suffix; bare values
    /// are seconds.
    pub fn get_duration(&self, key: &str, default: Duration) -> Result<Duration, ConfigurationError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => {
                let trimmed = raw.trim().to_ascii_lowercase();
                let (digits, millis_per_unit) = if let Some(n) = trimmed.strip_suffix("ms") {
                    (n.to_string(), 1u64)
                } else if let Some(n) = trimmed.strip_suffix('s') {
                    (n.to_string(), 1_000)
                } else if let Some(n) = trimmed.strip_suffix('m') {
                    (n.to_string(), 60_000)
                } else if let Some(n) = trimmed.strip_suffix('h') {
                    (n.to_string(), 3_600_000)
                } else if let Some(n) = trimmed.strip_suffix('d') {
                    (n.to_string(), 86_400_000)
                } else {
                    (trimmed, 1_000)
                };
                digits
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .and_then(|n| n.checked_mul(millis_per_unit))
                    .map(Duration::from_millis)
                    .ok_or_else(|| invalid(key, raw, "expected a duration such as \"30s\""))
            }
        }
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn map(pairs: &[(&str, &str)]) -> OptionMap {
        let mut m = OptionMap::new();
        for (k, v) in pairs {
            m.insert("test", k.to_string(), v.to_string()).unwrap();
        }
        m
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut m = OptionMap::new();
        m.insert("tcp", "host".into(), "a".into()).unwrap();
        let err = m.insert("tcp", "host".into(), "b".into()).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateOption { .. }));
    }

    #[rstest]
    #[case("true", true)]
    #[case("Yes", true)]
    #[case("1", true)]
    #[case("false", false)]
    #[case("no", false)]
    #[case("0", false)]
    fn booleans_accept_the_usual_spellings(#[case] raw: &str, #[case] expected: bool) {
        let m = map(&[("flag", raw)]);
        assert_eq!(m.get_bool("flag", !expected).unwrap(), expected);
    }

    #[test]
    fn malformed_boolean_is_an_error_not_a_default() {
        let m = map(&[("flag", "maybe")]);
        assert!(m.get_bool("flag", false).is_err());
    }

    #[rstest]
    #[case("2048", 2048 * 1024)]
    #[case("4KB", 4 * 1024)]
    #[case("16MB", 16 * 1024 * 1024)]
    #[case("1gb", 1024 * 1024 * 1024)]
    fn sizes_default_to_kilobytes(#[case] raw: &str, #[case] expected: u64) {
        let m = map(&[("maxsize", raw)]);
        assert_eq!(m.get_size("maxsize", 0).unwrap(), expected);
    }

    #[rstest]
    #[case("30", Duration::from_secs(30))]
    #[case("500ms", Duration::from_millis(500))]
    #[case("2m", Duration::from_secs(120))]
    #[case("1h", Duration::from_secs(3600))]
    #[case("1d", Duration::from_secs(86_400))]
    fn durations_default_to_seconds(#[case] raw: &str, #[case] expected: Duration) {
        let m = map(&[("timeout", raw)]);
        assert_eq!(m.get_duration("timeout", Duration::ZERO).unwrap(), expected);
    }

    #[test]
    fn sizes_too_large_to_represent_are_errors_not_panics() {
        let m = map(&[("maxsize", "18000000000000000000KB")]);
        assert!(matches!(
            m.get_size("maxsize", 0),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn durations_too_large_to_represent_are_errors_not_panics() {
        let m = map(&[("timeout", "18000000000000000000m")]);
        assert!(matches!(
            m.get_duration("timeout", Duration::ZERO),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let m = OptionMap::new();
        assert_eq!(m.get_string("host", "127.0.0.1"), "127.0.0.1");
        assert!(!m.get_bool("async", false).unwrap());
        assert_eq!(m.get_size("backlog", 7).unwrap(), 7);
    }
}
