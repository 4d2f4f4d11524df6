//! Per-bin limits derived from the `[[throttle]]` configuration

use crate::config::ThrottleEntry;
use crate::ConfigError;
use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone)]
struct ThrottleRule {
    pattern: Regex,
    max_connections: Option<u32>,
    min_ms_per_byte: Option<f64>,
    min_ms_per_fetch: Option<u64>,
}

/// Ordered list of bin patterns and the limits they impose
#[derive(Debug, Clone, Default)]
pub struct ThrottleDescription {
    rules: Vec<ThrottleRule>,
}

impl ThrottleDescription {
    /// A description with no limits at all
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Compiles the configured entries
    ///
    /// # Arguments
    ///
    /// * `entries` - `[[throttle]]` entries in configuration order
    ///
    /// # Returns
    ///
    /// * `Ok(ThrottleDescription)` - Every pattern compiled
    /// * `Err(ConfigError)` - A bin regex is invalid
    pub fn from_config(entries: &[ThrottleEntry]) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries {
            let pattern = RegexBuilder::new(&entry.bin_regex)
                .case_insensitive(entry.case_insensitive)
                .build()
                .map_err(|e| {
                    ConfigError::InvalidPattern(format!("bin-regex '{}': {}", entry.bin_regex, e))
                })?;

            rules.push(ThrottleRule {
                pattern,
                max_connections: entry.max_connections,
                min_ms_per_byte: entry
                    .max_kb_per_second
                    .filter(|kbps| *kbps > 0.0)
                    .map(|kbps| 1.0 / kbps),
                min_ms_per_fetch: entry
                    .max_fetches_per_minute
                    .filter(|fpm| *fpm > 0)
                    .map(|fpm| 60_000 / u64::from(fpm)),
            });
        }
        Ok(Self { rules })
    }

    fn matching<'a>(&'a self, bin: &'a str) -> impl Iterator<Item = &'a ThrottleRule> + 'a {
        self.rules.iter().filter(move |r| r.pattern.is_match(bin))
    }

    /// Maximum simultaneous connections for a bin, `None` for unlimited
    ///
    /// The largest limit among matching entries wins. A configured 0 is
    /// treated as 1 so a matching bin can always make progress.
    pub fn max_open_connections(&self, bin: &str) -> Option<usize> {
        self.matching(bin)
            .filter_map(|r| r.max_connections)
            .max()
            .map(|limit| limit.max(1) as usize)
    }

    /// Minimum milliseconds per byte for a bin, 0.0 when unrestricted
    pub fn min_ms_per_byte(&self, bin: &str) -> f64 {
        self.matching(bin)
            .filter_map(|r| r.min_ms_per_byte)
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Minimum milliseconds between fetch starts for a bin, 0 when unrestricted
    pub fn min_ms_per_fetch(&self, bin: &str) -> u64 {
        self.matching(bin)
            .filter_map(|r| r.min_ms_per_fetch)
            .min()
            .unwrap_or(0)
    }

    /// Number of configured entries
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Bin patterns in configuration order, for display
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(
        pattern: &str,
        connections: Option<u32>,
        kbps: Option<f64>,
        fpm: Option<u32>,
    ) -> ThrottleEntry {
        ThrottleEntry {
            bin_regex: pattern.to_string(),
            case_insensitive: false,
            max_connections: connections,
            max_kb_per_second: kbps,
            max_fetches_per_minute: fpm,
        }
    }

    #[test]
    fn test_no_match_is_unlimited() {
        let description =
            ThrottleDescription::from_config(&[entry("example\\.com", Some(2), None, None)])
                .unwrap();

        assert_eq!(description.max_open_connections("other.org"), None);
        assert_eq!(description.min_ms_per_byte("other.org"), 0.0);
        assert_eq!(description.min_ms_per_fetch("other.org"), 0);
    }

    #[test]
    fn test_connections_take_maximum_over_matches() {
        let description = ThrottleDescription::from_config(&[
            entry("example", Some(2), None, None),
            entry("\\.com$", Some(5), None, None),
            entry("", None, None, None),
        ])
        .unwrap();

        assert_eq!(description.max_open_connections("www.example.com"), Some(5));
        assert_eq!(description.max_open_connections("example.org"), Some(2));
    }

    #[test]
    fn test_zero_connections_means_one() {
        let description =
            ThrottleDescription::from_config(&[entry("", Some(0), None, None)]).unwrap();
        assert_eq!(description.max_open_connections("anything"), Some(1));
    }

    #[test]
    fn test_rates_take_minimum_over_matches() {
        let description = ThrottleDescription::from_config(&[
            entry("example", None, Some(2.0), Some(30)),
            entry("", None, Some(4.0), Some(60)),
        ])
        .unwrap();

        assert_eq!(description.min_ms_per_byte("example.com"), 0.25);
        assert_eq!(description.min_ms_per_fetch("example.com"), 1000);
        assert_eq!(description.min_ms_per_byte("other.org"), 0.25);
        assert_eq!(description.min_ms_per_fetch("other.org"), 1000);
    }

    #[test]
    fn test_case_insensitive_patterns() {
        let mut insensitive = entry("EXAMPLE", Some(3), None, None);
        insensitive.case_insensitive = true;
        let description =
            ThrottleDescription::from_config(&[entry("EXAMPLE", Some(1), None, None), insensitive])
                .unwrap();

        assert_eq!(description.max_open_connections("example.com"), Some(3));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = ThrottleDescription::from_config(&[entry("(", None, None, None)]);
        assert!(matches!(result, Err(ConfigError::InvalidPattern(_))));
    }
}
