//! Agent configuration from the environment
//!
//! The monitored process is launched by the collector, so the environment is
//! the only channel available:
//!
//! | variable                | meaning                          | default |
//! |-------------------------|----------------------------------|---------|
//! | `ALLOCVIEW_SOCK`        | endpoint path (socket or file)   | unset: agent disabled |
//! | `ALLOCVIEW_INTERVAL_MS` | snapshot tick                    | 100     |
//! | `ALLOCVIEW_RATE`        | record every Nth allocation      | 1       |

use std::path::PathBuf;
use std::time::Duration;

use allocview_common::ENDPOINT_ENV;

pub const INTERVAL_ENV: &str = "ALLOCVIEW_INTERVAL_MS";
pub const RATE_ENV: &str = "ALLOCVIEW_RATE";

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_SAMPLE_RATE: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub endpoint: PathBuf,
    pub interval: Duration,
    pub sample_rate: u64,
}

impl AgentConfig {
    /// Read the configuration; `None` when no endpoint is set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AgentConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let endpoint = lookup(ENDPOINT_ENV).filter(|v| !v.is_empty())?;

        let interval = parse_positive(lookup(INTERVAL_ENV), INTERVAL_ENV)
            .map_or(DEFAULT_INTERVAL, Duration::from_millis);
        let sample_rate = parse_positive(lookup(RATE_ENV), RATE_ENV).unwrap_or(DEFAULT_SAMPLE_RATE);

        Some(Self { endpoint: PathBuf::from(endpoint), interval, sample_rate })
    }
}

fn parse_positive(value: Option<String>, key: &str) -> Option<u64> {
    let raw = value?;
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            log::warn!("ignoring invalid {key}={raw:?}, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_disabled_without_endpoint() {
        assert_eq!(AgentConfig::from_lookup(lookup(&[(RATE_ENV, "4")])), None);
        assert_eq!(AgentConfig::from_lookup(lookup(&[(ENDPOINT_ENV, "")])), None);
    }

    #[test]
    fn test_defaults() {
        let cfg = AgentConfig::from_lookup(lookup(&[(ENDPOINT_ENV, "/tmp/x.sock")])).unwrap();
        assert_eq!(cfg.endpoint, PathBuf::from("/tmp/x.sock"));
        assert_eq!(cfg.interval, DEFAULT_INTERVAL);
        assert_eq!(cfg.sample_rate, 1);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let cfg = AgentConfig::from_lookup(lookup(&[
            (ENDPOINT_ENV, "/tmp/x.sock"),
            (INTERVAL_ENV, "25"),
            (RATE_ENV, "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.interval, Duration::from_millis(25));
        assert_eq!(cfg.sample_rate, DEFAULT_SAMPLE_RATE);
    }
}
