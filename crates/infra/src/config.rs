//! Relay configuration, read from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

pub const DEFAULT_PRODUCER_ID: &str = "supplyreg-registry";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Absent: records live in memory only.
    pub database_url: Option<String>,
    /// Absent: envelopes go to the in-memory broker.
    pub redis_url: Option<String>,
    pub producer_id: String,
    pub dispatch_interval: Duration,
    pub retention_interval: Duration,
    pub retention_window: chrono::Duration,
    pub push_timeout: Duration,
    pub retry: RetryPolicy,
    pub cache_refresh_interval: Duration,
    pub bind_addr: String,
    pub is_leader: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            producer_id: DEFAULT_PRODUCER_ID.to_string(),
            dispatch_interval: Duration::from_secs(15),
            retention_interval: Duration::from_secs(24 * 60 * 60),
            retention_window: chrono::Duration::days(30),
            push_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            cache_refresh_interval: Duration::from_secs(5 * 60),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            is_leader: true,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let retry_base = secs(&get, "SUPPLYREG_RETRY_BASE_SECS", defaults.retry.base_delay)?;
        let retry_max = secs(&get, "SUPPLYREG_RETRY_MAX_SECS", defaults.retry.max_delay)?;
        let max_attempts = match parse::<u32>(&get, "SUPPLYREG_RETRY_MAX_ATTEMPTS")? {
            Some(0) => None,
            Some(n) => Some(n),
            None => defaults.retry.max_attempts,
        };
        let retention_days = parse::<i64>(&get, "SUPPLYREG_RETENTION_DAYS")?
            .map(|days| {
                if days > 0 {
                    Ok(chrono::Duration::days(days))
                } else {
                    Err(invalid("SUPPLYREG_RETENTION_DAYS", days.to_string()))
                }
            })
            .transpose()?
            .unwrap_or(defaults.retention_window);

        Ok(Self {
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            producer_id: get("SUPPLYREG_PRODUCER_ID").unwrap_or(defaults.producer_id),
            dispatch_interval: positive_secs(&get, "SUPPLYREG_DISPATCH_INTERVAL_SECS", defaults.dispatch_interval)?,
            retention_interval: positive_secs(&get, "SUPPLYREG_RETENTION_INTERVAL_SECS", defaults.retention_interval)?,
            retention_window: retention_days,
            push_timeout: positive_secs(&get, "SUPPLYREG_PUSH_TIMEOUT_SECS", defaults.push_timeout)?,
            retry: RetryPolicy::exponential(max_attempts, retry_base, retry_max),
            cache_refresh_interval: positive_secs(
                &get,
                "SUPPLYREG_CACHE_REFRESH_SECS",
                defaults.cache_refresh_interval,
            )?,
            bind_addr: get("SUPPLYREG_BIND_ADDR").unwrap_or(defaults.bind_addr),
            is_leader: parse_bool(&get, "SUPPLYREG_IS_LEADER")?.unwrap_or(defaults.is_leader),
        })
    }
}

fn invalid(key: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid { key, value }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| invalid(key, raw)),
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(parse::<u64>(get, key)?.map(Duration::from_secs).unwrap_or(default))
}

fn positive_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let value = secs(get, key, default)?;
    if value.is_zero() {
        return Err(invalid(key, "0".to_string()));
    }
    Ok(value)
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(invalid(key, raw)),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        RelayConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg, RelayConfig::default());
        assert_eq!(cfg.dispatch_interval, Duration::from_secs(15));
        assert_eq!(cfg.retention_window, chrono::Duration::days(30));
        assert_eq!(cfg.retry.max_attempts, Some(20));
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/supplyreg"),
            ("SUPPLYREG_PRODUCER_ID", "registry-eu"),
            ("SUPPLYREG_DISPATCH_INTERVAL_SECS", "5"),
            ("SUPPLYREG_RETENTION_DAYS", "7"),
            ("SUPPLYREG_RETRY_MAX_ATTEMPTS", "0"),
            ("SUPPLYREG_IS_LEADER", "false"),
        ])
        .unwrap();

        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/supplyreg"));
        assert_eq!(cfg.producer_id, "registry-eu");
        assert_eq!(cfg.dispatch_interval, Duration::from_secs(5));
        assert_eq!(cfg.retention_window, chrono::Duration::days(7));
        assert_eq!(cfg.retry.max_attempts, None);
        assert!(!cfg.is_leader);
    }

    #[test]
    fn malformed_values_name_the_key() {
        let err = from_pairs(&[("SUPPLYREG_PUSH_TIMEOUT_SECS", "ten")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "SUPPLYREG_PUSH_TIMEOUT_SECS",
                value: "ten".to_string()
            }
        );

        assert!(from_pairs(&[("SUPPLYREG_DISPATCH_INTERVAL_SECS", "0")]).is_err());
        assert!(from_pairs(&[("SUPPLYREG_RETENTION_DAYS", "-1")]).is_err());
        assert!(from_pairs(&[("SUPPLYREG_IS_LEADER", "maybe")]).is_err());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = from_pairs(&[("REDIS_URL", "  "), ("SUPPLYREG_BIND_ADDR", "")]).unwrap();
        assert!(cfg.redis_url.is_none());
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
    }
}
