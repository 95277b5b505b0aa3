//! Pool-wide settings
//!
//! The idle policy decides what happens to a connection whose reference count
//! drops to zero. It is explicit configuration because both "keep it warm" and
//! "close it now" are reasonable for different workloads.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default idle timeout (5 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

const ENV_CONNECT_TIMEOUT: &str = "MCPSHARE_CONNECT_TIMEOUT_SECS";
const ENV_IDLE_POLICY: &str = "MCPSHARE_IDLE_POLICY";

/// What to do with a READY connection once nobody holds it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Keep the session open until pool teardown or server removal
    #[default]
    KeepAlive,
    /// Close the session as soon as the last reference is released
    CloseWhenIdle,
    /// Keep the session open, but let `cleanup_idle` reap it once it has been
    /// unreferenced for longer than the timeout
    IdleTimeout(#[serde(with = "millis")] Duration),
}

impl FromStr for IdlePolicy {
    type Err = ConfigError;

    /// Accepts `keep_alive`, `close_when_idle`, `idle_timeout` and `idle_timeout:<secs>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidSetting {
            key: ENV_IDLE_POLICY.to_string(),
            value: s.to_string(),
        };
        let value = s.trim().to_ascii_lowercase();
        match value.split_once(':') {
            None => match value.as_str() {
                "keep_alive" | "keepalive" => Ok(IdlePolicy::KeepAlive),
                "close_when_idle" | "eager" => Ok(IdlePolicy::CloseWhenIdle),
                "idle_timeout" => Ok(IdlePolicy::IdleTimeout(DEFAULT_IDLE_TIMEOUT)),
                _ => Err(invalid()),
            },
            Some(("idle_timeout", secs)) => secs
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(|secs| IdlePolicy::IdleTimeout(Duration::from_secs(secs)))
                .ok_or_else(invalid),
            Some(_) => Err(invalid()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Used for servers whose config does not set its own timeout
    #[serde(
        serialize_with = "millis::serialize",
        deserialize_with = "millis::deserialize_nonzero",
        rename = "default_connect_timeout_ms"
    )]
    pub default_connect_timeout: Duration,
    pub idle_policy: IdlePolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            default_connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_policy: IdlePolicy::KeepAlive,
        }
    }
}

impl PoolSettings {
    /// Fails on a zero timeout, which would expire every connect on its first poll
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::InvalidSetting {
                key: "default_connect_timeout".to_string(),
                value: format!("{:?}", timeout),
            });
        }
        self.default_connect_timeout = timeout;
        Ok(self)
    }

    pub fn with_idle_policy(mut self, policy: IdlePolicy) -> Self {
        self.idle_policy = policy;
        self
    }

    /// Defaults overridden by `MCPSHARE_CONNECT_TIMEOUT_SECS` and `MCPSHARE_IDLE_POLICY`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(raw) = lookup(ENV_CONNECT_TIMEOUT) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidSetting {
                    key: ENV_CONNECT_TIMEOUT.to_string(),
                    value: raw.clone(),
                })?;
            settings.default_connect_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup(ENV_IDLE_POLICY) {
            settings.idle_policy = raw.parse()?;
        }

        Ok(settings)
    }
}

/// Serialize a `Duration` as whole milliseconds
mod millis {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::error::ConfigError;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub fn deserialize_nonzero<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        match u64::deserialize(deserializer)? {
            0 => Err(D::Error::custom(ConfigError::InvalidSetting {
                key: "default_connect_timeout_ms".to_string(),
                value: "0".to_string(),
            })),
            ms => Ok(Duration::from_millis(ms)),
        }
    }
}
