//! Immutable stream configuration, optionally parsed from `STREAM_*` variables.

use std::{env, error::Error, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{backoff::BackoffConfig, framer::DEFAULT_MAX_RECORD_BYTES, request::RequestMethod};

const DEFAULT_PATH: &str = "/";
const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 90;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 10;

/// URL scheme; `Https` upgrades the session to TLS before the request is sent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Https)
    }
}

/// Everything the controller needs to open, sign and supervise a stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub method: RequestMethod,
    pub path: String,
    /// Filter parameters: appended to the path for GET, sent as body otherwise.
    pub query: String,
    /// Explicit body for non-GET methods.
    pub body: Option<String>,
    pub content_type: String,
    pub user_agent: Option<String>,
    pub backoff: BackoffConfig,
    /// Silence tolerated before a session is presumed dead.
    pub idle_timeout: Duration,
    /// Period of the idle health check.
    pub health_check_interval: Duration,
    /// Longest line or unclosed record the framer buffers before dropping it.
    pub max_record_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: Scheme::Https.default_port(),
            scheme: Scheme::Https,
            method: RequestMethod::Get,
            path: DEFAULT_PATH.to_owned(),
            query: String::new(),
            body: None,
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
            user_agent: None,
            backoff: BackoffConfig::default(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

impl StreamConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let host = optional_trimmed_env("STREAM_HOST", &mut lookup)
            .ok_or(ConfigError::Missing { key: "STREAM_HOST" })?;

        let scheme = match optional_trimmed_env("STREAM_SCHEME", &mut lookup) {
            None => Scheme::Https,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "https" => Scheme::Https,
                "http" => Scheme::Http,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "STREAM_SCHEME",
                        value,
                        reason: "expected 'http' or 'https'".to_owned(),
                    });
                }
            },
        };

        let port = parse_optional_u16("STREAM_PORT", &mut lookup)?.unwrap_or(scheme.default_port());

        let method = match optional_trimmed_env("STREAM_METHOD", &mut lookup) {
            None => RequestMethod::Get,
            Some(value) => value
                .parse::<RequestMethod>()
                .map_err(|reason| ConfigError::InvalidValue {
                    key: "STREAM_METHOD",
                    value,
                    reason,
                })?,
        };

        let path = optional_trimmed_env("STREAM_PATH", &mut lookup)
            .unwrap_or_else(|| DEFAULT_PATH.to_owned());
        let query = optional_trimmed_env("STREAM_QUERY", &mut lookup).unwrap_or_default();
        let body = optional_trimmed_env("STREAM_BODY", &mut lookup);
        let content_type = optional_trimmed_env("STREAM_CONTENT_TYPE", &mut lookup)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());
        let user_agent = optional_trimmed_env("STREAM_USER_AGENT", &mut lookup);

        let idle_timeout = Duration::from_secs(parse_optional_u64_with_default(
            "STREAM_IDLE_TIMEOUT_SECS",
            DEFAULT_IDLE_TIMEOUT_SECS,
            &mut lookup,
        )?);
        let health_check_interval = Duration::from_secs(parse_optional_u64_with_default(
            "STREAM_HEALTH_CHECK_INTERVAL_SECS",
            DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            &mut lookup,
        )?);
        let max_record_bytes = parse_optional_u64_with_default(
            "STREAM_MAX_RECORD_BYTES",
            DEFAULT_MAX_RECORD_BYTES as u64,
            &mut lookup,
        )?;
        let max_record_bytes =
            usize::try_from(max_record_bytes).map_err(|err| ConfigError::InvalidValue {
                key: "STREAM_MAX_RECORD_BYTES",
                value: max_record_bytes.to_string(),
                reason: err.to_string(),
            })?;

        let config = Self {
            host,
            port,
            scheme,
            method,
            path,
            query,
            body,
            content_type,
            user_agent,
            backoff: BackoffConfig::default(),
            idle_timeout,
            health_check_interval,
            max_record_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_HOST",
                value: self.host.clone(),
                reason: "must not be empty".to_owned(),
            });
        }
        reject_control_chars("STREAM_HOST", &self.host)?;
        reject_control_chars("STREAM_PATH", &self.path)?;
        reject_control_chars("STREAM_QUERY", &self.query)?;
        reject_control_chars("STREAM_CONTENT_TYPE", &self.content_type)?;
        if let Some(user_agent) = &self.user_agent {
            reject_control_chars("STREAM_USER_AGENT", user_agent)?;
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_PORT",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_PATH",
                value: self.path.clone(),
                reason: "must start with '/'".to_owned(),
            });
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_IDLE_TIMEOUT_SECS",
                value: "0".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_HEALTH_CHECK_INTERVAL_SECS",
                value: "0".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.max_record_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_MAX_RECORD_BYTES",
                value: "0".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}

/// Values copied into the request head must not be able to end a header line.
fn reject_control_chars(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.chars().any(char::is_control) {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.escape_debug().to_string(),
            reason: "must not contain control characters".to_owned(),
        });
    }
    Ok(())
}

/// Errors produced while parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    Missing { key: &'static str },
    /// A variable could not be parsed or failed validation.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "missing required {key}"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Trimmed, non-empty value for `key`.
pub fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u16<F>(key: &'static str, lookup: &mut F) -> Result<Option<u16>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u16>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
