use std::env;

use stream_core::{ConfigError, StreamConfig, config::optional_trimmed_env};

/// Runtime configuration for stream-tail.
#[derive(Debug, Clone)]
pub struct TailConfig {
    pub stream: StreamConfig,
    /// Pre-computed `Authorization` header value.
    pub authorization: String,
}

impl TailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let authorization = optional_trimmed_env("STREAM_AUTHORIZATION", &mut lookup).ok_or(
            ConfigError::Missing {
                key: "STREAM_AUTHORIZATION",
            },
        )?;
        let stream = StreamConfig::from_lookup(lookup)?;

        Ok(Self {
            stream,
            authorization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<TailConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        TailConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn parses_authorization_and_stream_config() {
        let cfg = config_from_pairs(&[
            ("STREAM_HOST", "stream.example.com"),
            ("STREAM_AUTHORIZATION", "  Bearer abc  "),
        ])
        .expect("config should parse");

        assert_eq!(cfg.authorization, "Bearer abc");
        assert_eq!(cfg.stream.host, "stream.example.com");
    }

    #[test]
    fn authorization_is_required() {
        let err = config_from_pairs(&[("STREAM_HOST", "stream.example.com")])
            .expect_err("missing authorization must fail");
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "STREAM_AUTHORIZATION"
            }
        );
    }
}
