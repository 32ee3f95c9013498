//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default number of messages per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default pause between batches.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

/// Default GET/POST timeout for unsubscribe endpoints.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single classification call.
pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Listing filter used when none is configured.
pub const DEFAULT_QUERY: &str = "category:promotions";

/// How the binary renders the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidValue {
                key: "SWEEP_OUTPUT".into(),
                message: format!("expected 'text' or 'json', got '{other}'"),
            }),
        }
    }
}

/// Sweep configuration.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Messages per batch. The last batch may be smaller.
    pub batch_size: usize,
    /// Pause after every batch except the last.
    pub cooldown: Duration,
    /// Max classification calls in flight within one batch.
    pub concurrency: usize,
    /// Timeout for each unsubscribe GET/POST.
    pub request_timeout: Duration,
    /// Timeout for each classification call.
    pub classify_timeout: Duration,
    /// Mailbox filter expression used to list candidates.
    pub query: String,
    /// Report rendering for the binary.
    pub output: OutputFormat,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            cooldown: DEFAULT_COOLDOWN,
            concurrency: 8,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            classify_timeout: DEFAULT_CLASSIFY_TIMEOUT,
            query: DEFAULT_QUERY.to_string(),
            output: OutputFormat::Text,
        }
    }
}

impl SweepConfig {
    /// Build config from environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            batch_size: env_parse("SWEEP_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            cooldown: env_parse("SWEEP_COOLDOWN_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cooldown),
            concurrency: env_parse("SWEEP_CONCURRENCY")?.unwrap_or(defaults.concurrency),
            request_timeout: env_parse("SWEEP_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            classify_timeout: env_parse("SWEEP_CLASSIFY_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.classify_timeout),
            query: std::env::var("SWEEP_QUERY").unwrap_or(defaults.query),
            output: env_parse("SWEEP_OUTPUT")?.unwrap_or(defaults.output),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout".into(),
                message: "must be non-zero".into(),
            });
        }
        if self.classify_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "classify_timeout".into(),
                message: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// Classification concurrency, clamped to `1..=batch_size`.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, self.batch_size.max(1))
    }
}

/// Parse an optional environment variable. Unset or empty is `Ok(None)`.
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_constants() {
        let config = SweepConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.cooldown, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.query, "category:promotions");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = SweepConfig {
            batch_size: 0,
            ..SweepConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn zero_request_timeout_rejected() {
        let config = SweepConfig {
            request_timeout: Duration::ZERO,
            ..SweepConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn concurrency_clamped_to_batch_size() {
        let config = SweepConfig {
            batch_size: 4,
            concurrency: 32,
            ..SweepConfig::default()
        };
        assert_eq!(config.effective_concurrency(), 4);

        let config = SweepConfig {
            concurrency: 0,
            ..SweepConfig::default()
        };
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn output_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(" text ".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
