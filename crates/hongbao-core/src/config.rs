//! Configuration for the red-envelope engine.
//!
//! # Configuration Sources
//!
//! - Environment variables (prefixed with `HONGBAO_`)
//! - JSON configuration files
//! - Programmatic defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use hongbao_core::config::HongbaoConfig;
//!
//! let config = HongbaoConfig::builder()
//!     .ttl_ms(3_600_000)
//!     .allow_targeted(false)
//!     .build()?;
//! ```

use crate::{HongbaoError, Result};
use serde::{Deserialize, Serialize};

/// Hard upper bound on slices per envelope.
pub const MAX_SLICES_LIMIT: u32 = 100;

/// Upper bound on the claim/storage retry budget.
pub const MAX_RETRY_BUDGET: u32 = 32;

pub const DEFAULT_MESSAGE: &str = "Best wishes, good fortune!";

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HongbaoConfig {
    pub envelope: EnvelopeConfig,
    pub logging: LoggingConfig,
}

impl HongbaoConfig {
    pub fn builder() -> HongbaoConfigBuilder {
        HongbaoConfigBuilder::default()
    }

    /// Load configuration from environment variables on top of the defaults.
    ///
    /// - `HONGBAO_ENABLED` - master switch (true/false)
    /// - `HONGBAO_ALLOW_TARGETED` - allow targeted envelopes (true/false)
    /// - `HONGBAO_TTL_MS` - envelope lifetime in milliseconds
    /// - `HONGBAO_RETRY_BUDGET` - bounded retries for contended claims
    /// - `HONGBAO_REFUND_ON_EXPIRY` - refund unclaimed points to the funder (true/false)
    /// - `HONGBAO_LOG_LEVEL` - logging level (trace, debug, info, warn, error)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<bool>("HONGBAO_ENABLED")? {
            config.envelope.enabled = v;
        }
        if let Some(v) = env_parse::<bool>("HONGBAO_ALLOW_TARGETED")? {
            config.envelope.allow_targeted = v;
        }
        if let Some(v) = env_parse::<i64>("HONGBAO_TTL_MS")? {
            config.envelope.ttl_ms = v;
        }
        if let Some(v) = env_parse::<u32>("HONGBAO_RETRY_BUDGET")? {
            config.envelope.retry_budget = v;
        }
        if let Some(v) = env_parse::<bool>("HONGBAO_REFUND_ON_EXPIRY")? {
            config.envelope.refund_on_expiry = v;
        }
        if let Ok(level) = std::env::var("HONGBAO_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| HongbaoError::ConfigError(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let env = &self.envelope;

        if env.ttl_ms <= 0 {
            return Err(HongbaoError::ConfigError(
                "ttl_ms must be greater than 0".into(),
            ));
        }

        if env.max_slices == 0 || env.max_slices > MAX_SLICES_LIMIT {
            return Err(HongbaoError::ConfigError(format!(
                "max_slices must be between 1 and {MAX_SLICES_LIMIT}"
            )));
        }

        if env.retry_budget == 0 || env.retry_budget > MAX_RETRY_BUDGET {
            return Err(HongbaoError::ConfigError(format!(
                "retry_budget must be between 1 and {MAX_RETRY_BUDGET}"
            )));
        }

        if env.sweep_batch_limit == 0 {
            return Err(HongbaoError::ConfigError(
                "sweep_batch_limit must be greater than 0".into(),
            ));
        }

        if env.default_message.trim().is_empty() {
            return Err(HongbaoError::ConfigError(
                "default_message must not be empty".into(),
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(HongbaoError::ConfigError(format!(
                "unknown log level '{other}'"
            ))),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| HongbaoError::ConfigError(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Envelope policy knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Master switch for envelope creation.
    pub enabled: bool,

    /// Whether targeted (single-recipient) envelopes may be created.
    pub allow_targeted: bool,

    /// Lifetime from creation to expiry.
    pub ttl_ms: i64,

    /// Maximum slices per envelope (at most 100).
    pub max_slices: u32,

    /// Message used when the funder leaves it empty.
    pub default_message: String,

    /// Attempts for contended pool updates and transient storage/ledger failures.
    pub retry_budget: u32,

    /// Return unclaimed points to the funder when an envelope expires.
    pub refund_on_expiry: bool,

    /// Maximum envelopes expired per sweep call.
    pub sweep_batch_limit: usize,

    /// Seed for the split RNG. `None` seeds from OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_targeted: true,
            ttl_ms: 86_400_000, // 24 hours
            max_slices: MAX_SLICES_LIMIT,
            default_message: DEFAULT_MESSAGE.into(),
            retry_budget: 5,
            refund_on_expiry: true,
            sweep_batch_limit: 500,
            rng_seed: None,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Emit JSON-formatted log lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Builder for [`HongbaoConfig`].
#[derive(Default)]
pub struct HongbaoConfigBuilder {
    config: HongbaoConfig,
}

impl HongbaoConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.envelope.enabled = enabled;
        self
    }

    pub fn allow_targeted(mut self, allow: bool) -> Self {
        self.config.envelope.allow_targeted = allow;
        self
    }

    pub fn ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.config.envelope.ttl_ms = ttl_ms;
        self
    }

    pub fn max_slices(mut self, max: u32) -> Self {
        self.config.envelope.max_slices = max;
        self
    }

    pub fn default_message(mut self, message: impl Into<String>) -> Self {
        self.config.envelope.default_message = message.into();
        self
    }

    pub fn retry_budget(mut self, budget: u32) -> Self {
        self.config.envelope.retry_budget = budget;
        self
    }

    pub fn refund_on_expiry(mut self, refund: bool) -> Self {
        self.config.envelope.refund_on_expiry = refund;
        self
    }

    pub fn sweep_batch_limit(mut self, limit: usize) -> Self {
        self.config.envelope.sweep_batch_limit = limit;
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.config.envelope.rng_seed = Some(seed);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Result<HongbaoConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = HongbaoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.envelope.ttl_ms, 24 * 60 * 60 * 1000);
        assert_eq!(config.envelope.max_slices, 100);
    }

    #[test]
    fn builder_validates() {
        assert!(HongbaoConfig::builder().max_slices(0).build().is_err());
        assert!(HongbaoConfig::builder().max_slices(101).build().is_err());
        assert!(HongbaoConfig::builder().retry_budget(0).build().is_err());
        assert!(HongbaoConfig::builder().ttl_ms(0).build().is_err());
        assert!(HongbaoConfig::builder().log_level("loud").build().is_err());

        let config = HongbaoConfig::builder()
            .allow_targeted(false)
            .rng_seed(7)
            .build()
            .unwrap();
        assert!(!config.envelope.allow_targeted);
        assert_eq!(config.envelope.rng_seed, Some(7));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config =
            HongbaoConfig::from_json(r#"{"envelope": {"enabled": false, "retry_budget": 3}}"#)
                .unwrap();
        assert!(!config.envelope.enabled);
        assert_eq!(config.envelope.retry_budget, 3);
        assert!(config.envelope.allow_targeted);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn json_rejects_invalid_values() {
        assert!(matches!(
            HongbaoConfig::from_json(r#"{"envelope": {"max_slices": 500}}"#),
            Err(HongbaoError::ConfigError(_))
        ));
        assert!(matches!(
            HongbaoConfig::from_json("not json"),
            Err(HongbaoError::ConfigError(_))
        ));
    }
}
