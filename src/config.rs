//! Substrate configuration.
//!
//! Loaded from an optional YAML file, then overridden by `SISAS_*`
//! environment variables. Durations are written in milliseconds.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::bus::BusCategory;
use crate::error::ConfigError;

/// Environment variable naming the config file used by the binary.
pub const CONFIG_PATH_ENV: &str = "SISAS_CONFIG";

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Per-bus delivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub max_queue_size: usize,
    pub max_history_size: usize,
    /// Failures inside `circuit_breaker_window` that open a consumer's circuit.
    pub circuit_breaker_error_threshold: u32,
    #[serde(with = "duration_ms", rename = "circuit_breaker_window_ms")]
    pub circuit_breaker_window: Duration,
    #[serde(with = "duration_ms", rename = "circuit_breaker_cooldown_ms")]
    pub circuit_breaker_cooldown: Duration,
    /// Retries after the first failed attempt. Zero means dead-letter on first failure.
    pub retry_max_attempts: u32,
    #[serde(with = "duration_ms", rename = "retry_backoff_base_ms")]
    pub retry_backoff_base: Duration,
    #[serde(with = "duration_ms", rename = "retry_backoff_max_ms")]
    pub retry_backoff_max: Duration,
    #[serde(with = "duration_ms", rename = "message_ttl_ms")]
    pub message_ttl: Duration,
    #[serde(with = "duration_ms", rename = "callback_timeout_ms")]
    pub callback_timeout: Duration,
    /// Fraction of `max_queue_size` at which back-pressure engages.
    pub high_water_ratio: f64,
    /// Fraction of `max_queue_size` below which back-pressure releases.
    pub low_water_ratio: f64,
    /// Reject signals whose content hash was already published on this bus.
    pub deduplicate: bool,
    pub max_concurrent_deliveries: usize,
    /// Directory receiving `<bus>-history.jsonl` overflow archives. In memory when unset.
    pub history_archive_dir: Option<PathBuf>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            max_history_size: 1_000,
            circuit_breaker_error_threshold: 5,
            circuit_breaker_window: Duration::from_secs(60),
            circuit_breaker_cooldown: Duration::from_secs(30),
            retry_max_attempts: 3,
            retry_backoff_base: Duration::from_millis(100),
            retry_backoff_max: Duration::from_secs(5),
            message_ttl: Duration::from_secs(300),
            callback_timeout: Duration::from_secs(5),
            high_water_ratio: 0.9,
            low_water_ratio: 0.5,
            deduplicate: false,
            max_concurrent_deliveries: 64,
            history_archive_dir: None,
        }
    }
}

impl BusConfig {
    /// Queue depth at which back-pressure engages. Always within `1..=max_queue_size`.
    pub fn high_water_mark(&self) -> usize {
        let mark = (self.max_queue_size as f64 * self.high_water_ratio).ceil() as usize;
        mark.clamp(1, self.max_queue_size.max(1))
    }

    /// Queue depth below which back-pressure releases. Never above the high-water mark.
    pub fn low_water_mark(&self) -> usize {
        let mark = (self.max_queue_size as f64 * self.low_water_ratio).floor() as usize;
        mark.min(self.high_water_mark())
    }

    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff_base
            .checked_mul(factor)
            .unwrap_or(self.retry_backoff_max)
            .min(self.retry_backoff_max)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(invalid("max_queue_size", "must be greater than zero"));
        }
        if !(self.high_water_ratio > 0.0 && self.high_water_ratio <= 1.0) {
            return Err(invalid("high_water_ratio", "must be in (0, 1]"));
        }
        if !(self.low_water_ratio >= 0.0 && self.low_water_ratio <= self.high_water_ratio) {
            return Err(invalid("low_water_ratio", "must be in [0, high_water_ratio]"));
        }
        if self.circuit_breaker_error_threshold == 0 {
            return Err(invalid("circuit_breaker_error_threshold", "must be at least 1"));
        }
        if self.max_concurrent_deliveries == 0 {
            return Err(invalid("max_concurrent_deliveries", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// JSONL journal replayed on open and appended on every mutation.
    pub journal_path: Option<PathBuf>,
    /// JSONL cold store for archived events. In memory when unset.
    pub archive_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub filter: String,
    pub json: bool,
    /// Directory for a daily-rolling `sisas.log`.
    pub log_dir: Option<PathBuf>,
    /// OTLP service name; only honoured with the `otel` feature.
    pub service_name: String,
    pub otlp: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "sisas=info".to_string(),
            json: false,
            log_dir: None,
            service_name: "sisas".to_string(),
            otlp: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    pub bus: BusConfig,
    /// Per-category overrides; categories not listed use `bus`.
    pub bus_overrides: HashMap<BusCategory, BusConfig>,
    /// Categories that get their own bus. Unset means every category;
    /// the others are carried by the universal bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedicated_buses: Option<Vec<BusCategory>>,
    pub event_log: EventLogConfig,
    pub logging: LoggingConfig,
}

impl SubstrateConfig {
    /// Defaults, then the YAML file (if it exists), then `SISAS_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                info!("Loading substrate config from {:?}", p);
                Self::from_yaml(&std::fs::read_to_string(p)?)?
            }
            Some(p) => {
                debug!("Config file {:?} not found, using defaults", p);
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn bus_config(&self, category: BusCategory) -> &BusConfig {
        self.bus_overrides.get(&category).unwrap_or(&self.bus)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bus.validate()?;
        for (category, cfg) in &self.bus_overrides {
            cfg.validate().map_err(|e| match e {
                ConfigError::Invalid { key, reason } => ConfigError::Invalid {
                    key: format!("bus_overrides.{}.{}", category, key),
                    reason,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let bus = &mut self.bus;
        if let Some(v) = lookup("SISAS_MAX_QUEUE_SIZE") {
            bus.max_queue_size = parse("SISAS_MAX_QUEUE_SIZE", &v)?;
        }
        if let Some(v) = lookup("SISAS_MAX_HISTORY_SIZE") {
            bus.max_history_size = parse("SISAS_MAX_HISTORY_SIZE", &v)?;
        }
        if let Some(v) = lookup("SISAS_CIRCUIT_BREAKER_ERROR_THRESHOLD") {
            bus.circuit_breaker_error_threshold =
                parse("SISAS_CIRCUIT_BREAKER_ERROR_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("SISAS_CIRCUIT_BREAKER_COOLDOWN_MS") {
            bus.circuit_breaker_cooldown =
                Duration::from_millis(parse("SISAS_CIRCUIT_BREAKER_COOLDOWN_MS", &v)?);
        }
        if let Some(v) = lookup("SISAS_RETRY_MAX_ATTEMPTS") {
            bus.retry_max_attempts = parse("SISAS_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("SISAS_RETRY_BACKOFF_BASE_MS") {
            bus.retry_backoff_base =
                Duration::from_millis(parse("SISAS_RETRY_BACKOFF_BASE_MS", &v)?);
        }
        if let Some(v) = lookup("SISAS_MESSAGE_TTL_MS") {
            bus.message_ttl = Duration::from_millis(parse("SISAS_MESSAGE_TTL_MS", &v)?);
        }
        if let Some(v) = lookup("SISAS_EVENT_JOURNAL") {
            self.event_log.journal_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SISAS_LOG_FILTER") {
            self.logging.filter = v;
        }
        if let Some(v) = lookup("SISAS_LOG_JSON") {
            self.logging.json = matches!(v.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| invalid(key, &e.to_string()))
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
