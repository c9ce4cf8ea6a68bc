//! Application configuration loaded from environment variables.

use std::str::FromStr;

use domain::{EngineConfig, PromotionPolicy};

/// Output format of the tracing fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL URL; unset runs on in-memory stores
/// - `DB_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `PROMOTION_POLICY` — `single` or `drain` (default: `single`)
/// - `RSVP_CAPACITY_CHECK` — require a free seat for RSVP into going (default: `true`)
/// - `PROMOTION_QUEUE_CAPACITY` — promotion channel bound (default: `1024`)
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub promotion_policy: PromotionPolicy,
    pub rsvp_capacity_check: bool,
    pub promotion_queue_capacity: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.db_max_connections),
            promotion_policy: lookup("PROMOTION_POLICY")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.promotion_policy),
            rsvp_capacity_check: lookup("RSVP_CAPACITY_CHECK")
                .and_then(|v| v.trim().to_ascii_lowercase().parse().ok())
                .unwrap_or(defaults.rsvp_capacity_check),
            promotion_queue_capacity: lookup("PROMOTION_QUEUE_CAPACITY")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.promotion_queue_capacity),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the engine policy part of the configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            promotion_policy: self.promotion_policy,
            rsvp_capacity_check: self.rsvp_capacity_check,
            promotion_queue_capacity: self.promotion_queue_capacity,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            db_max_connections: 10,
            promotion_policy: engine.promotion_policy,
            rsvp_capacity_check: engine.rsvp_capacity_check,
            promotion_queue_capacity: engine.promotion_queue_capacity,
        }
    }
}
