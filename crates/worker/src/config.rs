//! Worker configuration loaded from environment variables.

use std::time::Duration;

use saga::PipelineConfig;

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for human output
/// - `CHANNEL_CAPACITY`: capacity of each event queue (default: `64`)
/// - `MAX_COMMAND_RETRIES`: re-runs after a concurrency conflict (default: `3`)
/// - `OUTBOX_POLL_MS`: pause between outbox relay passes (default: `100`)
/// - `INVENTORY_REJECTS`: make every stock reservation fail (default: `false`)
/// - `PAYMENT_DECLINES`: make every charge decline (default: `false`)
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub channel_capacity: usize,
    pub max_command_retries: u32,
    pub outbox_poll_interval: Duration,
    pub inventory_rejects: bool,
    pub payment_declines: bool,
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
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            channel_capacity: lookup("CHANNEL_CAPACITY")
                .and_then(|v| v.parse().ok())
                .filter(|c| *c > 0)
                .unwrap_or(defaults.channel_capacity),
            max_command_retries: lookup("MAX_COMMAND_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_command_retries),
            outbox_poll_interval: lookup("OUTBOX_POLL_MS")
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
            inventory_rejects: lookup("INVENTORY_REJECTS")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.inventory_rejects),
            payment_declines: lookup("PAYMENT_DECLINES")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.payment_declines),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            channel_capacity: self.channel_capacity,
            max_command_retries: self.max_command_retries,
            outbox_poll_interval: self.outbox_poll_interval,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            channel_capacity: pipeline.channel_capacity,
            max_command_retries: pipeline.max_command_retries,
            outbox_poll_interval: pipeline.outbox_poll_interval,
            inventory_rejects: false,
            payment_declines: false,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
