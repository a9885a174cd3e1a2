//! Structured logging setup.
//!
//! # Example
//!
//! ```rust,ignore
//! use kaos_snake::telemetry::{init_tracing, TracingConfig};
//!
//! // Compact console output, `RUST_LOG` wins over the configured level
//! init_tracing(TracingConfig::default());
//!
//! // JSON lines for log aggregation
//! init_tracing(TracingConfig::new("kaos-snake").with_json());
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing configuration.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Service name, attached to the startup log line.
    pub service_name: String,
    /// Log level filter (e.g., "info", "debug", "kaos_snake=debug,tower=warn").
    pub log_level: String,
    /// Output logs as JSON (useful for log aggregation).
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "kaos-snake".into(),
            log_level: "info".into(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json_output = true;
        self
    }

    /// `KAOS_SNAKE_LOG_JSON=1` switches to JSON output.
    pub fn from_env(mut self) -> Self {
        if std::env::var("KAOS_SNAKE_LOG_JSON").is_ok_and(|v| v == "1" || v == "true") {
            self.json_output = true;
        }
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

/// Install the global subscriber.
///
/// Call this once at application startup.
pub fn init_tracing(config: TracingConfig) {
    let registry = tracing_subscriber::registry().with(config.filter());

    if config.json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        registry.with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact();
        registry.with(fmt_layer).init();
    }

    tracing::info!(service = %config.service_name, json = config.json_output, "tracing initialised");
}
