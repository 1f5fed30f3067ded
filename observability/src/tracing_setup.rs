//! Tracing configuration and initialization.
//!
//! Structured logging with span-based context for lifecycle operations and
//! reconciler loops.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging settings taken from the agent's `[log]` config section.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    pub log_level: Level,
    /// One JSON object per line instead of the human-readable format.
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "cluster-agent".to_string(),
            log_level: Level::INFO,
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

    /// Set the level from its name; unknown names keep the current level.
    pub fn with_level_name(mut self, level: &str) -> Self {
        if let Ok(level) = Level::from_str(level.trim()) {
            self.log_level = level;
        }
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json_output = json;
        self
    }

    /// `RUST_LOG` wins over the configured level.
    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| self.default_filter())
    }

    fn default_filter(&self) -> EnvFilter {
        EnvFilter::new(self.log_level.to_string())
    }
}

/// Initialize tracing with the given configuration.
///
/// Call once at startup.
///
/// ```no_run
/// use observability::{init_tracing, TracingConfig};
///
/// init_tracing(TracingConfig::new("cluster-agent").with_level_name("debug"));
/// ```
pub fn init_tracing(config: TracingConfig) {
    let registry = tracing_subscriber::registry().with(config.build_filter());

    if config.json_output {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    tracing::info!(
        service = %config.service_name,
        level = %config.log_level,
        json = config.json_output,
        "Tracing initialized"
    );
}

/// Span wrapping one lifecycle operation's background pipeline.
#[macro_export]
macro_rules! lifecycle_span {
    ($operation:expr, $operation_id:expr) => {
        tracing::info_span!(
            "lifecycle_operation",
            operation = %$operation,
            operation_id = %$operation_id
        )
    };
}

/// Span wrapping one reconciler loop.
#[macro_export]
macro_rules! reconciler_span {
    ($name:expr) => {
        tracing::info_span!("reconciler", name = %$name)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "cluster-agent");
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.json_output);
    }

    #[test]
    fn test_tracing_config_from_log_section() {
        let config = TracingConfig::new("test-agent")
            .with_level_name(" DEBUG ")
            .with_json(true);

        assert_eq!(config.service_name, "test-agent");
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(config.json_output);
        assert_eq!(config.default_filter().to_string(), "debug");
    }

    #[test]
    fn test_unknown_level_name_is_ignored() {
        let config = TracingConfig::default()
            .with_level_name("warn")
            .with_level_name("chatty");
        assert_eq!(config.log_level, Level::WARN);
    }

    #[test]
    fn test_span_macros_build() {
        let _lifecycle = lifecycle_span!("Install", "5b3c");
        let _reconciler = reconciler_span!("cluster-status-reconciler");
    }
}
