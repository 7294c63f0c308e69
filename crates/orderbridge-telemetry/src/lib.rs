mod metrics;

pub use metrics::{names, HistogramSummary, MetricsRecorder, MetricsSnapshot};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "orderbridge_salesforce" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// One JSON object per line instead of the human formatter.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Filter directives in `EnvFilter` syntax.
    pub fn directives(&self) -> String {
        let mut directives = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        directives
    }
}

/// Holds the process-wide metrics recorder.
pub struct TelemetryGuard {
    metrics: Arc<MetricsRecorder>,
    installed: bool,
}

impl TelemetryGuard {
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        self.metrics.clone()
    }

    /// False when another global subscriber was already in place.
    pub fn subscriber_installed(&self) -> bool {
        self.installed
    }
}

/// Initialize logging and metrics. Safe to call more than once; only the first
/// call installs the global subscriber.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();

    TelemetryGuard {
        metrics: Arc::new(MetricsRecorder::new()),
        installed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("orderbridge_engine".into(), Level::DEBUG),
                ("orderbridge_salesforce".into(), Level::TRACE),
            ],
            json: true,
        };
        assert_eq!(
            config.directives(),
            "warn,orderbridge_engine=debug,orderbridge_salesforce=trace"
        );
    }

    #[test]
    fn second_init_does_not_panic() {
        let first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig::default());
        assert!(!(first.subscriber_installed() && second.subscriber_installed()));
        second.metrics().counter_inc(names::EVENTS_RECEIVED, &[], 1);
        assert_eq!(second.metrics().counter_get(names::EVENTS_RECEIVED, &[]), 1);
    }
}
