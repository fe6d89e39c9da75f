use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Initialize structured logging for the orchestration core.
///
/// `RUST_LOG` wins over the configured level when set. Returns an error if a
/// global subscriber is already installed.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }

    tracing::info!(
        log_level = %config.log_level,
        json = config.json_logs,
        "cmate telemetry initialized with structured logging"
    );
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one workflow run on the worker
pub fn create_workflow_span(workflow_id: Uuid, kind: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow",
        workflow.id = %workflow_id,
        workflow.kind = kind,
        correlation.id = correlation_id,
        otel.kind = "internal"
    )
}

/// Span wrapping one event fan-out on a tier consumer
pub fn create_delivery_span(event_id: Uuid, event_type: &str, tier: &str) -> tracing::Span {
    tracing::debug_span!(
        "event_delivery",
        event.id = %event_id,
        event.kind = event_type,
        event.tier = tier,
        otel.kind = "consumer"
    )
}

/// Shutdown telemetry gracefully
pub fn shutdown_telemetry() {
    tracing::info!("cmate telemetry shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_are_unique_uuids() {
        let a = generate_correlation_id();
        let b = generate_correlation_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_init_telemetry_installs_once() {
        let config = ObservabilityConfig {
            log_level: "debug".to_string(),
            json_logs: false,
        };
        assert!(init_telemetry(&config).is_ok());
        assert!(init_telemetry(&config).is_err());
        shutdown_telemetry();
    }
}
