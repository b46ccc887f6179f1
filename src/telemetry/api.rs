use std::sync::Arc;

use crate::telemetry::config::{BackendOptions, TelemetryBackend, TelemetryConfig};
use crate::telemetry::context::{self, ActiveTelemetry, TelemetryContext};
use crate::telemetry::error::TelemetryError;
use crate::telemetry::exporter::Exporter;
use crate::telemetry::trace::init_subscriber;

/// Trait for telemetry providers (console, file, GCP, etc.)
pub trait TelemetryProvider: Send + Sync {
    /// Acquire the backend's resource and build its exporter
    fn build_exporter(
        &self,
        config: &TelemetryConfig,
    ) -> impl std::future::Future<Output = Result<Exporter, TelemetryError>> + Send;
}

/// Initialize telemetry with a specific provider.
///
/// Fails with [`TelemetryError::AlreadyConfigured`] while another context is
/// active; nothing is acquired in that case.
pub async fn init_with_provider<P: TelemetryProvider>(
    provider: &P,
    config: &TelemetryConfig,
) -> Result<TelemetryContext, TelemetryError> {
    context::ensure_unconfigured()?;
    init_subscriber(config)?;

    let exporter = provider.build_exporter(config).await?;
    let active = Arc::new(ActiveTelemetry::new(exporter));

    if let Err(e) = context::activate(active.clone()) {
        let _ = active.exporter.shutdown(config.shutdown_timeout).await;
        return Err(e);
    }

    Ok(TelemetryContext::new(active, config.shutdown_timeout))
}

/// Initialize telemetry with config (uses backend from config)
pub async fn init_with_config(config: &TelemetryConfig) -> Result<TelemetryContext, TelemetryError> {
    match &config.backend {
        TelemetryBackend::Console => {
            let provider = crate::telemetry::default::DefaultProvider;
            init_with_provider(&provider, config).await
        }
        TelemetryBackend::Jsonl(jsonl_config) => {
            let provider = crate::telemetry::jsonl::JsonlProvider::new(jsonl_config.clone());
            init_with_provider(&provider, config).await
        }
        #[cfg(feature = "telemetry-gcp")]
        TelemetryBackend::CloudLogging(gcp_config) => {
            let provider = crate::telemetry::gcp::GcpProvider::new(gcp_config.clone());
            init_with_provider(&provider, config).await
        }
        TelemetryBackend::Disabled => {
            let provider = crate::telemetry::default::DisabledProvider;
            init_with_provider(&provider, config).await
        }
    }
}

/// Select a backend by token and configure it with default service settings
pub async fn configure(
    backend_token: &str,
    options: &BackendOptions,
) -> Result<TelemetryContext, TelemetryError> {
    let backend = TelemetryBackend::from_token(backend_token, options)?;
    let config = TelemetryConfig::builder().backend(backend).build();
    init_with_config(&config).await
}

/// Initialize telemetry from environment
pub async fn init() -> Result<TelemetryContext, TelemetryError> {
    let config = TelemetryConfig::from_env()?;
    init_with_config(&config).await
}
