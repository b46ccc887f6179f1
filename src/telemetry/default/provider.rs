use crate::telemetry::api::TelemetryProvider;
use crate::telemetry::config::TelemetryConfig;
use crate::telemetry::default::console::ConsoleExporter;
use crate::telemetry::error::TelemetryError;
use crate::telemetry::exporter::Exporter;

/// Default provider for local development
/// - Writes records to the console in the configured format
/// - Acquires no external resource
pub struct DefaultProvider;

impl TelemetryProvider for DefaultProvider {
    async fn build_exporter(&self, config: &TelemetryConfig) -> Result<Exporter, TelemetryError> {
        Ok(Exporter::Console(ConsoleExporter::new(config.log_format)))
    }
}

/// Provider for the disabled backend: every operation is a no-op
pub struct DisabledProvider;

impl TelemetryProvider for DisabledProvider {
    async fn build_exporter(&self, _config: &TelemetryConfig) -> Result<Exporter, TelemetryError> {
        Ok(Exporter::Disabled)
    }
}
