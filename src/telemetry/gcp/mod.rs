//! Google Cloud Logging telemetry provider.
//!
//! Records are queued in memory and written in batches through the Cloud
//! Logging `entries:write` REST method, authenticated with Application Default
//! Credentials.
//!
//! # Features
//!
//! - Automatic authentication via Application Default Credentials (ADC)
//! - Trace correlation (`trace`, `spanId`) on every entry
//! - Semantic-convention labels for the GCP platform (Cloud Run, Cloud Functions, App Engine, etc.)
//! - Bounded retry, then drop; a failing endpoint never reaches the caller
//!
//! # Example
//!
//! ```rust,ignore
//! use telemetry::gcp::{GcpConfig, GcpPlatform};
//!
//! let config = GcpConfig::new("my-project-id")
//!     .with_platform(GcpPlatform::CloudFunctions)
//!     .with_environment("staging");
//!
//! // From environment variables
//! let config = GcpConfig::from_env().expect("GCP config from env");
//! ```
//!
//! # Environment Variables
//!
//! - `GOOGLE_CLOUD_PROJECT` / `GCLOUD_PROJECT` / `GCP_PROJECT`: Project ID
//! - `CLOUD_LOGGING_ENDPOINT`: Custom Logging API endpoint
//! - `CLOUD_LOGGING_LOG_NAME`: Log id (defaults to the service name)
//! - `ENVIRONMENT`: Deployment environment label
//! - `K_SERVICE`, `FUNCTION_NAME`, `GAE_SERVICE`: Platform auto-detection

mod auth;
pub mod config;
pub mod exporter;
pub mod resource;

use crate::telemetry::api::TelemetryProvider;
use crate::telemetry::config::TelemetryConfig;
use crate::telemetry::error::TelemetryError;
use crate::telemetry::exporter::Exporter;

pub use config::{BatchConfig, GcpConfig, GcpCredentials, GcpPlatform};
pub use exporter::{CloudLoggingExporter, ExportStats};
pub use resource::GcpResourceBuilder;

/// Cloud Logging telemetry provider.
pub struct GcpProvider {
    config: GcpConfig,
}

impl GcpProvider {
    /// Create a new GCP provider with the given configuration.
    pub fn new(config: GcpConfig) -> Self {
        Self { config }
    }
}

impl TelemetryProvider for GcpProvider {
    async fn build_exporter(&self, config: &TelemetryConfig) -> Result<Exporter, TelemetryError> {
        let exporter = CloudLoggingExporter::build(&self.config, config).await?;
        Ok(Exporter::CloudLogging(exporter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::config::BackendKind;
    use std::time::Duration;

    #[tokio::test]
    async fn gcp_provider_with_anonymous_credentials_builds() {
        let provider = GcpProvider::new(
            GcpConfig::new("proj")
                .with_endpoint("http://127.0.0.1:1")
                .with_credentials(GcpCredentials::Anonymous),
        );

        let exporter = provider
            .build_exporter(&TelemetryConfig::new("svc", "1.0"))
            .await
            .unwrap();

        assert_eq!(exporter.kind(), BackendKind::CloudLogging);
        exporter.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
