use std::collections::BTreeMap;

use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::resource::{
    CLOUD_ACCOUNT_ID, CLOUD_PLATFORM, CLOUD_PROVIDER, CLOUD_REGION, DEPLOYMENT_ENVIRONMENT_NAME,
    FAAS_NAME, FAAS_VERSION,
};

use crate::telemetry::config::TelemetryConfig;
use crate::telemetry::gcp::config::{GcpConfig, GcpPlatform};
use crate::telemetry::resource::{build_resource, resource_labels};

/// GCP cloud provider value (semconv)
pub const CLOUD_PROVIDER_GCP: &str = "gcp";

/// GCP project ID attribute
pub const GCP_PROJECT_ID: &str = "gcp.project_id";

/// Builds the common labels attached to every Cloud Logging entry
pub struct GcpResourceBuilder {
    project_id: String,
    platform: GcpPlatform,
    environment: String,
    region: Option<String>,
    service_id: Option<String>,
    revision: Option<String>,
}

impl GcpResourceBuilder {
    pub fn new(project_id: impl Into<String>, platform: GcpPlatform) -> Self {
        Self {
            project_id: project_id.into(),
            platform,
            environment: crate::telemetry::gcp::config::DEFAULT_ENVIRONMENT.to_string(),
            region: std::env::var("CLOUD_RUN_REGION")
                .or_else(|_| std::env::var("FUNCTION_REGION"))
                .or_else(|_| std::env::var("GAE_REGION"))
                .ok(),
            service_id: std::env::var("K_SERVICE")
                .or_else(|_| std::env::var("FUNCTION_NAME"))
                .or_else(|_| std::env::var("GAE_SERVICE"))
                .ok(),
            revision: std::env::var("K_REVISION")
                .or_else(|_| std::env::var("GAE_VERSION"))
                .ok(),
        }
    }

    pub fn from_config(gcp_config: &GcpConfig) -> Self {
        Self::new(gcp_config.project_id.clone(), gcp_config.platform)
            .with_environment(gcp_config.environment.clone())
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn build_labels(self, config: &TelemetryConfig) -> BTreeMap<String, String> {
        let mut attrs = vec![
            KeyValue::new(CLOUD_PROVIDER, CLOUD_PROVIDER_GCP),
            KeyValue::new(CLOUD_PLATFORM, self.platform.as_str()),
            KeyValue::new(CLOUD_ACCOUNT_ID, self.project_id.clone()),
            KeyValue::new(GCP_PROJECT_ID, self.project_id),
            KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, self.environment),
        ];

        if let Some(region) = self.region {
            attrs.push(KeyValue::new(CLOUD_REGION, region));
        }

        if let Some(service_id) = self.service_id {
            attrs.push(KeyValue::new(FAAS_NAME, service_id));
        }

        if let Some(revision) = self.revision {
            attrs.push(KeyValue::new(FAAS_VERSION, revision));
        }

        resource_labels(&build_resource(config, attrs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_semantic_conventions::resource::SERVICE_NAME;

    fn test_config() -> TelemetryConfig {
        TelemetryConfig::new("test-service", "1.0.0")
    }

    #[test]
    fn gcp_labels_include_base_attributes() {
        let labels = GcpResourceBuilder::new("my-project", GcpPlatform::CloudRun)
            .build_labels(&test_config());

        assert_eq!(labels.get(SERVICE_NAME).map(String::as_str), Some("test-service"));
        assert_eq!(labels.get(CLOUD_PROVIDER).map(String::as_str), Some("gcp"));
        assert_eq!(labels.get(GCP_PROJECT_ID).map(String::as_str), Some("my-project"));
    }

    #[test]
    fn gcp_labels_with_region_service_and_revision() {
        let labels = GcpResourceBuilder::new("proj", GcpPlatform::CloudFunctions)
            .with_region("europe-west1")
            .with_service("my-function")
            .with_revision("v2")
            .build_labels(&test_config());

        assert_eq!(labels.get(CLOUD_REGION).map(String::as_str), Some("europe-west1"));
        assert_eq!(labels.get(FAAS_NAME).map(String::as_str), Some("my-function"));
        assert_eq!(labels.get(FAAS_VERSION).map(String::as_str), Some("v2"));
        assert_eq!(
            labels.get(CLOUD_PLATFORM).map(String::as_str),
            Some("gcp_cloud_functions")
        );
    }

    #[test]
    fn from_config_carries_environment() {
        let gcp = GcpConfig::new("proj").with_environment("staging");

        let labels = GcpResourceBuilder::from_config(&gcp).build_labels(&test_config());

        assert_eq!(
            labels.get(DEPLOYMENT_ENVIRONMENT_NAME).map(String::as_str),
            Some("staging")
        );
    }
}
