use std::collections::BTreeMap;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

use crate::telemetry::config::TelemetryConfig;

/// Get base attributes for any resource
pub fn base_attributes(config: &TelemetryConfig) -> Vec<KeyValue> {
    vec![
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
    ]
}

/// Build resource with base + additional attributes
pub fn build_resource(config: &TelemetryConfig, additional: Vec<KeyValue>) -> Resource {
    let mut attrs = base_attributes(config);
    attrs.extend(additional);
    Resource::builder_empty().with_attributes(attrs).build()
}

/// Flatten a resource into string labels, keyed by attribute name
pub fn resource_labels(resource: &Resource) -> BTreeMap<String, String> {
    resource
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), value.as_str().into_owned()))
        .collect()
}
