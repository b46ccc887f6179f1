//! Newline-delimited JSON file backend.
//!
//! Every record becomes one self-contained JSON object on its own line, with
//! at least `timestamp`, `severity`, `message`, `trace_id` and `span_id`.
//!
//! # Environment Variables
//!
//! - `TELEMETRY_LOG_FILE`: output path (required)

mod exporter;

pub use exporter::JsonlExporter;

use crate::telemetry::api::TelemetryProvider;
use crate::telemetry::config::{JsonlConfig, TelemetryConfig};
use crate::telemetry::error::TelemetryError;
use crate::telemetry::exporter::Exporter;

/// Opens the configured file at configure time
pub struct JsonlProvider {
    config: JsonlConfig,
}

impl JsonlProvider {
    pub fn new(config: JsonlConfig) -> Self {
        Self { config }
    }
}

impl TelemetryProvider for JsonlProvider {
    async fn build_exporter(&self, _config: &TelemetryConfig) -> Result<Exporter, TelemetryError> {
        Ok(Exporter::Jsonl(JsonlExporter::open(&self.config.path)?))
    }
}
