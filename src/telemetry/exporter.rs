use std::time::Duration;

use crate::telemetry::config::{BackendKind, LogFormat};
use crate::telemetry::default::ConsoleExporter;
use crate::telemetry::error::TelemetryError;
#[cfg(feature = "telemetry-gcp")]
use crate::telemetry::gcp::CloudLoggingExporter;
use crate::telemetry::jsonl::JsonlExporter;
use crate::telemetry::record::Record;

/// The exporter selected at configure time, one variant per backend
pub enum Exporter {
    Console(ConsoleExporter),
    Jsonl(JsonlExporter),
    #[cfg(feature = "telemetry-gcp")]
    CloudLogging(CloudLoggingExporter),
    Disabled,
}

impl Exporter {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Console(_) => BackendKind::Console,
            Self::Jsonl(_) => BackendKind::Jsonl,
            #[cfg(feature = "telemetry-gcp")]
            Self::CloudLogging(_) => BackendKind::CloudLogging,
            Self::Disabled => BackendKind::Disabled,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    /// Whether the tracing layer should build records for this sink. The
    /// console is rendered by its own fmt layers instead.
    pub fn takes_records(&self) -> bool {
        match self {
            Self::Jsonl(_) => true,
            #[cfg(feature = "telemetry-gcp")]
            Self::CloudLogging(_) => true,
            Self::Console(_) | Self::Disabled => false,
        }
    }

    /// Whether the console layer for `format` should render right now
    pub fn renders_console(&self, format: LogFormat) -> bool {
        match self {
            Self::Console(console) => console.renders(format),
            _ => false,
        }
    }

    /// Hand one record to the sink. Never fails and never blocks on the network.
    pub fn emit(&self, record: Record) {
        match self {
            Self::Console(_) => {}
            Self::Jsonl(jsonl) => jsonl.emit(&record),
            #[cfg(feature = "telemetry-gcp")]
            Self::CloudLogging(cloud) => cloud.emit(record),
            Self::Disabled => {}
        }
    }

    /// Flush local buffers. Cloud records are flushed by their worker.
    pub fn flush(&self) {
        match self {
            Self::Console(console) => console.flush(),
            Self::Jsonl(jsonl) => jsonl.flush(),
            #[cfg(feature = "telemetry-gcp")]
            Self::CloudLogging(_) => {}
            Self::Disabled => {}
        }
    }

    /// Release the sink's resource. Idempotent per variant.
    #[cfg_attr(not(feature = "telemetry-gcp"), allow(unused_variables))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TelemetryError> {
        match self {
            Self::Console(console) => {
                console.shutdown();
                Ok(())
            }
            Self::Jsonl(jsonl) => jsonl.shutdown(),
            #[cfg(feature = "telemetry-gcp")]
            Self::CloudLogging(cloud) => cloud.shutdown(timeout).await,
            Self::Disabled => Ok(()),
        }
    }
}
