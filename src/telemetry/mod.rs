//! Structured telemetry with pluggable backends.
//!
//! Application code logs through `tracing` macros. A single export layer turns
//! events and closed spans into records and hands them to whichever backend
//! the active [`TelemetryContext`] owns.
//!
//! # Features
//!
//! - `telemetry-gcp`: Enable the Google Cloud Logging backend
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // Initialize from environment (console backend unless configured otherwise)
//! let context = telemetry::init().await?;
//! tracing::info!(user = %telemetry::redact_string("alice"), "Signed in");
//! context.shutdown().await;
//! ```
//!
//! # Configuration
//!
//! ## Using the Builder
//!
//! ```rust,ignore
//! use telemetry::TelemetryConfig;
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("my-service")
//!     .service_version("1.0.0")
//!     .log_level("debug")
//!     .jsonl("/var/log/my-service/app.jsonl")
//!     .build();
//!
//! let context = telemetry::init_with_config(&config).await?;
//! ```
//!
//! ## By Backend Name
//!
//! ```rust,ignore
//! use telemetry::BackendOptions;
//!
//! let options = BackendOptions::default().with_project_id("my-project");
//! let context = telemetry::configure("cloudlogging", &options).await?;
//! ```
//!
//! ## Backends
//!
//! - [`TelemetryBackend::Console`]: Pretty or JSON lines on stdout/stderr
//! - [`TelemetryBackend::Jsonl`]: One JSON object per line in a local file
//! - `TelemetryBackend::CloudLogging`: Google Cloud Logging (requires `telemetry-gcp` feature)
//! - [`TelemetryBackend::Disabled`]: Discards everything
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TELEMETRY_BACKEND` | `console`, `jsonl`, `cloudlogging` or `disabled` | auto-detect |
//! | `TELEMETRY_LOG_FILE` | Path for the `jsonl` backend | - |
//! | `TELEMETRY_SHUTDOWN_TIMEOUT_SECS` | Flush deadline at shutdown | `5` |
//! | `OTEL_SERVICE_NAME` | Service name | `CARGO_PKG_NAME` |
//! | `OTEL_SERVICE_VERSION` | Service version | `CARGO_PKG_VERSION` |
//! | `RUST_LOG` | Log level filter | `info` |
//! | `LOG_FORMAT` | `pretty` or `json` | `pretty` |
//!
//! # Module Structure
//!
//! - [`api`]: Core trait and initialization functions
//! - [`config`]: Configuration types
//! - [`context`]: Lifecycle and the active context
//! - [`correlation`]: HTTP trace id propagation
//! - [`redact`]: Masking of sensitive values
//! - [`error`]: Error types
//! - [`default`]: Console and disabled providers
//! - [`jsonl`]: Local file provider
//! - [`gcp`]: Cloud Logging provider (feature-gated)

#![allow(dead_code, unused_imports)] // Public API - not all items used internally

pub mod api;
pub mod config;
pub mod context;
pub mod correlation;
pub mod default;
pub mod error;
pub mod exporter;
pub mod jsonl;
pub mod record;
pub mod redact;
pub mod resource;
pub mod trace;

#[cfg(feature = "telemetry-gcp")]
pub mod gcp;
#[cfg(feature = "telemetry-gcp")]
pub use gcp::{GcpConfig, GcpPlatform};

// Re-exports
pub use api::{configure, init, init_with_config, init_with_provider, TelemetryProvider};
pub use config::{
    BackendKind, BackendOptions, JsonlConfig, LogFormat, TelemetryBackend, TelemetryConfig,
    TelemetryConfigBuilder,
};
pub use context::{SessionId, TelemetryContext};
pub use correlation::{propagate_trace_id, CorrelatedRootSpan};
pub use error::TelemetryError;
pub use redact::{redact_string, redact_value, Redacted};
