//! Default/local telemetry providers.
//!
//! These providers need no external service:
//!
//! - [`DefaultProvider`]: console output, pretty or JSON per `LOG_FORMAT`,
//!   rendered by `tracing_subscriber::fmt` layers
//! - [`DisabledProvider`]: no-op, for tests and benchmarks
//!
//! # Example
//!
//! ```rust,ignore
//! use telemetry::default::DefaultProvider;
//! use telemetry::{TelemetryConfig, api::init_with_provider};
//!
//! let config = TelemetryConfig::from_env()?;
//! let context = init_with_provider(&DefaultProvider, &config).await?;
//! ```

mod console;
mod provider;

pub use console::{
    build_console_layer, build_console_layer_with_writer, ConsoleExporter, ConsoleJsonFormat,
};
pub use provider::{DefaultProvider, DisabledProvider};
