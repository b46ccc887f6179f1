//! Process-wide telemetry context and its lifecycle.
//!
//! `unconfigured → active → shut_down`. The [`TelemetryContext`] returned by
//! configure is owned by the process entry point and handed to request
//! handlers explicitly. The tracing layer reaches the active exporter through
//! a single routing slot; when the slot is empty every logging call behaves
//! like the disabled backend.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use uuid::Uuid;

use crate::telemetry::config::BackendKind;
use crate::telemetry::error::TelemetryError;
use crate::telemetry::exporter::Exporter;

/// Opaque identifier, unique per configured context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the tracing layer needs from the active context
pub(crate) struct ActiveTelemetry {
    pub(crate) exporter: Exporter,
    pub(crate) session_id: SessionId,
}

impl ActiveTelemetry {
    pub(crate) fn new(exporter: Exporter) -> Self {
        Self {
            exporter,
            session_id: SessionId::generate(),
        }
    }

    /// True when spans should carry correlation state at all
    pub(crate) fn is_correlating(&self) -> bool {
        !self.exporter.is_disabled()
    }
}

static ACTIVE: RwLock<Option<Arc<ActiveTelemetry>>> = RwLock::new(None);

/// The active context, if any
pub(crate) fn active() -> Option<Arc<ActiveTelemetry>> {
    ACTIVE.read().ok().and_then(|slot| slot.clone())
}

/// Whether a context is currently active in this process
pub fn is_configured() -> bool {
    active().is_some()
}

pub(crate) fn ensure_unconfigured() -> Result<(), TelemetryError> {
    if is_configured() {
        Err(TelemetryError::AlreadyConfigured)
    } else {
        Ok(())
    }
}

pub(crate) fn activate(telemetry: Arc<ActiveTelemetry>) -> Result<(), TelemetryError> {
    let mut slot = ACTIVE.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(TelemetryError::AlreadyConfigured);
    }
    *slot = Some(telemetry);
    Ok(())
}

fn deactivate(telemetry: &Arc<ActiveTelemetry>) {
    let mut slot = ACTIVE.write().unwrap_or_else(PoisonError::into_inner);
    if slot
        .as_ref()
        .is_some_and(|current| Arc::ptr_eq(current, telemetry))
    {
        *slot = None;
    }
}

/// Handle to the configured telemetry backend.
///
/// Immutable after construction. Call [`TelemetryContext::shutdown`] before
/// exit to flush and release the exporter; a second call does nothing.
pub struct TelemetryContext {
    inner: Arc<ActiveTelemetry>,
    shutdown_timeout: Duration,
    shut_down: AtomicBool,
}

impl TelemetryContext {
    pub(crate) fn new(inner: Arc<ActiveTelemetry>, shutdown_timeout: Duration) -> Self {
        Self {
            inner,
            shutdown_timeout,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.inner.exporter.kind()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn is_active(&self) -> bool {
        !self.shut_down.load(Ordering::SeqCst)
    }

    pub fn exporter(&self) -> &Exporter {
        &self.inner.exporter
    }

    pub fn flush(&self) {
        self.inner.exporter.flush();
    }

    /// Stop routing records here, then flush and release the exporter within
    /// the configured timeout. Failures are reported on stderr, never returned.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        deactivate(&self.inner);

        if let Err(e) = self.inner.exporter.shutdown(self.shutdown_timeout).await {
            eprintln!(
                "telemetry: {} backend did not shut down cleanly: {}",
                self.backend(),
                e
            );
        }
    }
}

impl fmt::Debug for TelemetryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryContext")
            .field("backend", &self.backend())
            .field("session_id", self.session_id())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_opaque() {
        let a = SessionId::generate();
        let b = SessionId::generate();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn disabled_telemetry_is_not_correlating() {
        let telemetry = ActiveTelemetry::new(Exporter::Disabled);

        assert!(!telemetry.is_correlating());
        assert!(!telemetry.exporter.takes_records());
    }

    #[test]
    fn console_telemetry_correlates_without_taking_records() {
        let telemetry = ActiveTelemetry::new(Exporter::Console(
            crate::telemetry::default::ConsoleExporter::new(crate::telemetry::LogFormat::Json),
        ));

        assert!(telemetry.is_correlating());
        assert!(!telemetry.exporter.takes_records());
    }
}
