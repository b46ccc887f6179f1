use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use opentelemetry::trace::{SpanId, TraceId};
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use serde_json::{Map, Value};
use tracing::{span, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::{LookupSpan, SpanRef};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

use crate::telemetry::config::{LogFormat, TelemetryConfig};
use crate::telemetry::context;
use crate::telemetry::default::build_console_layer;
use crate::telemetry::error::TelemetryError;
use crate::telemetry::record::{escape_reserved, LogRecord, Record, Severity, SpanRecord};

/// Span field that sets the trace id of a root span
pub const TRACE_ID_FIELD: &str = "trace_id";

/// Span field carrying the remote parent span id of a root span
pub const PARENT_SPAN_ID_FIELD: &str = "parent_span_id";

/// Target `tracing-log` gives to records bridged from the `log` crate
const LOG_BRIDGE_TARGET: &str = "log";

/// Crates the exporters run on. Their events never become records, or a
/// delivery would log its own delivery.
const EXPORT_PATH_TARGETS: &[&str] = &[
    "gcp_auth",
    "h2",
    "hickory_resolver",
    "hyper",
    "hyper_util",
    "reqwest",
    "rustls",
    "tokio_rustls",
    "tower",
    "want",
];

/// Whether `target` belongs to one of the crates on the export path
pub fn is_export_path(target: &str) -> bool {
    EXPORT_PATH_TARGETS.iter().any(|krate| {
        target
            .strip_prefix(krate)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// Correlation state kept in each span's extensions
pub(crate) struct SpanState {
    pub(crate) trace_id: TraceId,
    pub(crate) span_id: SpanId,
    parent_span_id: Option<SpanId>,
    start_time: DateTime<Utc>,
    started: Instant,
    fields: Map<String, Value>,
}

/// Ids seen on a span while nothing was recording, applied once state is built
#[derive(Debug, Default)]
struct DeferredIds {
    trace_id: Option<TraceId>,
    parent_span_id: Option<SpanId>,
}

impl DeferredIds {
    fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.parent_span_id.is_none()
    }
}

/// Visitor to collect event fields into a JSON map
pub(crate) struct JsonVisitor<'a>(pub(crate) &'a mut Map<String, Value>);

impl<'a> tracing::field::Visit for JsonVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(
            field.name().to_string(),
            Value::String(format!("{:?}", value)),
        );
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        let number = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.0.insert(field.name().to_string(), number);
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_error(
        &mut self,
        field: &tracing::field::Field,
        value: &(dyn std::error::Error + 'static),
    ) {
        self.0
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }
}

/// Only picks up the correlation fields; everything else is skipped
struct IdVisitor<'a>(&'a mut DeferredIds);

impl IdVisitor<'_> {
    fn capture(&mut self, name: &str, value: &str) {
        match name {
            TRACE_ID_FIELD => {
                if let Some(trace_id) = parse_trace_id(value) {
                    self.0.trace_id = Some(trace_id);
                }
            }
            PARENT_SPAN_ID_FIELD => {
                if let Some(span_id) = parse_span_id(value) {
                    self.0.parent_span_id.get_or_insert(span_id);
                }
            }
            _ => {}
        }
    }
}

impl tracing::field::Visit for IdVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.capture(field.name(), value);
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if matches!(field.name(), TRACE_ID_FIELD | PARENT_SPAN_ID_FIELD) {
            self.capture(field.name(), &format!("{:?}", value));
        }
    }
}

fn parse_trace_id(hex: &str) -> Option<TraceId> {
    TraceId::from_hex(hex)
        .ok()
        .filter(|id| *id != TraceId::INVALID)
}

fn parse_span_id(hex: &str) -> Option<SpanId> {
    SpanId::from_hex(hex).ok().filter(|id| *id != SpanId::INVALID)
}

fn take_trace_id(fields: &mut Map<String, Value>) -> Option<TraceId> {
    let raw = fields.remove(TRACE_ID_FIELD)?;
    raw.as_str().and_then(parse_trace_id)
}

fn take_parent_span_id(fields: &mut Map<String, Value>) -> Option<SpanId> {
    let raw = fields.remove(PARENT_SPAN_ID_FIELD)?;
    raw.as_str().and_then(parse_span_id)
}

/// Remove the event's message from its fields
pub(crate) fn take_message(fields: &mut Map<String, Value>) -> String {
    match fields.remove("message") {
        Some(Value::String(message)) => message,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// The event's real target. Records bridged from `log` carry theirs in a
/// `log.target` field; the other `log.*` bookkeeping fields are dropped.
pub(crate) fn event_target(metadata: &Metadata<'_>, fields: &mut Map<String, Value>) -> String {
    if metadata.target() != LOG_BRIDGE_TARGET {
        return metadata.target().to_string();
    }

    let target = match fields.remove("log.target") {
        Some(Value::String(target)) => target,
        _ => LOG_BRIDGE_TARGET.to_string(),
    };
    fields.retain(|key, _| !key.starts_with("log."));
    target
}

pub(crate) fn span_ids<S>(span: &SpanRef<'_, S>) -> Option<(TraceId, SpanId)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let extensions = span.extensions();
    let ids = extensions
        .get::<SpanState>()
        .map(|state| (state.trace_id, state.span_id));
    ids
}

/// Tracing layer that keeps trace correlation for every span, and turns events
/// and closed spans into [`Record`]s for backends that take them.
///
/// Trace ids come from a `trace_id` span field when present, otherwise from
/// the parent span, otherwise they are generated. Spans opened while nothing
/// was recording get their state on first use. Nothing is built while the
/// backend is disabled or telemetry is unconfigured.
#[derive(Debug, Default)]
pub struct ExportLayer {
    ids: RandomIdGenerator,
}

impl ExportLayer {
    fn insert_state<S>(
        &self,
        span: &SpanRef<'_, S>,
        trace_id: Option<TraceId>,
        parent_span_id: Option<SpanId>,
        fields: Map<String, Value>,
    ) -> (TraceId, SpanId)
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let state = SpanState {
            trace_id: trace_id.unwrap_or_else(|| self.ids.new_trace_id()),
            span_id: self.ids.new_span_id(),
            parent_span_id,
            start_time: Utc::now(),
            started: Instant::now(),
            fields,
        };
        let ids = (state.trace_id, state.span_id);
        span.extensions_mut().insert(state);
        ids
    }

    /// Build state for `span` and any ancestor that has none, root first
    fn ensure_state<S>(&self, span: &SpanRef<'_, S>)
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        if span.extensions().get::<SpanState>().is_some() {
            return;
        }

        let mut parent: Option<(TraceId, SpanId)> = None;
        for ancestor in span.scope().from_root() {
            let ids = match span_ids(&ancestor) {
                Some(ids) => ids,
                None => {
                    let deferred = ancestor
                        .extensions_mut()
                        .remove::<DeferredIds>()
                        .unwrap_or_default();
                    self.insert_state(
                        &ancestor,
                        deferred.trace_id.or(parent.map(|(trace_id, _)| trace_id)),
                        parent.map(|(_, span_id)| span_id).or(deferred.parent_span_id),
                        Map::new(),
                    )
                }
            };
            parent = Some(ids);
        }
    }
}

impl<S> Layer<S> for ExportLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if is_export_path(attrs.metadata().target()) {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };

        if !context::active().is_some_and(|active| active.is_correlating()) {
            let mut deferred = DeferredIds::default();
            attrs.record(&mut IdVisitor(&mut deferred));
            if !deferred.is_empty() {
                span.extensions_mut().insert(deferred);
            }
            return;
        }

        let parent = span.parent().and_then(|parent| {
            self.ensure_state(&parent);
            span_ids(&parent)
        });

        let mut fields = Map::new();
        attrs.record(&mut JsonVisitor(&mut fields));
        let explicit_trace = take_trace_id(&mut fields);
        let remote_parent = take_parent_span_id(&mut fields);

        self.insert_state(
            &span,
            explicit_trace.or(parent.map(|(trace_id, _)| trace_id)),
            parent.map(|(_, span_id)| span_id).or(remote_parent),
            fields,
        );
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();

        if let Some(state) = extensions.get_mut::<SpanState>() {
            let mut fields = Map::new();
            values.record(&mut JsonVisitor(&mut fields));
            if let Some(trace_id) = take_trace_id(&mut fields) {
                state.trace_id = trace_id;
            }
            if let Some(parent_span_id) = take_parent_span_id(&mut fields) {
                state.parent_span_id.get_or_insert(parent_span_id);
            }
            state.fields.extend(fields);
            return;
        }

        if let Some(deferred) = extensions.get_mut::<DeferredIds>() {
            values.record(&mut IdVisitor(deferred));
            return;
        }

        let mut deferred = DeferredIds::default();
        values.record(&mut IdVisitor(&mut deferred));
        if !deferred.is_empty() {
            extensions.insert(deferred);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_export_path(metadata.target()) {
            return;
        }
        let Some(active) = context::active() else {
            return;
        };
        if !active.is_correlating() {
            return;
        }

        let span = ctx.event_span(event);
        if let Some(span) = &span {
            self.ensure_state(span);
        }
        if !active.exporter.takes_records() {
            return;
        }

        let mut fields = Map::new();
        event.record(&mut JsonVisitor(&mut fields));
        let target = event_target(metadata, &mut fields);
        if is_export_path(&target) {
            return;
        }
        let message = take_message(&mut fields);
        let ids = span.as_ref().and_then(span_ids);

        active.exporter.emit(Record::Log(LogRecord {
            timestamp: Utc::now(),
            severity: Severity::from(metadata.level()),
            message,
            target,
            trace_id: ids.map(|(trace_id, _)| trace_id.to_string()),
            span_id: ids.map(|(_, span_id)| span_id.to_string()),
            span: span.map(|span| span.name().to_string()),
            session_id: active.session_id.to_string(),
            fields: escape_reserved(fields),
        }));
    }

    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let Some(active) = context::active() else {
            return;
        };
        if !active.exporter.takes_records() {
            return;
        }

        // State stays in place: the console layers close the span after us
        let mut extensions = span.extensions_mut();
        let Some(state) = extensions.get_mut::<SpanState>() else {
            return;
        };
        let metadata = span.metadata();
        let record = SpanRecord {
            timestamp: Utc::now(),
            severity: Severity::from(metadata.level()),
            message: span.name().to_string(),
            target: metadata.target().to_string(),
            trace_id: state.trace_id.to_string(),
            span_id: state.span_id.to_string(),
            parent_span_id: state.parent_span_id.map(|id| id.to_string()),
            session_id: active.session_id.to_string(),
            start_time: state.start_time,
            duration_ms: state.started.elapsed().as_secs_f64() * 1000.0,
            fields: escape_reserved(std::mem::take(&mut state.fields)),
        };
        drop(extensions);

        active.exporter.emit(Record::Span(record));
    }
}

/// Build the env filter from config
pub fn build_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

static FILTER_HANDLE: Mutex<Option<reload::Handle<EnvFilter, Registry>>> = Mutex::new(None);

/// Install the global subscriber on first use; later calls only swap the
/// level filter. Records follow whichever context is active, and each console
/// layer renders only while a console context in its format is active.
pub fn init_subscriber(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config);
    let mut installed = FILTER_HANDLE.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(handle) = installed.as_ref() {
        return handle
            .reload(filter)
            .map_err(|e| TelemetryError::Init(format!("Failed to reload log filter: {}", e)));
    }

    let (filter_layer, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(ExportLayer::default())
        .with(build_console_layer(LogFormat::Pretty))
        .with(build_console_layer(LogFormat::Json))
        .try_init()
        .map_err(|e| TelemetryError::Init(format!("Failed to install subscriber: {}", e)))?;

    *installed = Some(handle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_filter_uses_config_log_level() {
        let config = TelemetryConfig::new("test", "1.0").with_log_level("debug");

        let filter = build_filter(&config);

        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn build_filter_defaults_to_info() {
        let config = TelemetryConfig::new("test", "1.0");

        let filter = build_filter(&config);

        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn trace_id_field_is_parsed_and_removed() {
        let mut fields = Map::new();
        fields.insert(
            TRACE_ID_FIELD.to_string(),
            Value::String("4bf92f3577b34da6a3ce929d0e0e4736".to_string()),
        );
        fields.insert("http.method".to_string(), Value::String("GET".to_string()));

        let trace_id = take_trace_id(&mut fields).unwrap();

        assert_eq!(trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(!fields.contains_key(TRACE_ID_FIELD));
        assert!(fields.contains_key("http.method"));
    }

    #[test]
    fn invalid_trace_ids_are_ignored() {
        let mut zeros = Map::new();
        zeros.insert(
            TRACE_ID_FIELD.to_string(),
            Value::String("00000000000000000000000000000000".to_string()),
        );
        let mut garbage = Map::new();
        garbage.insert(TRACE_ID_FIELD.to_string(), Value::String("not-hex".to_string()));

        assert!(take_trace_id(&mut zeros).is_none());
        assert!(take_trace_id(&mut garbage).is_none());
    }

    #[test]
    fn parent_span_id_field_is_parsed() {
        let mut fields = Map::new();
        fields.insert(
            PARENT_SPAN_ID_FIELD.to_string(),
            Value::String("00f067aa0ba902b7".to_string()),
        );

        let parent = take_parent_span_id(&mut fields).unwrap();

        assert_eq!(parent.to_string(), "00f067aa0ba902b7");
    }

    #[test]
    fn http_client_targets_are_on_the_export_path() {
        assert!(is_export_path("hyper_util::client::legacy::connect::http"));
        assert!(is_export_path("reqwest::connect"));
        assert!(is_export_path("h2"));
        assert!(is_export_path("gcp_auth::custom_service_account"));

        assert!(!is_export_path("hyperion::sync"));
        assert!(!is_export_path("fitness_telemetry_service::telemetry::api"));
        assert!(!is_export_path("actix_web::middleware::logger"));
    }

    #[test]
    fn message_is_taken_from_fields() {
        let mut fields = Map::new();
        fields.insert("message".to_string(), Value::String("synced".to_string()));
        fields.insert("count".to_string(), Value::Number(3.into()));

        assert_eq!(take_message(&mut fields), "synced");
        assert_eq!(take_message(&mut fields), "");
        assert!(fields.contains_key("count"));
    }
}
