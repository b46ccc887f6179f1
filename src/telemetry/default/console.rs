use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde_json::Map;
use tracing::{Level, Subscriber};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::telemetry::config::LogFormat;
use crate::telemetry::context;
use crate::telemetry::record::{escape_reserved, LogRecord, Severity};
use crate::telemetry::trace::{event_target, span_ids, take_message, JsonVisitor};

/// Console backend handle. Output itself comes from the fmt layers built by
/// [`build_console_layer`], which render only while this exporter is open.
pub struct ConsoleExporter {
    format: LogFormat,
    closed: AtomicBool,
}

impl ConsoleExporter {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            closed: AtomicBool::new(false),
        }
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn renders(&self, format: LogFormat) -> bool {
        self.format == format && !self.closed.load(Ordering::Relaxed)
    }

    pub fn flush(&self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
    }

    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.flush();
        }
    }
}

/// JSON formatter: one object per line, same shape as the jsonl backend, with
/// trace ids taken from the span state and the active session id
pub struct ConsoleJsonFormat;

impl<S, N> FormatEvent<S, N> for ConsoleJsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use std::fmt::Write;

        let mut fields = Map::new();
        event.record(&mut JsonVisitor(&mut fields));
        let target = event_target(event.metadata(), &mut fields);
        let message = take_message(&mut fields);

        let span = ctx.parent_span();
        let ids = span.as_ref().and_then(span_ids);
        let session_id = context::active()
            .map(|active| active.session_id.to_string())
            .unwrap_or_default();

        let record = LogRecord {
            timestamp: Utc::now(),
            severity: Severity::from(event.metadata().level()),
            message,
            target,
            trace_id: ids.map(|(trace_id, _)| trace_id.to_string()),
            span_id: ids.map(|(_, span_id)| span_id.to_string()),
            span: span.map(|span| span.name().to_string()),
            session_id,
            fields: escape_reserved(fields),
        };

        let line = serde_json::to_string(&record).map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{}", line)
    }
}

/// ERROR goes to stderr, everything else to stdout
fn stdio_writer() -> impl for<'w> MakeWriter<'w> + Send + Sync + 'static {
    io::stderr.with_max_level(Level::ERROR).or_else(io::stdout)
}

/// Build the console layer for `format`, writing to stdout/stderr
pub fn build_console_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    build_console_layer_with_writer(format, stdio_writer())
}

/// Build the console layer for `format` on any writer. It stays silent unless
/// the active context is a console backend in that format.
pub fn build_console_layer_with_writer<S, W>(
    format: LogFormat,
    writer: W,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let active_format = filter_fn(move |_| {
        context::active().is_some_and(|active| active.exporter.renders_console(format))
    });

    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(true)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(writer)
            .with_filter(active_format)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .event_format(ConsoleJsonFormat)
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(active_format)
            .boxed(),
    }
}
