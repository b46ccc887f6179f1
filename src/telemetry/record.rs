use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Keys a record sets itself; structured fields never overwrite them
pub const RESERVED_KEYS: &[&str] = &[
    "timestamp",
    "severity",
    "message",
    "target",
    "trace_id",
    "span_id",
    "span",
    "parent_span_id",
    "session_id",
    "start_time",
    "duration_ms",
];

/// Prefix given to structured fields whose name is a reserved key
pub const RESERVED_FIELD_PREFIX: &str = "fields.";

/// Move fields named like a reserved key under [`RESERVED_FIELD_PREFIX`]
pub fn escape_reserved(fields: Map<String, Value>) -> Map<String, Value> {
    if !fields.keys().any(|key| RESERVED_KEYS.contains(&key.as_str())) {
        return fields;
    }

    fields
        .into_iter()
        .map(|(key, value)| {
            if RESERVED_KEYS.contains(&key.as_str()) {
                (format!("{}{}", RESERVED_FIELD_PREFIX, key), value)
            } else {
                (key, value)
            }
        })
        .collect()
}

/// Record severity (GCP naming)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::INFO => Self::Info,
            tracing::Level::DEBUG | tracing::Level::TRACE => Self::Debug,
        }
    }
}

/// One log event
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub target: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
    pub session_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// One closed span
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub target: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: f64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Anything an exporter can receive
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Record {
    Log(LogRecord),
    Span(SpanRecord),
}

impl Record {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Log(log) => log.severity,
            Self::Span(span) => span.severity,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Log(log) => log.timestamp,
            Self::Span(span) => span.timestamp,
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::Log(log) => log.trace_id.as_deref(),
            Self::Span(span) => Some(&span.trace_id),
        }
    }

    pub fn span_id(&self) -> Option<&str> {
        match self {
            Self::Log(log) => log.span_id.as_deref(),
            Self::Span(span) => Some(&span.span_id),
        }
    }

    /// Serialize as a single JSON line, newline included
    pub fn to_json_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
