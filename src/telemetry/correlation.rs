//! Request correlation for the HTTP layer.
//!
//! Reads an incoming trace id from `traceparent` (W3C) or
//! `X-Cloud-Trace-Context` (GCP load balancers), records it on the request's
//! root span so every log inside the request carries it, and echoes it back in
//! the `x-trace-id` response header.

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{Error, HttpMessage};
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{SpanId, TraceContextExt, TraceId};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use tracing::Span;
use tracing_actix_web::{DefaultRootSpanBuilder, RootSpanBuilder};

/// Response header carrying the request's trace id
pub const TRACE_ID_HEADER: &str = "x-trace-id";

const CLOUD_TRACE_HEADER: &str = "x-cloud-trace-context";

/// Trace identity of one request, stored in the request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceCorrelation {
    pub trace_id: TraceId,
    pub parent_span_id: Option<SpanId>,
}

impl TraceCorrelation {
    /// Fresh correlation for a request that arrived without one
    pub fn generate() -> Self {
        Self {
            trace_id: RandomIdGenerator::default().new_trace_id(),
            parent_span_id: None,
        }
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

/// Read the caller's trace context, W3C first, then the GCP header
pub fn extract_correlation(headers: &HeaderMap) -> Option<TraceCorrelation> {
    from_traceparent(headers).or_else(|| from_cloud_trace_context(headers))
}

fn from_traceparent(headers: &HeaderMap) -> Option<TraceCorrelation> {
    let cx = TraceContextPropagator::new().extract(&HeaderExtractor(headers));
    let span = cx.span();
    let span_context = span.span_context();
    span_context.is_valid().then(|| TraceCorrelation {
        trace_id: span_context.trace_id(),
        parent_span_id: Some(span_context.span_id()),
    })
}

/// `TRACE_ID/SPAN_ID;o=OPTIONS`, span id in decimal
fn from_cloud_trace_context(headers: &HeaderMap) -> Option<TraceCorrelation> {
    let raw = headers.get(CLOUD_TRACE_HEADER)?.to_str().ok()?;
    let (trace_part, rest) = raw.split_once('/').unwrap_or((raw, ""));

    let trace_id = TraceId::from_hex(trace_part.trim()).ok()?;
    if trace_id == TraceId::INVALID {
        return None;
    }

    let parent_span_id = rest
        .split(';')
        .next()
        .and_then(|span| span.trim().parse::<u64>().ok())
        .map(|span| SpanId::from_bytes(span.to_be_bytes()))
        .filter(|span| *span != SpanId::INVALID);

    Some(TraceCorrelation {
        trace_id,
        parent_span_id,
    })
}

/// Root span builder that stamps each request span with its trace id
pub struct CorrelatedRootSpan;

impl RootSpanBuilder for CorrelatedRootSpan {
    fn on_request_start(request: &ServiceRequest) -> Span {
        let correlation =
            extract_correlation(request.headers()).unwrap_or_else(TraceCorrelation::generate);
        request.extensions_mut().insert(correlation);

        let span = tracing::info_span!(
            "http_request",
            http.method = %request.method(),
            http.target = %request.uri(),
            http.status_code = tracing::field::Empty,
            trace_id = %correlation.trace_id,
            parent_span_id = tracing::field::Empty,
        );
        if let Some(parent) = correlation.parent_span_id {
            span.record("parent_span_id", tracing::field::display(parent));
        }
        span
    }

    fn on_request_end<B: MessageBody>(span: Span, outcome: &Result<ServiceResponse<B>, Error>) {
        DefaultRootSpanBuilder::on_request_end(span, outcome);
    }
}

/// Middleware echoing the request's trace id in the response
pub async fn propagate_trace_id(
    request: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let correlation = request
        .extensions()
        .get::<TraceCorrelation>()
        .copied()
        .or_else(|| extract_correlation(request.headers()));

    let mut response = next.call(request).await?;

    if let Some(correlation) = correlation {
        if let Ok(value) = HeaderValue::from_str(&correlation.trace_id.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
        }
    }

    Ok(response)
}
