use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::telemetry::config::TelemetryConfig;
use crate::telemetry::error::TelemetryError;
use crate::telemetry::gcp::auth::GcpAuth;
use crate::telemetry::gcp::config::{BatchConfig, GcpConfig};
use crate::telemetry::gcp::resource::GcpResourceBuilder;
use crate::telemetry::record::Record;

/// Delivery counters, shared between the exporter and its worker
#[derive(Debug, Default)]
pub struct ExportStats {
    exported: AtomicU64,
    dropped: AtomicU64,
    failure_reported: AtomicBool,
}

impl ExportStats {
    pub fn exported(&self) -> u64 {
        self.exported.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_exported(&self, count: u64) {
        self.exported.fetch_add(count, Ordering::Relaxed);
    }

    /// Count dropped records; only the first failure is reported
    fn record_drop(&self, count: u64, reason: &dyn Display) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
        if !self.failure_reported.swap(true, Ordering::SeqCst) {
            eprintln!(
                "telemetry: cloud logging export failed, dropping records ({}); further failures are counted silently",
                reason
            );
        }
    }
}

enum DeliveryError {
    Retryable(String),
    Fatal(String),
}

/// Thin client for the Cloud Logging `entries:write` method
struct CloudLoggingClient {
    http: reqwest::Client,
    url: String,
    log_name: String,
    project_id: String,
    labels: BTreeMap<String, String>,
    auth: GcpAuth,
    batch: BatchConfig,
}

impl CloudLoggingClient {
    fn new(
        gcp_config: &GcpConfig,
        config: &TelemetryConfig,
        auth: GcpAuth,
    ) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder()
            .timeout(gcp_config.batch.request_timeout)
            .build()
            .map_err(|e| TelemetryError::Exporter(format!("Failed to build HTTP client: {}", e)))?;

        let log_id = gcp_config
            .log_name
            .clone()
            .unwrap_or_else(|| config.service_name.clone());

        Ok(Self {
            http,
            url: format!("{}/v2/entries:write", gcp_config.endpoint.trim_end_matches('/')),
            log_name: format!("projects/{}/logs/{}", gcp_config.project_id, log_id),
            project_id: gcp_config.project_id.clone(),
            labels: GcpResourceBuilder::from_config(gcp_config).build_labels(config),
            auth,
            batch: gcp_config.batch,
        })
    }

    fn entry(&self, record: &Record) -> Value {
        let mut payload = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
        let mut session_id = Value::Null;
        if let Value::Object(map) = &mut payload {
            map.remove("timestamp");
            map.remove("severity");
            session_id = map.remove("session_id").unwrap_or(Value::Null);
        }

        let mut entry = json!({
            "severity": record.severity().as_str(),
            "timestamp": record.timestamp().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            "jsonPayload": payload,
            "labels": { "session_id": session_id },
        });

        if let Some(trace_id) = record.trace_id() {
            entry["trace"] = json!(format!("projects/{}/traces/{}", self.project_id, trace_id));
        }
        if let Some(span_id) = record.span_id() {
            entry["spanId"] = json!(span_id);
        }
        entry
    }

    fn write_request(&self, records: &[Record]) -> Value {
        let entries: Vec<Value> = records.iter().map(|record| self.entry(record)).collect();
        json!({
            "logName": self.log_name,
            "resource": {
                "type": "global",
                "labels": { "project_id": self.project_id },
            },
            "labels": self.labels,
            "entries": entries,
            "partialSuccess": true,
        })
    }

    async fn write(&self, body: &Value) -> Result<(), DeliveryError> {
        let mut request = self.http.post(&self.url).json(body);

        let authorization = self
            .auth
            .authorization()
            .await
            .map_err(|e| DeliveryError::Retryable(e.to_string()))?;
        if let Some(value) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Retryable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(DeliveryError::Retryable(format!("entries:write returned {}", status)))
        } else {
            Err(DeliveryError::Fatal(format!("entries:write returned {}", status)))
        }
    }

    /// Send one batch with bounded retry, then drop it
    async fn deliver(&self, records: Vec<Record>, stats: &ExportStats) {
        if records.is_empty() {
            return;
        }

        let count = records.len() as u64;
        let body = self.write_request(&records);
        let attempts = self.batch.max_attempts.max(1);
        let mut backoff = self.batch.retry_backoff;

        for attempt in 1..=attempts {
            match self.write(&body).await {
                Ok(()) => {
                    stats.record_exported(count);
                    return;
                }
                Err(DeliveryError::Retryable(_)) if attempt < attempts => {
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(DeliveryError::Retryable(reason)) | Err(DeliveryError::Fatal(reason)) => {
                    stats.record_drop(count, &reason);
                    return;
                }
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Record>,
    mut shutdown: oneshot::Receiver<()>,
    client: CloudLoggingClient,
    stats: Arc<ExportStats>,
) {
    let max_batch = client.batch.max_batch_size.max(1);
    let mut buffer = Vec::with_capacity(max_batch);
    let mut ticker = tokio::time::interval(client.batch.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(record) => {
                    buffer.push(record);
                    if buffer.len() >= max_batch {
                        client.deliver(std::mem::take(&mut buffer), &stats).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    client.deliver(std::mem::take(&mut buffer), &stats).await;
                }
            }
            _ = &mut shutdown => {
                receiver.close();
                while let Ok(record) = receiver.try_recv() {
                    buffer.push(record);
                    if buffer.len() >= max_batch {
                        client.deliver(std::mem::take(&mut buffer), &stats).await;
                    }
                }
                break;
            }
        }
    }

    client.deliver(buffer, &stats).await;
}

/// Exporter that queues records and ships them to Cloud Logging in batches.
///
/// `emit` never blocks: a full queue drops the record. Delivery happens on a
/// background task so a slow endpoint cannot stall request handling.
pub struct CloudLoggingExporter {
    sender: mpsc::Sender<Record>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<ExportStats>,
    closed: AtomicBool,
}

impl CloudLoggingExporter {
    /// Resolve credentials and start the background sender.
    /// Must be called from within a tokio runtime.
    pub async fn build(
        gcp_config: &GcpConfig,
        config: &TelemetryConfig,
    ) -> Result<Self, TelemetryError> {
        let auth = GcpAuth::resolve(gcp_config.credentials).await?;
        let client = CloudLoggingClient::new(gcp_config, config, auth)?;
        Ok(Self::spawn(client))
    }

    fn spawn(client: CloudLoggingClient) -> Self {
        let (sender, receiver) = mpsc::channel(client.batch.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(ExportStats::default());
        let worker = tokio::spawn(run_worker(receiver, shutdown_rx, client, stats.clone()));

        Self {
            sender,
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
            stats,
            closed: AtomicBool::new(false),
        }
    }

    pub fn emit(&self, record: Record) {
        if self.closed.load(Ordering::Relaxed) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.stats.record_drop(1, &"queue full"),
            Err(TrySendError::Closed(_)) => self.stats.record_drop(1, &"sender stopped"),
        }
    }

    pub fn stats(&self) -> &ExportStats {
        &self.stats
    }

    /// Drain the queue within `timeout`, then stop the worker.
    /// Only the first call does anything.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TelemetryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(signal) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = signal.send(());
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut worker) = worker else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TelemetryError::Exporter(format!(
                "Cloud Logging worker failed: {}",
                e
            ))),
            Err(_) => {
                worker.abort();
                Err(TelemetryError::Exporter(format!(
                    "Cloud Logging flush timed out after {:?}; pending records dropped",
                    timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::gcp::config::GcpCredentials;
    use crate::telemetry::record::tests::sample_log;
    use serial_test::serial;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fast_batch() -> BatchConfig {
        BatchConfig {
            queue_capacity: 16,
            max_batch_size: 10,
            flush_interval: Duration::from_millis(50),
            max_attempts: 2,
            retry_backoff: Duration::from_millis(10),
            request_timeout: Duration::from_secs(2),
        }
    }

    fn gcp_config(endpoint: &str) -> GcpConfig {
        GcpConfig::new("fit-test")
            .with_endpoint(endpoint)
            .with_log_name("api")
            .with_credentials(GcpCredentials::Anonymous)
            .with_batch(fast_batch())
    }

    fn header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    // Minimal HTTP/1.1 endpoint answering every request with `status`
    async fn spawn_collector(status: u16) -> (String, Arc<Mutex<Vec<Value>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let sink = bodies.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let sink = sink.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        let Some(end) = header_end(&buf) else { continue };
                        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                        let len = head
                            .lines()
                            .find_map(|line| line.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() < end + 4 + len {
                            continue;
                        }
                        let body: Value =
                            serde_json::from_slice(&buf[end + 4..end + 4 + len]).unwrap();
                        sink.lock().unwrap().push(body);
                        let response = format!(
                            "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}",
                            status
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        return;
                    }
                });
            }
        });

        (format!("http://{}", addr), bodies)
    }

    #[tokio::test]
    async fn delivers_batched_entries_on_shutdown() {
        let (endpoint, bodies) = spawn_collector(200).await;
        let config = TelemetryConfig::new("fitness-api", "1.0.0");
        let exporter = CloudLoggingExporter::build(&gcp_config(&endpoint), &config)
            .await
            .unwrap();

        for i in 0..3 {
            exporter.emit(sample_log(&format!("record {}", i)));
        }
        exporter.shutdown(Duration::from_secs(5)).await.unwrap();

        let bodies = bodies.lock().unwrap();
        let entries: Vec<&Value> = bodies
            .iter()
            .flat_map(|body| body["entries"].as_array().unwrap().iter())
            .collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(exporter.stats().exported(), 3);
        assert_eq!(bodies[0]["logName"], "projects/fit-test/logs/api");
        assert_eq!(entries[0]["severity"], "INFO");
        assert_eq!(
            entries[0]["trace"],
            "projects/fit-test/traces/4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(entries[0]["spanId"], "00f067aa0ba902b7");
        assert_eq!(entries[0]["labels"]["session_id"], "session-1");
        assert_eq!(entries[0]["jsonPayload"]["message"], "record 0");
    }

    #[tokio::test]
    #[serial]
    async fn delivery_traffic_is_not_exported_at_debug_level() {
        let (endpoint, bodies) = spawn_collector(200).await;
        let config = TelemetryConfig::builder()
            .service_name("fitness-api")
            .log_level("debug")
            .gcp(gcp_config(&endpoint))
            .shutdown_timeout(Duration::from_secs(5))
            .build();

        let context = crate::telemetry::init_with_config(&config).await.unwrap();
        tracing::info!("only record");
        // Several flush intervals, so any client events would have been batched
        tokio::time::sleep(Duration::from_millis(300)).await;
        context.shutdown().await;

        let bodies = bodies.lock().unwrap();
        let entries: Vec<&Value> = bodies
            .iter()
            .flat_map(|body| body["entries"].as_array().unwrap().iter())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["jsonPayload"]["message"], "only record");
    }

    #[tokio::test]
    async fn unreachable_endpoint_drops_without_failing_caller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let config = TelemetryConfig::new("fitness-api", "1.0.0");
        let exporter = CloudLoggingExporter::build(&gcp_config(&endpoint), &config)
            .await
            .unwrap();

        for i in 0..5 {
            exporter.emit(sample_log(&format!("lost {}", i)));
        }
        exporter.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(exporter.stats().exported(), 0);
        assert_eq!(exporter.stats().dropped(), 5);
    }

    #[tokio::test]
    async fn server_errors_are_retried_up_to_the_limit() {
        let (endpoint, bodies) = spawn_collector(503).await;
        let config = TelemetryConfig::new("fitness-api", "1.0.0");
        let exporter = CloudLoggingExporter::build(&gcp_config(&endpoint), &config)
            .await
            .unwrap();

        exporter.emit(sample_log("retry me"));
        exporter.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(bodies.lock().unwrap().len(), 2);
        assert_eq!(exporter.stats().dropped(), 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (endpoint, bodies) = spawn_collector(400).await;
        let config = TelemetryConfig::new("fitness-api", "1.0.0");
        let exporter = CloudLoggingExporter::build(&gcp_config(&endpoint), &config)
            .await
            .unwrap();

        exporter.emit(sample_log("bad request"));
        exporter.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(bodies.lock().unwrap().len(), 1);
        assert_eq!(exporter.stats().dropped(), 1);
    }

    #[tokio::test]
    async fn shutdown_twice_is_noop_and_later_emits_are_dropped() {
        let (endpoint, _bodies) = spawn_collector(200).await;
        let config = TelemetryConfig::new("fitness-api", "1.0.0");
        let exporter = CloudLoggingExporter::build(&gcp_config(&endpoint), &config)
            .await
            .unwrap();

        exporter.shutdown(Duration::from_secs(1)).await.unwrap();
        exporter.shutdown(Duration::from_secs(1)).await.unwrap();
        exporter.emit(sample_log("too late"));

        assert_eq!(exporter.stats().dropped(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (endpoint, _bodies) = spawn_collector(200).await;
        let config = TelemetryConfig::new("fitness-api", "1.0.0");
        let batch = BatchConfig {
            queue_capacity: 1,
            max_batch_size: 100,
            flush_interval: Duration::from_secs(60),
            ..fast_batch()
        };
        let exporter = CloudLoggingExporter::build(&gcp_config(&endpoint).with_batch(batch), &config)
            .await
            .unwrap();

        // The current-thread runtime does not run the worker between these calls
        for i in 0..10 {
            exporter.emit(sample_log(&format!("burst {}", i)));
        }

        assert_eq!(exporter.stats().dropped(), 9);
        exporter.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(exporter.stats().exported(), 1);
    }
}
