use std::env;
use std::time::Duration;

/// Default Cloud Logging API endpoint
pub const DEFAULT_ENDPOINT: &str = "https://logging.googleapis.com";

/// Default deployment environment label
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// GCP cloud platforms (maps to cloud.platform semconv values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcpPlatform {
    #[default]
    CloudRun,
    CloudFunctions,
    AppEngine,
    ComputeEngine,
    KubernetesEngine,
}

impl GcpPlatform {
    /// Returns the OpenTelemetry semantic convention value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloudRun => "gcp_cloud_run",
            Self::CloudFunctions => "gcp_cloud_functions",
            Self::AppEngine => "gcp_app_engine",
            Self::ComputeEngine => "gcp_compute_engine",
            Self::KubernetesEngine => "gcp_kubernetes_engine",
        }
    }

    /// Detect platform from environment variables
    pub fn detect() -> Option<Self> {
        if env::var("K_SERVICE").is_ok() || env::var("K_REVISION").is_ok() {
            Some(Self::CloudRun)
        } else if env::var("FUNCTION_NAME").is_ok() || env::var("FUNCTION_TARGET").is_ok() {
            Some(Self::CloudFunctions)
        } else if env::var("GAE_SERVICE").is_ok() || env::var("GAE_VERSION").is_ok() {
            Some(Self::AppEngine)
        } else {
            None
        }
    }
}

/// How requests to the Logging API are authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcpCredentials {
    /// Application Default Credentials
    #[default]
    ApplicationDefault,
    /// No Authorization header (emulators, local collectors)
    Anonymous,
}

/// Queueing and delivery limits for the background sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Records held in memory before new ones are dropped
    pub queue_capacity: usize,
    /// Records per entries:write call
    pub max_batch_size: usize,
    /// Longest a record waits before its batch is sent
    pub flush_interval: Duration,
    /// Delivery attempts per batch, first attempt included
    pub max_attempts: u32,
    /// Backoff before the second attempt, doubled afterwards
    pub retry_backoff: Duration,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 2048,
            max_batch_size: 100,
            flush_interval: Duration::from_secs(2),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(250),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// GCP-specific configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpConfig {
    pub project_id: String,
    pub endpoint: String,
    pub platform: GcpPlatform,
    pub environment: String,
    /// Log id inside the project; the service name when unset
    pub log_name: Option<String>,
    pub credentials: GcpCredentials,
    pub batch: BatchConfig,
}

impl GcpConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            platform: GcpPlatform::default(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            log_name: None,
            credentials: GcpCredentials::default(),
            batch: BatchConfig::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_platform(mut self, platform: GcpPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_log_name(mut self, log_name: impl Into<String>) -> Self {
        self.log_name = Some(log_name.into());
        self
    }

    pub fn with_credentials(mut self, credentials: GcpCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Create from environment variables
    /// - GOOGLE_CLOUD_PROJECT / GCLOUD_PROJECT / GCP_PROJECT for project_id
    /// - CLOUD_LOGGING_ENDPOINT for endpoint (defaults to DEFAULT_ENDPOINT);
    ///   endpoints outside googleapis.com are called anonymously
    /// - CLOUD_LOGGING_LOG_NAME for the log id
    /// - ENVIRONMENT for the environment label
    /// - Platform auto-detected from K_SERVICE, FUNCTION_NAME, GAE_SERVICE, etc.
    pub fn from_env() -> Option<Self> {
        let project_id = env::var("GOOGLE_CLOUD_PROJECT")
            .or_else(|_| env::var("GCLOUD_PROJECT"))
            .or_else(|_| env::var("GCP_PROJECT"))
            .ok()
            .filter(|project| !project.trim().is_empty())?;

        let endpoint =
            env::var("CLOUD_LOGGING_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let credentials = if endpoint.contains("googleapis.com") {
            GcpCredentials::ApplicationDefault
        } else {
            GcpCredentials::Anonymous
        };

        Some(Self {
            project_id,
            endpoint,
            platform: GcpPlatform::detect().unwrap_or_default(),
            environment: env::var("ENVIRONMENT")
                .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string()),
            log_name: env::var("CLOUD_LOGGING_LOG_NAME").ok(),
            credentials,
            batch: BatchConfig::default(),
        })
    }
}
