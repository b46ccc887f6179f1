use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::telemetry::error::TelemetryError;

/// Default bound on the shutdown flush
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty human-readable format (for local dev)
    #[default]
    Pretty,
    /// JSON structured format, one object per line
    Json,
}

/// The four exporter kinds a backend token can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Console,
    Jsonl,
    CloudLogging,
    Disabled,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Jsonl => "jsonl",
            Self::CloudLogging => "cloudlogging",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = TelemetryError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "jsonl" => Ok(Self::Jsonl),
            "cloudlogging" => Ok(Self::CloudLogging),
            "disabled" => Ok(Self::Disabled),
            other => Err(TelemetryError::Config(format!(
                "unknown telemetry backend '{}' (expected console, jsonl, cloudlogging or disabled)",
                other
            ))),
        }
    }
}

/// File backend configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlConfig {
    pub path: PathBuf,
}

impl JsonlConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Backend-specific options that accompany a backend token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOptions {
    /// Output path, required by `jsonl`
    pub log_file: Option<PathBuf>,
    /// GCP project, required by `cloudlogging`
    pub project_id: Option<String>,
    /// Deployment environment name for `cloudlogging`
    pub environment: Option<String>,
}

impl BackendOptions {
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Read options from environment variables
    /// - TELEMETRY_LOG_FILE for the jsonl path
    /// - GOOGLE_CLOUD_PROJECT / GCLOUD_PROJECT / GCP_PROJECT for project_id
    /// - ENVIRONMENT for the environment name
    pub fn from_env() -> Self {
        Self {
            log_file: non_empty_var("TELEMETRY_LOG_FILE").map(PathBuf::from),
            project_id: non_empty_var("GOOGLE_CLOUD_PROJECT")
                .or_else(|| non_empty_var("GCLOUD_PROJECT"))
                .or_else(|| non_empty_var("GCP_PROJECT")),
            environment: non_empty_var("ENVIRONMENT"),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Telemetry backend selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TelemetryBackend {
    /// Structured records on stdout/stderr
    #[default]
    Console,
    /// Newline-delimited JSON appended to a file
    Jsonl(JsonlConfig),
    /// Google Cloud Logging
    #[cfg(feature = "telemetry-gcp")]
    CloudLogging(crate::telemetry::gcp::GcpConfig),
    /// Every operation is a no-op
    Disabled,
}

impl TelemetryBackend {
    /// Map a backend token and its options to a backend.
    /// Fails if the token is unknown or a required option is missing.
    pub fn from_token(token: &str, options: &BackendOptions) -> Result<Self, TelemetryError> {
        match token.parse::<BackendKind>()? {
            BackendKind::Console => Ok(Self::Console),
            BackendKind::Disabled => Ok(Self::Disabled),
            BackendKind::Jsonl => {
                let path = options.log_file.clone().ok_or_else(|| {
                    TelemetryError::Config("jsonl backend requires a log file path".to_string())
                })?;
                Ok(Self::Jsonl(JsonlConfig::new(path)))
            }
            BackendKind::CloudLogging => cloud_logging_backend(options),
        }
    }

    /// Select the backend from environment variables.
    /// Uses TELEMETRY_BACKEND when set; otherwise Cloud Logging when a GCP
    /// project is configured, falling back to Console.
    pub fn from_env() -> Result<Self, TelemetryError> {
        let options = BackendOptions::from_env();

        match non_empty_var("TELEMETRY_BACKEND") {
            Some(token) => {
                #[cfg(feature = "telemetry-gcp")]
                {
                    if token.parse::<BackendKind>()? == BackendKind::CloudLogging {
                        if let Some(gcp_config) = crate::telemetry::gcp::GcpConfig::from_env() {
                            return Ok(Self::CloudLogging(gcp_config));
                        }
                    }
                }
                Self::from_token(&token, &options)
            }
            None => {
                #[cfg(feature = "telemetry-gcp")]
                {
                    if let Some(gcp_config) = crate::telemetry::gcp::GcpConfig::from_env() {
                        return Ok(Self::CloudLogging(gcp_config));
                    }
                }
                Ok(Self::Console)
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Console => BackendKind::Console,
            Self::Jsonl(_) => BackendKind::Jsonl,
            #[cfg(feature = "telemetry-gcp")]
            Self::CloudLogging(_) => BackendKind::CloudLogging,
            Self::Disabled => BackendKind::Disabled,
        }
    }
}

#[cfg(feature = "telemetry-gcp")]
fn cloud_logging_backend(options: &BackendOptions) -> Result<TelemetryBackend, TelemetryError> {
    let project_id = options
        .project_id
        .as_deref()
        .filter(|project| !project.trim().is_empty())
        .ok_or_else(|| {
            TelemetryError::Config("cloudlogging backend requires a GCP project id".to_string())
        })?;

    let mut gcp_config = crate::telemetry::gcp::GcpConfig::new(project_id);
    if let Some(environment) = &options.environment {
        gcp_config = gcp_config.with_environment(environment.clone());
    }
    Ok(TelemetryBackend::CloudLogging(gcp_config))
}

#[cfg(not(feature = "telemetry-gcp"))]
fn cloud_logging_backend(_options: &BackendOptions) -> Result<TelemetryBackend, TelemetryError> {
    Err(TelemetryError::Config(
        "cloudlogging backend requires the telemetry-gcp feature".to_string(),
    ))
}

/// Main telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub backend: TelemetryBackend,
    pub shutdown_timeout: Duration,
}

impl TelemetryConfig {
    /// Create config from environment variables.
    /// Fails on an unknown TELEMETRY_BACKEND or a missing backend option.
    pub fn from_env() -> Result<Self, TelemetryError> {
        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("pretty") => LogFormat::Pretty,
            _ => LogFormat::Pretty,
        };

        let shutdown_timeout = match non_empty_var("TELEMETRY_SHUTDOWN_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map(Duration::from_secs).map_err(|e| {
                TelemetryError::Config(format!(
                    "invalid TELEMETRY_SHUTDOWN_TIMEOUT_SECS '{}': {}",
                    raw, e
                ))
            })?,
            None => DEFAULT_SHUTDOWN_TIMEOUT,
        };

        Ok(Self {
            service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string()),
            service_version: env::var("OTEL_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format,
            backend: TelemetryBackend::from_env()?,
            shutdown_timeout,
        })
    }

    /// Create a new config with explicit values
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            backend: TelemetryBackend::Console,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::default()
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn with_backend(mut self, backend: TelemetryBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[derive(Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    service_version: Option<String>,
    log_level: Option<String>,
    log_format: Option<LogFormat>,
    backend: Option<TelemetryBackend>,
    shutdown_timeout: Option<Duration>,
}

impl TelemetryConfigBuilder {
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }

    pub fn json(self) -> Self {
        self.log_format(LogFormat::Json)
    }

    pub fn pretty(self) -> Self {
        self.log_format(LogFormat::Pretty)
    }

    pub fn backend(mut self, backend: TelemetryBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn jsonl(self, path: impl Into<PathBuf>) -> Self {
        self.backend(TelemetryBackend::Jsonl(JsonlConfig::new(path)))
    }

    pub fn disabled(self) -> Self {
        self.backend(TelemetryBackend::Disabled)
    }

    #[cfg(feature = "telemetry-gcp")]
    pub fn gcp(self, gcp_config: crate::telemetry::gcp::GcpConfig) -> Self {
        self.backend(TelemetryBackend::CloudLogging(gcp_config))
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self
                .service_name
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            service_version: self
                .service_version
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            log_format: self.log_format.unwrap_or_default(),
            backend: self.backend.unwrap_or_default(),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const BACKEND_VARS: &[&str] = &[
        "TELEMETRY_BACKEND",
        "TELEMETRY_LOG_FILE",
        "GOOGLE_CLOUD_PROJECT",
        "GCLOUD_PROJECT",
        "GCP_PROJECT",
        "ENVIRONMENT",
        "LOG_FORMAT",
        "TELEMETRY_SHUTDOWN_TIMEOUT_SECS",
    ];

    // Clears the given env vars on creation and again on drop
    struct EnvGuard {
        vars: &'static [&'static str],
    }

    impl EnvGuard {
        fn new(vars: &'static [&'static str]) -> Self {
            for var in vars {
                env::remove_var(var);
            }
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for var in self.vars {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn log_format_default_is_pretty() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn telemetry_backend_default_is_console() {
        assert_eq!(TelemetryBackend::default(), TelemetryBackend::Console);
    }

    #[test]
    fn backend_kind_parses_all_tokens() {
        assert_eq!("console".parse::<BackendKind>().unwrap(), BackendKind::Console);
        assert_eq!("jsonl".parse::<BackendKind>().unwrap(), BackendKind::Jsonl);
        assert_eq!(
            "cloudlogging".parse::<BackendKind>().unwrap(),
            BackendKind::CloudLogging
        );
        assert_eq!("disabled".parse::<BackendKind>().unwrap(), BackendKind::Disabled);
    }

    #[test]
    fn backend_kind_parse_is_case_insensitive_and_trimmed() {
        assert_eq!(" JSONL ".parse::<BackendKind>().unwrap(), BackendKind::Jsonl);
    }

    #[test]
    fn unknown_token_is_config_error() {
        let err = TelemetryBackend::from_token("syslog", &BackendOptions::default()).unwrap_err();

        assert!(matches!(err, TelemetryError::Config(_)));
        assert!(err.to_string().contains("syslog"));
    }

    #[test]
    fn jsonl_without_path_is_config_error() {
        let err = TelemetryBackend::from_token("jsonl", &BackendOptions::default()).unwrap_err();

        assert!(matches!(err, TelemetryError::Config(_)));
    }

    #[test]
    fn jsonl_with_path_selects_file_backend() {
        let options = BackendOptions::default().with_log_file("/tmp/app.jsonl");

        let backend = TelemetryBackend::from_token("jsonl", &options).unwrap();

        assert_eq!(backend, TelemetryBackend::Jsonl(JsonlConfig::new("/tmp/app.jsonl")));
        assert_eq!(backend.kind(), BackendKind::Jsonl);
    }

    #[test]
    fn cloudlogging_without_project_is_config_error() {
        let options = BackendOptions::default().with_project_id("  ");

        let err = TelemetryBackend::from_token("cloudlogging", &options).unwrap_err();

        assert!(matches!(err, TelemetryError::Config(_)));
    }

    #[cfg(feature = "telemetry-gcp")]
    #[test]
    fn cloudlogging_with_project_selects_gcp() {
        let options = BackendOptions::default()
            .with_project_id("fit-prod")
            .with_environment("staging");

        let backend = TelemetryBackend::from_token("cloudlogging", &options).unwrap();

        match backend {
            TelemetryBackend::CloudLogging(gcp) => {
                assert_eq!(gcp.project_id, "fit-prod");
                assert_eq!(gcp.environment, "staging");
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn disabled_and_console_need_no_options() {
        let options = BackendOptions::default();

        assert_eq!(
            TelemetryBackend::from_token("disabled", &options).unwrap(),
            TelemetryBackend::Disabled
        );
        assert_eq!(
            TelemetryBackend::from_token("console", &options).unwrap(),
            TelemetryBackend::Console
        );
    }

    #[test]
    fn config_new_sets_defaults() {
        let config = TelemetryConfig::new("test-service", "1.0.0");

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.service_version, "1.0.0");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.backend, TelemetryBackend::Console);
        assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn config_with_methods_chain() {
        let config = TelemetryConfig::new("svc", "1.0")
            .with_log_level("debug")
            .with_log_format(LogFormat::Json)
            .with_backend(TelemetryBackend::Disabled)
            .with_shutdown_timeout(Duration::from_millis(250));

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.backend, TelemetryBackend::Disabled);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
    }

    #[test]
    fn builder_sets_all_fields() {
        let config = TelemetryConfigBuilder::default()
            .service_name("my-service")
            .service_version("2.0.0")
            .log_level("warn")
            .jsonl("/var/log/app.jsonl")
            .json()
            .build();

        assert_eq!(config.service_name, "my-service");
        assert_eq!(config.service_version, "2.0.0");
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.backend.kind(), BackendKind::Jsonl);
    }

    #[test]
    fn builder_uses_defaults_when_not_set() {
        let config = TelemetryConfig::builder().build();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.backend, TelemetryBackend::Console);
    }

    #[test]
    #[serial]
    fn backend_from_env_defaults_to_console() {
        let _guard = EnvGuard::new(BACKEND_VARS);

        let backend = TelemetryBackend::from_env().unwrap();

        assert_eq!(backend, TelemetryBackend::Console);
    }

    #[test]
    #[serial]
    fn backend_from_env_reads_token_and_file() {
        let _guard = EnvGuard::new(BACKEND_VARS);
        env::set_var("TELEMETRY_BACKEND", "jsonl");
        env::set_var("TELEMETRY_LOG_FILE", "/tmp/telemetry.jsonl");

        let backend = TelemetryBackend::from_env().unwrap();

        assert_eq!(
            backend,
            TelemetryBackend::Jsonl(JsonlConfig::new("/tmp/telemetry.jsonl"))
        );
    }

    #[test]
    #[serial]
    fn backend_from_env_rejects_unknown_token() {
        let _guard = EnvGuard::new(BACKEND_VARS);
        env::set_var("TELEMETRY_BACKEND", "kafka");

        assert!(matches!(
            TelemetryBackend::from_env(),
            Err(TelemetryError::Config(_))
        ));
    }

    #[cfg(feature = "telemetry-gcp")]
    #[test]
    #[serial]
    fn backend_from_env_auto_detects_gcp() {
        let _guard = EnvGuard::new(BACKEND_VARS);
        env::set_var("GOOGLE_CLOUD_PROJECT", "auto-detect-project");

        let backend = TelemetryBackend::from_env().unwrap();

        assert_eq!(backend.kind(), BackendKind::CloudLogging);
    }

    #[test]
    #[serial]
    fn explicit_token_overrides_gcp_detection() {
        let _guard = EnvGuard::new(BACKEND_VARS);
        env::set_var("GOOGLE_CLOUD_PROJECT", "some-project");
        env::set_var("TELEMETRY_BACKEND", "disabled");

        assert_eq!(TelemetryBackend::from_env().unwrap(), TelemetryBackend::Disabled);
    }

    #[test]
    #[serial]
    fn config_from_env_reads_format_and_timeout() {
        let _guard = EnvGuard::new(BACKEND_VARS);
        env::set_var("LOG_FORMAT", "json");
        env::set_var("TELEMETRY_SHUTDOWN_TIMEOUT_SECS", "2");

        let config = TelemetryConfig::from_env().unwrap();

        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn config_from_env_rejects_bad_timeout() {
        let _guard = EnvGuard::new(BACKEND_VARS);
        env::set_var("TELEMETRY_SHUTDOWN_TIMEOUT_SECS", "soon");

        assert!(matches!(
            TelemetryConfig::from_env(),
            Err(TelemetryError::Config(_))
        ));
    }
}
