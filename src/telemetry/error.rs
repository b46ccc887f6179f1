use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Exporter error: {0}")]
    Exporter(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Initialization error: {0}")]
    Init(String),
    #[error("Telemetry is already configured; shut down the active context first")]
    AlreadyConfigured,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_message_is_prefixed() {
        let err = TelemetryError::Config("unknown backend 'syslog'".to_string());

        assert_eq!(err.to_string(), "Configuration error: unknown backend 'syslog'");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");

        let err: TelemetryError = io.into();

        assert!(matches!(err, TelemetryError::Io(_)));
    }
}
