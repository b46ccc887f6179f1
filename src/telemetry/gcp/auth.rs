use std::fmt;
use std::sync::Arc;

use gcp_auth::TokenProvider;

use crate::telemetry::error::TelemetryError;
use crate::telemetry::gcp::config::GcpCredentials;

const LOGGING_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/logging.write";

/// Source of the Authorization header for Logging API requests
#[derive(Clone)]
pub enum GcpAuth {
    Adc(Arc<dyn TokenProvider>),
    Anonymous,
}

impl fmt::Debug for GcpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adc(_) => f.write_str("GcpAuth::Adc"),
            Self::Anonymous => f.write_str("GcpAuth::Anonymous"),
        }
    }
}

impl GcpAuth {
    /// Resolve credentials at configure time so a missing ADC setup fails fast
    pub async fn resolve(credentials: GcpCredentials) -> Result<Self, TelemetryError> {
        match credentials {
            GcpCredentials::Anonymous => Ok(Self::Anonymous),
            GcpCredentials::ApplicationDefault => {
                let provider = gcp_auth::provider().await.map_err(|e| {
                    TelemetryError::Auth(format!("Failed to create auth provider: {}", e))
                })?;
                Ok(Self::Adc(provider))
            }
        }
    }

    /// Bearer header value, or None when anonymous. Tokens are cached and
    /// refreshed by the provider.
    pub async fn authorization(&self) -> Result<Option<String>, TelemetryError> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Adc(provider) => {
                let token = provider
                    .token(&[LOGGING_WRITE_SCOPE])
                    .await
                    .map_err(|e| TelemetryError::Auth(format!("Failed to get token: {}", e)))?;
                Ok(Some(format!("Bearer {}", token.as_str())))
            }
        }
    }
}
