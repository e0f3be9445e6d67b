//! Weather provider abstraction.
//!
//! Every upstream weather API is wrapped in an adapter implementing
//! [`WeatherProvider`]. Adapters differ only in endpoint shape and response
//! transformation; the resolver treats them uniformly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use thiserror::Error;

use crate::services::weather::{ValidationError, WeatherRecord};

/// Maximum number of response body bytes kept in error messages.
const MAX_ERROR_BODY: usize = 200;

/// Failure of a single provider call. Recoverable by falling back to the
/// next provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Upstream answered with an error status (e.g. 429 rate limit, 401 auth).
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    /// Upstream answered 2xx but the payload is unusable.
    #[error("Invalid provider payload: {0}")]
    Data(String),
    /// The transformed record failed range checks.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The call did not complete within the configured timeout.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    /// The request could not be sent (DNS, connect, TLS).
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Build an HTTP error from a status and (possibly long) response body.
    pub fn http(status: reqwest::StatusCode, body: &str) -> Self {
        ProviderError::Http {
            status: status.as_u16(),
            message: truncate_body(body),
        }
    }
}

/// A named weather data source.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Stable provider name, reported in records and logs.
    fn name(&self) -> &str;

    /// Whether the provider can currently be used (e.g. credentials present).
    async fn is_available(&self) -> bool;

    /// Fetch weather for a location at (or closest to) `time`.
    async fn get_weather(
        &self,
        lat: f64,
        lon: f64,
        elevation: Option<f64>,
        time: DateTime<Utc>,
    ) -> Result<WeatherRecord, ProviderError>;
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    // Cut on a char boundary
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_keeps_status() {
        let err = ProviderError::http(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(
            err,
            ProviderError::Http {
                status: 429,
                message: "slow down".to_string()
            }
        );
        assert_eq!(err.to_string(), "HTTP 429: slow down");
    }

    #[test]
    fn test_long_body_truncated() {
        let body = "x".repeat(500);
        let err = ProviderError::http(reqwest::StatusCode::UNAUTHORIZED, &body);
        match err {
            ProviderError::Http { message, .. } => {
                assert!(message.ends_with("..."));
                assert_eq!(message.len(), MAX_ERROR_BODY + 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let body = "é".repeat(150); // 300 bytes
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
    }
}
