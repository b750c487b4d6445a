//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **AppError**: failures of the HTTP surface (health, stats, config routes).
//!   These convert into JSON HTTP responses through actix's `ResponseError`.
//! - **RelayError**: failures of the translation relay itself. These never become
//!   HTTP responses; the gateway turns them into an `error` event sent only to the
//!   connection that caused them.
//!
//! Provider-level failures (`ProviderError`) stay inside a provider chain. They
//! trigger fallback to the next provider and only surface as
//! `RelayError::ServiceUnavailable` once every provider has been tried.
//!
//! ## Key Rust Concepts:
//! - **enum**: Each variant is one failure category, optionally carrying data
//! - **Display trait**: Human-readable message for logs and clients
//! - **From trait**: Lets `?` convert library errors into our own types

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait
use std::time::Duration;

/// Errors returned by the HTTP routes.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

/// Converts route errors into JSON responses of the form:
/// ```json
/// { "error": { "type": "not_found", "message": "...", "timestamp": "..." } }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Route handlers only serialize values they built themselves, so a failure
/// here is on the server side.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Errors a relay operation can report back to the originating connection.
///
/// ## Delivery rule:
/// Every variant is delivered only to the sender of the event that failed,
/// never broadcast to the room.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Missing or malformed required fields. Rejected before any side effect.
    InvalidInput(String),

    /// The connection exhausted its request quota for the current window.
    RateLimitExceeded,

    /// Every provider of a capability failed or timed out.
    ServiceUnavailable {
        /// Which capability gave up ("transcription", "translation", "speech synthesis")
        capability: String,
        /// Last provider error seen, for logs
        detail: String,
    },
}

impl RelayError {
    /// Machine-readable code used in outbound `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidInput(_) => "invalid_input",
            RelayError::RateLimitExceeded => "rate_limited",
            RelayError::ServiceUnavailable { .. } => "service_unavailable",
        }
    }

    /// Message shown to the user. Provider internals are not leaked.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::InvalidInput(msg) => msg.clone(),
            RelayError::RateLimitExceeded => {
                "You're speaking too fast. Please slow down.".to_string()
            }
            RelayError::ServiceUnavailable { capability, .. } => {
                format!("The {} service is unavailable right now. Please try again.", capability)
            }
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            RelayError::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            RelayError::ServiceUnavailable { capability, detail } => {
                write!(f, "{} unavailable: {}", capability, detail)
            }
        }
    }
}

impl std::error::Error for RelayError {}

/// Failure of a single provider attempt inside a chain.
///
/// A timeout and an error are handled identically by the chain: both move on
/// to the next provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The attempt did not finish before the chain's deadline.
    Timeout(Duration),

    /// The provider answered with an error or an unusable response.
    Failure(String),
}

impl ProviderError {
    pub fn failure(msg: impl Into<String>) -> Self {
        ProviderError::Failure(msg.into())
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            ProviderError::Failure(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

/// HTTP client errors from provider backends become plain failures.
impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Failure(format!("HTTP error: {}", err))
    }
}

/// Shorthand for results of HTTP route handlers.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_codes() {
        assert_eq!(RelayError::InvalidInput("x".into()).code(), "invalid_input");
        assert_eq!(RelayError::RateLimitExceeded.code(), "rate_limited");
        let unavailable = RelayError::ServiceUnavailable {
            capability: "translation".into(),
            detail: "boom".into(),
        };
        assert_eq!(unavailable.code(), "service_unavailable");
        // Provider detail stays in logs, not in the user-facing message
        assert!(!unavailable.user_message().contains("boom"));
        assert!(unavailable.to_string().contains("boom"));
    }

    #[test]
    fn test_app_error_status() {
        let response = AppError::NotFound("room".into()).error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::NOT_FOUND);

        let response = AppError::BadRequest("bad".into()).error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let err: AppError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.error_response().status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_provider_timeout_display() {
        let err = ProviderError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timed out after 1500ms");
    }
}
