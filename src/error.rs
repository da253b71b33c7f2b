/// Unified error types for the Toolshub gateway
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Database errors (account store or usage ledger unreachable)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors (bad credential, invalid/missing key, unverified)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Validation errors (malformed input, caller's fault)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors (unknown email/account)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (verified duplicate registration, duplicate key generation)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Quota exhausted - a resource-limit condition, not an identity failure
    #[error("API hit limit exceeded")]
    QuotaExceeded { hit_count: i64, hit_limit: i64 },

    /// Verification code delivery failed
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response format
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hits_remaining: Option<i64>,
}

impl ErrorResponse {
    fn new(error: &str, message: String) -> Self {
        Self {
            error: error.to_string(),
            message,
            hit_count: None,
            hit_limit: None,
            hits_remaining: None,
        }
    }
}

/// Convert GatewayError to HTTP response
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            GatewayError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("AuthenticationFailed", self.to_string()),
            ),
            GatewayError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("InvalidRequest", self.to_string()),
            ),
            GatewayError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("NotFound", self.to_string()),
            ),
            GatewayError::Conflict(_) => (
                StatusCode::CONFLICT,
                ErrorResponse::new("Conflict", self.to_string()),
            ),
            // Callers must be able to tell quota exhaustion apart from auth
            // failures, so it carries its own kind and the usage numbers.
            GatewayError::QuotaExceeded {
                hit_count,
                hit_limit,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse {
                    error: "QuotaExceeded".to_string(),
                    message: "API hit limit exceeded".to_string(),
                    hit_count: Some(hit_count),
                    hit_limit: Some(hit_limit),
                    hits_remaining: Some(0),
                },
            ),
            GatewayError::Delivery(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("DeliveryFailed", self.to_string()),
            ),
            GatewayError::Jwt(_) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("AuthenticationFailed", self.to_string()),
            ),
            GatewayError::Database(_) | GatewayError::Internal(_) | GatewayError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                // Don't leak details
                ErrorResponse::new("InternalServerError", "Internal server error".to_string()),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_maps_to_429() {
        let err = GatewayError::QuotaExceeded {
            hit_count: 1000,
            hit_limit: 1000,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn auth_and_quota_errors_are_distinguishable() {
        let auth = GatewayError::Authentication("Invalid API key".to_string()).into_response();
        let quota = GatewayError::QuotaExceeded {
            hit_count: 5,
            hit_limit: 5,
        }
        .into_response();
        assert_eq!(auth.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(quota.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = GatewayError::Internal("secret connection string".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
