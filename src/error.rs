//! Ledger error types with HTTP status code mapping.
//!
//! [`LedgerError`] is the central error type of the crate. Each variant maps
//! to a numeric error code, an HTTP status code, and a structured JSON error
//! response. Upstream and storage failures are rendered with an opaque
//! message; the detailed cause is only logged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Message shown to donors whenever the payment gateway fails.
pub const PAYMENT_RETRY_MESSAGE: &str = "payment could not be completed, please retry";

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: amount must be between 1000 and 5000000",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see the code ranges on [`LedgerError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category             | HTTP Status                      |
/// |-----------|----------------------|----------------------------------|
/// | 1000–1999 | Validation / auth    | 400 / 401 / 403                  |
/// | 2000–2999 | State / Not Found    | 404 Not Found / 409 Conflict     |
/// | 3000–3999 | Server               | 500 Internal Server Error        |
/// | 4000–4999 | Callback integrity   | 400 / 422                        |
/// | 5000–5999 | Payment gateway      | 400 / 500 / 504                  |
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Bad or missing input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Unknown campaign, donation, or transaction code.
    #[error("not found: {0}")]
    NotFound(String),

    /// Attempted status transition is not allowed from the current status.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing or invalid operator credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Operator routes are closed because no operator token is configured.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Callback signature did not verify. Never says which part failed.
    #[error("signature verification failed")]
    Signature,

    /// Callback amount disagrees with the stored donation amount.
    #[error("amount mismatch: stored {expected}, callback reported {received}")]
    AmountMismatch {
        /// Amount stored on the donation.
        expected: u64,
        /// Amount reported by the gateway.
        received: u64,
    },

    /// A transaction code collided with an existing donation.
    #[error("duplicate transaction code: {0}")]
    DuplicateTransactionCode(String),

    /// Transport or protocol failure talking to the gateway.
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// The gateway did not answer within the configured timeout.
    #[error("payment gateway timed out")]
    GatewayTimeout,

    /// The gateway answered with a business failure.
    #[error("payment gateway rejected the request ({code}): {message}")]
    GatewayRejected {
        /// Gateway-specific return code.
        code: i64,
        /// Gateway-provided reason.
        message: String,
    },

    /// Storage layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A status transition and its campaign adjustment could not be applied
    /// together. Requires operator attention.
    #[error("ledger split: {0}")]
    LedgerSplit(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Validation(_) => 1001,
            Self::Unauthorized(_) => 1002,
            Self::Forbidden(_) => 1003,
            Self::NotFound(_) => 2001,
            Self::Conflict(_) => 2002,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::DuplicateTransactionCode(_) => 3002,
            Self::LedgerSplit(_) => 3003,
            Self::Signature => 4001,
            Self::AmountMismatch { .. } => 4002,
            Self::Gateway(_) => 5001,
            Self::GatewayTimeout => 5002,
            Self::GatewayRejected { .. } => 5003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Signature | Self::GatewayRejected { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::AmountMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Gateway(_)
            | Self::Persistence(_)
            | Self::DuplicateTransactionCode(_)
            | Self::LedgerSplit(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if the donor may simply try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(_) | Self::GatewayTimeout)
    }

    /// Message safe to show to the caller. Upstream and server failures are
    /// collapsed into opaque messages.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Gateway(_) | Self::GatewayTimeout => PAYMENT_RETRY_MESSAGE.to_string(),
            Self::Persistence(_)
            | Self::DuplicateTransactionCode(_)
            | Self::LedgerSplit(_)
            | Self::Internal(_) => "internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for LedgerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Persistence(format!("migration failed: {err}"))
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.error_code(), "request rejected");
        }
        let details = match &self {
            Self::GatewayRejected { code, .. } => Some(format!("gateway return code {code}")),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.public_message(),
                details,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
