//! Operator authorization middleware.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::app_state::AppState;
use crate::error::LedgerError;
use crate::gateway::signing::constant_time_eq;

/// Requires `Authorization: Bearer <ADMIN_API_TOKEN>`.
///
/// # Errors
///
/// [`LedgerError::Forbidden`] when no operator token is configured, and
/// [`LedgerError::Unauthorized`] when the header is missing or wrong.
pub async fn require_operator(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, LedgerError> {
    let Some(expected) = state.admin_token.as_ref() else {
        return Err(LedgerError::Forbidden(
            "operator routes are disabled".to_string(),
        ));
    };

    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| constant_time_eq(token.trim().as_bytes(), expected.reveal().as_bytes()));

    match authorized {
        Some(true) => Ok(next.run(request).await),
        Some(false) => {
            tracing::warn!(path = %request.uri().path(), "operator token rejected");
            Err(LedgerError::Unauthorized("invalid operator token".to_string()))
        }
        None => Err(LedgerError::Unauthorized(
            "missing bearer token".to_string(),
        )),
    }
}
