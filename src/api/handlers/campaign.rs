//! Campaign handlers: create, get, audit.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::api::dto::{CampaignAuditResponse, CampaignDto, CreateCampaignRequest};
use crate::app_state::AppState;
use crate::domain::CampaignId;
use crate::error::{ErrorResponse, LedgerError};

/// `POST /api/campaigns` — Create a campaign.
///
/// # Errors
///
/// Returns [`LedgerError::Validation`] for an empty name or a zero target.
#[utoipa::path(
    post,
    path = "/api/campaigns",
    tag = "Campaigns",
    summary = "Create a campaign",
    description = "Creates a campaign with a zero running total.",
    request_body = CreateCampaignRequest,
    responses(
        (status = 201, description = "Campaign created", body = CampaignDto),
        (status = 400, description = "Invalid campaign", body = ErrorResponse),
    )
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let campaign = state.zalopay.create_campaign(req.into()).await?;
    Ok((StatusCode::CREATED, Json(CampaignDto::from(campaign))))
}

/// `GET /api/campaigns/{id}` — Get a campaign.
///
/// # Errors
///
/// Returns [`LedgerError::NotFound`] for an unknown campaign.
#[utoipa::path(
    get,
    path = "/api/campaigns/{id}",
    tag = "Campaigns",
    summary = "Get a campaign",
    params(
        ("id" = uuid::Uuid, Path, description = "Campaign UUID"),
    ),
    responses(
        (status = 200, description = "Campaign found", body = CampaignDto),
        (status = 404, description = "Campaign not found", body = ErrorResponse),
    )
)]
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> Result<impl IntoResponse, LedgerError> {
    let campaign = state.zalopay.require_campaign(id).await?;
    Ok(Json(CampaignDto::from(campaign)))
}

/// `GET /api/campaigns/{id}/audit` — Recompute the running total (operator).
///
/// # Errors
///
/// Returns [`LedgerError::NotFound`] for an unknown campaign.
#[utoipa::path(
    get,
    path = "/api/campaigns/{id}/audit",
    tag = "Campaigns",
    summary = "Audit a campaign total",
    description = "Sums the campaign's SUCCESSFUL donations and compares the result with its running total.",
    params(
        ("id" = uuid::Uuid, Path, description = "Campaign UUID"),
    ),
    security(("operator_token" = [])),
    responses(
        (status = 200, description = "Audit result", body = CampaignAuditResponse),
        (status = 401, description = "Missing or invalid operator token", body = ErrorResponse),
        (status = 404, description = "Campaign not found", body = ErrorResponse),
    )
)]
pub async fn audit_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> Result<impl IntoResponse, LedgerError> {
    let audit = state.zalopay.audit_campaign(id).await?;
    Ok(Json(CampaignAuditResponse::from(audit)))
}
