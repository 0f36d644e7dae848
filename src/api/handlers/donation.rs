//! Donation management handlers: lookups, listings, statistics, overrides.

use std::str::FromStr;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;

use crate::api::dto::{
    CampaignDonationSummary, CampaignDonationsQuery, CampaignDto, DonationDetailResponse,
    DonationDto, DonationListResponse, DonationResponse, DonorDonationsQuery, PaginationMeta,
    StatsQuery, StatusOverrideRequest,
};
use crate::app_state::AppState;
use crate::domain::{CampaignId, DonationId, DonationStatus};
use crate::error::{ErrorResponse, LedgerError};
use crate::persistence::DonationStats;

/// `GET /api/zalopay/donation/{id}` — Donation by transaction code.
///
/// # Errors
///
/// Returns [`LedgerError::NotFound`] for an unknown code.
#[utoipa::path(
    get,
    path = "/api/zalopay/donation/{id}",
    tag = "Donations",
    summary = "Get a donation",
    description = "Returns the donation with its campaign. The donor is hidden for anonymous donations.",
    params(
        ("id" = String, Path, description = "Transaction code of the donation"),
    ),
    responses(
        (status = 200, description = "Donation found", body = DonationDetailResponse),
        (status = 404, description = "Unknown transaction code", body = ErrorResponse),
    )
)]
pub async fn get_donation(
    State(state): State<AppState>,
    Path(transaction_code): Path<String>,
) -> Result<impl IntoResponse, LedgerError> {
    let (donation, campaign) = state.zalopay.donation_by_code(&transaction_code).await?;
    Ok(Json(DonationDetailResponse {
        donation: DonationDto::public(donation),
        campaign: campaign.map(CampaignDto::from),
    }))
}

/// `PATCH /api/zalopay/donation/{id}/status` — Force a status (operator).
///
/// # Errors
///
/// Returns [`LedgerError`] for an unknown status or donation, a transition
/// the status machine forbids, or a failed gateway refund.
#[utoipa::path(
    patch,
    path = "/api/zalopay/donation/{id}/status",
    tag = "Donations",
    summary = "Override a donation status",
    description = "Moves the donation to `status` with the same campaign effects as the automatic paths. `REFUNDED` calls the gateway refund first. Requesting the current status is a no-op.",
    params(
        ("id" = uuid::Uuid, Path, description = "Donation UUID"),
    ),
    request_body = StatusOverrideRequest,
    security(("operator_token" = [])),
    responses(
        (status = 200, description = "Status applied", body = DonationResponse),
        (status = 400, description = "Invalid status", body = ErrorResponse),
        (status = 401, description = "Missing or invalid operator token", body = ErrorResponse),
        (status = 404, description = "Donation not found", body = ErrorResponse),
        (status = 409, description = "Transition not allowed", body = ErrorResponse),
    )
)]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<DonationId>,
    Json(req): Json<StatusOverrideRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let Some(raw) = req.status else {
        return Err(LedgerError::Validation("status is required".to_string()));
    };
    let target = DonationStatus::from_str(raw.trim()).map_err(|_| {
        let valid = DonationStatus::ALL.map(|s| s.as_str()).join(", ");
        LedgerError::Validation(format!("invalid status {raw:?}, expected one of: {valid}"))
    })?;

    let donation = state.override_status(id, target).await?;
    Ok(Json(DonationResponse {
        message: format!("status is {}", donation.status),
        donation: DonationDto::full(donation),
    }))
}

/// `DELETE /api/zalopay/donation/{id}` — Delete an unsettled donation (operator).
///
/// # Errors
///
/// Returns [`LedgerError::NotFound`] for an unknown donation and
/// [`LedgerError::Conflict`] for a `SUCCESSFUL` or `REFUNDED` one.
#[utoipa::path(
    delete,
    path = "/api/zalopay/donation/{id}",
    tag = "Donations",
    summary = "Delete a donation",
    description = "Deletes a PENDING or FAILED donation. Settled donations are part of the ledger and cannot be deleted.",
    params(
        ("id" = uuid::Uuid, Path, description = "Donation UUID"),
    ),
    security(("operator_token" = [])),
    responses(
        (status = 200, description = "Donation deleted", body = DonationResponse),
        (status = 401, description = "Missing or invalid operator token", body = ErrorResponse),
        (status = 404, description = "Donation not found", body = ErrorResponse),
        (status = 409, description = "Donation is settled", body = ErrorResponse),
    )
)]
pub async fn delete_donation(
    State(state): State<AppState>,
    Path(id): Path<DonationId>,
) -> Result<impl IntoResponse, LedgerError> {
    let donation = state.zalopay.delete_donation(id).await?;
    Ok(Json(DonationResponse {
        message: "donation deleted".to_string(),
        donation: DonationDto::full(donation),
    }))
}

/// `GET /api/zalopay/donations/campaign/{campaign_id}` — Campaign donations.
///
/// # Errors
///
/// Returns [`LedgerError::NotFound`] for an unknown campaign.
#[utoipa::path(
    get,
    path = "/api/zalopay/donations/campaign/{campaign_id}",
    tag = "Donations",
    summary = "List a campaign's donations",
    description = "Paginated, newest first. Defaults to SUCCESSFUL donations; anonymous donations are listed only with `include_anonymous`, and their donor is hidden.",
    params(
        ("campaign_id" = uuid::Uuid, Path, description = "Campaign UUID"),
        CampaignDonationsQuery,
    ),
    responses(
        (status = 200, description = "Donation page", body = DonationListResponse),
        (status = 404, description = "Campaign not found", body = ErrorResponse),
    )
)]
pub async fn campaign_donations(
    State(state): State<AppState>,
    Path(campaign_id): Path<CampaignId>,
    Query(params): Query<CampaignDonationsQuery>,
) -> Result<impl IntoResponse, LedgerError> {
    let status = params.status.unwrap_or(DonationStatus::Successful);
    let (page, successful_total) = state
        .zalopay
        .campaign_donations(campaign_id, Some(status), params.include_anonymous, params.page())
        .await?;

    Ok(Json(DonationListResponse {
        pagination: PaginationMeta::new(page.page, page.total),
        summary: Some(CampaignDonationSummary {
            total_amount: successful_total,
            total_donations: page.total,
        }),
        donations: page.donations.into_iter().map(DonationDto::public).collect(),
    }))
}

/// `GET /api/zalopay/donations/user/{donor_id}` — A donor's donations.
///
/// # Errors
///
/// Returns [`LedgerError`] if the store fails.
#[utoipa::path(
    get,
    path = "/api/zalopay/donations/user/{donor_id}",
    tag = "Donations",
    summary = "List a donor's donations",
    description = "Paginated, newest first, optionally filtered by status. Anonymous donations are included.",
    params(
        ("donor_id" = String, Path, description = "Donor reference"),
        DonorDonationsQuery,
    ),
    responses(
        (status = 200, description = "Donation page", body = DonationListResponse),
    )
)]
pub async fn donor_donations(
    State(state): State<AppState>,
    Path(donor_id): Path<String>,
    Query(params): Query<DonorDonationsQuery>,
) -> Result<impl IntoResponse, LedgerError> {
    let page = state
        .zalopay
        .donor_donations(&donor_id, params.status, params.page())
        .await?;

    Ok(Json(DonationListResponse {
        pagination: PaginationMeta::new(page.page, page.total),
        summary: None,
        donations: page.donations.into_iter().map(DonationDto::full).collect(),
    }))
}

/// `GET /api/zalopay/donations/stats` — Aggregates per status and method.
///
/// # Errors
///
/// Returns [`LedgerError::Validation`] for an inverted date range.
#[utoipa::path(
    get,
    path = "/api/zalopay/donations/stats",
    tag = "Donations",
    summary = "Donation statistics",
    description = "Count, total and average amount per status, and count and total per payment method. Optionally restricted to one campaign and a creation date range.",
    params(StatsQuery),
    responses(
        (status = 200, description = "Statistics", body = DonationStats),
        (status = 400, description = "Invalid date range", body = ErrorResponse),
    )
)]
pub async fn stats(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Result<impl IntoResponse, LedgerError> {
    let stats = state
        .zalopay
        .stats(params.campaign_id, params.start_date, params.end_date)
        .await?;
    Ok(Json(stats))
}
