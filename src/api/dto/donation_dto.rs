//! Donation management DTOs: lookups, listings, statistics and overrides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::{CampaignDto, DonationDto, PaginationMeta, default_limit, default_page};
use crate::domain::{CampaignId, DonationStatus};
use crate::persistence::Page;

/// Response body for `GET /api/zalopay/donation/{transaction_code}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct DonationDetailResponse {
    /// The donation, donor hidden when anonymous.
    pub donation: DonationDto,
    /// Campaign the donation belongs to.
    pub campaign: Option<CampaignDto>,
}

/// Query parameters for `GET /api/zalopay/donations/campaign/{campaign_id}`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CampaignDonationsQuery {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 10.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Status filter. Defaults to `SUCCESSFUL`.
    #[serde(default)]
    pub status: Option<DonationStatus>,
    /// Include anonymous donations (donor hidden).
    #[serde(default)]
    pub include_anonymous: bool,
}

impl CampaignDonationsQuery {
    /// Clamped page.
    #[must_use]
    pub fn page(&self) -> Page {
        Page::new(self.page, self.limit)
    }
}

/// Query parameters for `GET /api/zalopay/donations/user/{donor_id}`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DonorDonationsQuery {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 10.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Optional status filter.
    #[serde(default)]
    pub status: Option<DonationStatus>,
}

impl DonorDonationsQuery {
    /// Clamped page.
    #[must_use]
    pub fn page(&self) -> Page {
        Page::new(self.page, self.limit)
    }
}

/// Summary attached to a campaign listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct CampaignDonationSummary {
    /// Sum of the campaign's `SUCCESSFUL` donations.
    pub total_amount: u64,
    /// Donations matching the listing filter.
    pub total_donations: u64,
}

/// Response body for donation listings.
#[derive(Debug, Serialize, ToSchema)]
pub struct DonationListResponse {
    /// Donations on this page.
    pub donations: Vec<DonationDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
    /// Campaign totals, for campaign listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CampaignDonationSummary>,
}

/// Query parameters for `GET /api/zalopay/donations/stats`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatsQuery {
    /// Restrict to one campaign.
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    /// Created at or after (RFC 3339).
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Created at or before (RFC 3339).
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// Request body for `PATCH /api/zalopay/donation/{id}/status`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StatusOverrideRequest {
    /// Target status: `PENDING`, `SUCCESSFUL`, `FAILED` or `REFUNDED`.
    #[serde(default)]
    pub status: Option<String>,
}

/// Response body for status overrides and deletes.
#[derive(Debug, Serialize, ToSchema)]
pub struct DonationResponse {
    /// Human-readable outcome.
    pub message: String,
    /// The donation after the operation.
    pub donation: DonationDto,
}
