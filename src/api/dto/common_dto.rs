//! Shared DTO types used across multiple endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{
    Campaign, CampaignId, CampaignStatus, Donation, DonationId, DonationStatus, PaymentMethod,
};
use crate::persistence::Page;

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginationMeta {
    /// Current page number.
    pub page: u32,
    /// Items per page.
    pub limit: u32,
    /// Total number of items.
    pub total: u64,
    /// Total number of pages.
    pub total_pages: u64,
}

impl PaginationMeta {
    /// Builds the metadata for `page` out of `total` items.
    #[must_use]
    pub const fn new(page: Page, total: u64) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total,
            total_pages: total.div_ceil(page.limit as u64),
        }
    }
}

pub(crate) const fn default_page() -> u32 {
    1
}

pub(crate) const fn default_limit() -> u32 {
    10
}

/// Donation as returned by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DonationDto {
    /// Donation identifier.
    pub id: DonationId,
    /// Correlation key shared with the gateway.
    pub transaction_code: String,
    /// Donor reference; `null` for anonymous donations in public views.
    pub donor_id: Option<String>,
    /// Campaign receiving the funds.
    pub campaign_id: CampaignId,
    /// Amount in the smallest currency unit.
    pub amount: u64,
    /// ISO currency code.
    pub currency: String,
    /// Donor message.
    pub message: Option<String>,
    /// Gateway used.
    pub payment_method: PaymentMethod,
    /// Gateway-side transaction id.
    pub gateway_transaction_id: Option<String>,
    /// Lifecycle status.
    pub status: DonationStatus,
    /// Whether the donor asked to stay anonymous.
    pub is_anonymous: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl DonationDto {
    /// Public view: hides the donor of anonymous donations.
    #[must_use]
    pub fn public(donation: Donation) -> Self {
        let hide = donation.is_anonymous;
        let mut dto = Self::full(donation);
        if hide {
            dto.donor_id = None;
        }
        dto
    }

    /// Operator or owner view: every field.
    #[must_use]
    pub fn full(donation: Donation) -> Self {
        Self {
            id: donation.id,
            transaction_code: donation.transaction_code,
            donor_id: Some(donation.donor_id),
            campaign_id: donation.campaign_id,
            amount: donation.amount,
            currency: donation.currency,
            message: donation.message,
            payment_method: donation.payment_method,
            gateway_transaction_id: donation.gateway_transaction_id,
            status: donation.status,
            is_anonymous: donation.is_anonymous,
            created_at: donation.created_at,
            updated_at: donation.updated_at,
        }
    }
}

/// Campaign as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignDto {
    /// Campaign identifier.
    pub id: CampaignId,
    /// Display name.
    pub name: String,
    /// Long description.
    pub description: String,
    /// Fundraising goal.
    pub target_amount: u64,
    /// Running total of successful, non-refunded donations.
    pub current_total: u64,
    /// Optional closing date.
    pub end_date: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: CampaignStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignDto {
    fn from(campaign: Campaign) -> Self {
        Self {
            id: campaign.id,
            name: campaign.name,
            description: campaign.description,
            target_amount: campaign.target_amount,
            current_total: campaign.current_total,
            end_date: campaign.end_date,
            status: campaign.status,
            created_at: campaign.created_at,
        }
    }
}
