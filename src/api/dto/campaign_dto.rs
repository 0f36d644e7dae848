//! Campaign DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{CampaignId, CampaignStatus, NewCampaign};
use crate::service::CampaignAudit;

/// Request body for `POST /api/campaigns`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCampaignRequest {
    /// Display name.
    pub name: String,
    /// Long description.
    #[serde(default)]
    pub description: String,
    /// Fundraising goal in the smallest currency unit.
    pub target_amount: u64,
    /// Optional closing date.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Initial status. Defaults to `preparing`.
    #[serde(default)]
    pub status: CampaignStatus,
}

impl From<CreateCampaignRequest> for NewCampaign {
    fn from(req: CreateCampaignRequest) -> Self {
        Self {
            name: req.name,
            description: req.description,
            target_amount: req.target_amount,
            end_date: req.end_date,
            status: req.status,
        }
    }
}

/// Response body for `GET /api/campaigns/{id}/audit`.
#[derive(Debug, Serialize, ToSchema)]
pub struct CampaignAuditResponse {
    /// Campaign audited.
    pub campaign_id: CampaignId,
    /// Running total maintained by the ledger.
    pub running_total: u64,
    /// Sum of the campaign's `SUCCESSFUL` donations.
    pub recomputed_total: u64,
    /// Whether the two agree.
    pub consistent: bool,
    /// When the audit ran.
    pub audited_at: DateTime<Utc>,
}

impl From<CampaignAudit> for CampaignAuditResponse {
    fn from(audit: CampaignAudit) -> Self {
        Self {
            campaign_id: audit.campaign_id,
            running_total: audit.running_total,
            recomputed_total: audit.recomputed_total,
            consistent: audit.consistent,
            audited_at: audit.audited_at,
        }
    }
}
