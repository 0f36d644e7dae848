//! Campaign record with its running donation total.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::CampaignId;
use super::donation::UnknownVariant;

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Created, not yet open.
    #[default]
    Preparing,
    /// Accepting donations.
    Active,
    /// Closed. New orders are refused.
    Ended,
}

impl CampaignStatus {
    /// Returns the canonical lower-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparing" => Ok(Self::Preparing),
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A fundraising goal.
///
/// `current_total` is owned by the donation ledger: it always equals the sum
/// of the amounts of the campaign's `SUCCESSFUL` donations, and is maintained
/// by additive updates applied together with each status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Record identifier.
    pub id: CampaignId,
    /// Display name.
    pub name: String,
    /// Long description.
    pub description: String,
    /// Fundraising goal in the smallest currency unit.
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

impl Campaign {
    /// Returns `true` if new donation orders may be placed.
    #[must_use]
    pub fn accepts_donations(&self, now: DateTime<Utc>) -> bool {
        self.status != CampaignStatus::Ended && self.end_date.is_none_or(|end| end > now)
    }
}

/// Input for creating a campaign. The running total always starts at zero.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    /// Display name.
    pub name: String,
    /// Long description.
    pub description: String,
    /// Fundraising goal in the smallest currency unit.
    pub target_amount: u64,
    /// Optional closing date.
    pub end_date: Option<DateTime<Utc>>,
    /// Initial status.
    pub status: CampaignStatus,
}

impl NewCampaign {
    /// Materializes the record as it is first persisted.
    #[must_use]
    pub fn into_campaign(self, id: CampaignId, now: DateTime<Utc>) -> Campaign {
        Campaign {
            id,
            name: self.name,
            description: self.description,
            target_amount: self.target_amount,
            current_total: 0,
            end_date: self.end_date,
            status: self.status,
            created_at: now,
        }
    }
}
