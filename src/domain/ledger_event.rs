//! Domain events reflecting applied ledger transitions.
//!
//! Every applied status transition emits a [`LedgerEvent`] through the
//! [`super::EventBus`]. Duplicate callbacks and rejected transitions emit
//! nothing.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::donation::PaymentMethod;
use super::{CampaignId, DonationId};

/// Domain event emitted after every applied donation transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A `PENDING` donation was recorded before contacting the gateway.
    DonationCreated {
        /// Donation identifier.
        donation_id: DonationId,
        /// Campaign receiving the donation.
        campaign_id: CampaignId,
        /// Correlation key sent to the gateway.
        transaction_code: String,
        /// Gateway used.
        payment_method: PaymentMethod,
        /// Amount in the smallest currency unit.
        amount: u64,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A donation moved `PENDING -> SUCCESSFUL` and the campaign was credited.
    DonationSucceeded {
        /// Donation identifier.
        donation_id: DonationId,
        /// Campaign credited.
        campaign_id: CampaignId,
        /// Correlation key.
        transaction_code: String,
        /// Amount credited.
        amount: u64,
        /// Campaign total after the credit.
        campaign_total: u64,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A donation moved `PENDING -> FAILED`.
    DonationFailed {
        /// Donation identifier.
        donation_id: DonationId,
        /// Campaign the donation was for.
        campaign_id: CampaignId,
        /// Correlation key.
        transaction_code: String,
        /// Short operator-facing reason.
        reason: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A donation moved `SUCCESSFUL -> REFUNDED` and the campaign was debited.
    DonationRefunded {
        /// Donation identifier.
        donation_id: DonationId,
        /// Campaign debited.
        campaign_id: CampaignId,
        /// Correlation key.
        transaction_code: String,
        /// Amount debited.
        amount: u64,
        /// Campaign total after the debit.
        campaign_total: u64,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// Returns the donation this event refers to.
    #[must_use]
    pub const fn donation_id(&self) -> DonationId {
        match self {
            Self::DonationCreated { donation_id, .. }
            | Self::DonationSucceeded { donation_id, .. }
            | Self::DonationFailed { donation_id, .. }
            | Self::DonationRefunded { donation_id, .. } => *donation_id,
        }
    }

    /// Returns the campaign this event refers to.
    #[must_use]
    pub const fn campaign_id(&self) -> CampaignId {
        match self {
            Self::DonationCreated { campaign_id, .. }
            | Self::DonationSucceeded { campaign_id, .. }
            | Self::DonationFailed { campaign_id, .. }
            | Self::DonationRefunded { campaign_id, .. } => *campaign_id,
        }
    }

    /// Campaign total after this event, for events that move it.
    #[must_use]
    pub const fn campaign_total(&self) -> Option<u64> {
        match self {
            Self::DonationSucceeded { campaign_total, .. }
            | Self::DonationRefunded { campaign_total, .. } => Some(*campaign_total),
            Self::DonationCreated { .. } | Self::DonationFailed { .. } => None,
        }
    }

    /// Returns the transaction code this event refers to.
    #[must_use]
    pub fn transaction_code(&self) -> &str {
        match self {
            Self::DonationCreated {
                transaction_code, ..
            }
            | Self::DonationSucceeded {
                transaction_code, ..
            }
            | Self::DonationFailed {
                transaction_code, ..
            }
            | Self::DonationRefunded {
                transaction_code, ..
            } => transaction_code,
        }
    }

    /// Returns the snake_case event type string.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::DonationCreated { .. } => "donation_created",
            Self::DonationSucceeded { .. } => "donation_succeeded",
            Self::DonationFailed { .. } => "donation_failed",
            Self::DonationRefunded { .. } => "donation_refunded",
        }
    }
}
