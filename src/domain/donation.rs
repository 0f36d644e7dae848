//! Donation record, its status machine, and the supported payment methods.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{CampaignId, DonationId};

/// Lifecycle status of a donation.
///
/// The only valid transitions are:
///
/// | From \ To    | Pending | Successful | Failed | Refunded |
/// |--------------|---------|------------|--------|----------|
/// | `Pending`    | -       | yes        | yes    | no       |
/// | `Successful` | no      | -          | no     | yes      |
/// | `Failed`     | no      | no         | -      | no       |
/// | `Refunded`   | no      | no         | no     | -        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DonationStatus {
    /// Order requested from the gateway, outcome not yet known.
    Pending,
    /// Funds received and credited to the campaign.
    Successful,
    /// Payment did not complete.
    Failed,
    /// Funds returned to the donor and debited from the campaign.
    Refunded,
}

impl DonationStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::Successful,
        Self::Failed,
        Self::Refunded,
    ];

    /// Returns the canonical upper-case name used in storage and on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }

    /// Returns `true` if a donation may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Successful | Self::Failed) => true,
            (Self::Successful, Self::Refunded) => true,
            (Self::Pending, Self::Pending | Self::Refunded)
            | (Self::Successful, Self::Pending | Self::Successful | Self::Failed)
            | (Self::Failed, _)
            | (Self::Refunded, _) => false,
        }
    }

    /// Returns `true` once the gateway outcome has been recorded.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns `true` if a record in this status may be deleted.
    #[must_use]
    pub const fn is_deletable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DonationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESSFUL" => Ok(Self::Successful),
            "FAILED" => Ok(Self::Failed),
            "REFUNDED" => Ok(Self::Refunded),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Payment gateway a donation was routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// ZaloPay mobile wallet.
    Zalopay,
    /// Stripe card processor.
    Stripe,
}

impl PaymentMethod {
    /// Returns the canonical upper-case name used in storage and on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Zalopay => "ZALOPAY",
            Self::Stripe => "STRIPE",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ZALOPAY" => Ok(Self::Zalopay),
            "STRIPE" => Ok(Self::Stripe),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Error returned when parsing an unknown enum name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// One attempted transfer of funds from a donor to a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    /// Record identifier.
    pub id: DonationId,
    /// Opaque reference to the donating user.
    pub donor_id: String,
    /// Campaign receiving the funds.
    pub campaign_id: CampaignId,
    /// Amount in the smallest currency unit. Always positive.
    pub amount: u64,
    /// ISO currency code.
    pub currency: String,
    /// Free-text message from the donor.
    pub message: Option<String>,
    /// Gateway the payment goes through.
    pub payment_method: PaymentMethod,
    /// Locally generated correlation key, unique across all donations.
    pub transaction_code: String,
    /// Gateway-side transaction id, recorded on success.
    pub gateway_transaction_id: Option<String>,
    /// Current lifecycle status.
    pub status: DonationStatus,
    /// Hide the donor in public views.
    pub is_anonymous: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a donation. New donations always start `PENDING`.
#[derive(Debug, Clone)]
pub struct NewDonation {
    /// Opaque reference to the donating user.
    pub donor_id: String,
    /// Campaign receiving the funds.
    pub campaign_id: CampaignId,
    /// Amount in the smallest currency unit.
    pub amount: u64,
    /// ISO currency code.
    pub currency: String,
    /// Free-text message from the donor.
    pub message: Option<String>,
    /// Gateway the payment goes through.
    pub payment_method: PaymentMethod,
    /// Correlation key generated before the gateway is contacted.
    pub transaction_code: String,
    /// Hide the donor in public views.
    pub is_anonymous: bool,
}

impl NewDonation {
    /// Materializes the record as it is first persisted.
    #[must_use]
    pub fn into_donation(self, id: DonationId, now: DateTime<Utc>) -> Donation {
        Donation {
            id,
            donor_id: self.donor_id,
            campaign_id: self.campaign_id,
            amount: self.amount,
            currency: self.currency,
            message: self.message,
            payment_method: self.payment_method,
            transaction_code: self.transaction_code,
            gateway_transaction_id: None,
            status: DonationStatus::Pending,
            is_anonymous: self.is_anonymous,
            created_at: now,
            updated_at: now,
        }
    }
}
