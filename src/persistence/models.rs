//! Database rows for the `campaigns` and `donations` tables.
//!
//! Amounts are `BIGINT` in the database and `u64` in the domain; statuses
//! and payment methods are stored as their canonical names. Conversion
//! fails loudly on values the domain cannot represent.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Campaign, CampaignId, Donation, DonationId};
use crate::error::LedgerError;

/// Column list matching [`DonationRow`].
pub const DONATION_COLUMNS: &str = "id, donor_id, campaign_id, amount, currency, message, \
     payment_method, transaction_code, gateway_transaction_id, status, is_anonymous, \
     created_at, updated_at";

/// Column list matching [`CampaignRow`].
pub const CAMPAIGN_COLUMNS: &str =
    "id, name, description, target_amount, current_total, end_date, status, created_at";

/// A row of the `donations` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DonationRow {
    /// Primary key.
    pub id: Uuid,
    /// Donor reference.
    pub donor_id: String,
    /// Campaign foreign key.
    pub campaign_id: Uuid,
    /// Amount in the smallest currency unit.
    pub amount: i64,
    /// Currency code.
    pub currency: String,
    /// Donor message.
    pub message: Option<String>,
    /// `ZALOPAY` or `STRIPE`.
    pub payment_method: String,
    /// Unique correlation key.
    pub transaction_code: String,
    /// Gateway-side transaction id.
    pub gateway_transaction_id: Option<String>,
    /// Canonical status name.
    pub status: String,
    /// Anonymity flag.
    pub is_anonymous: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DonationRow> for Donation {
    type Error = LedgerError;

    fn try_from(row: DonationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: DonationId::from_uuid(row.id),
            donor_id: row.donor_id,
            campaign_id: CampaignId::from_uuid(row.campaign_id),
            amount: to_amount(row.amount)?,
            currency: row.currency,
            message: row.message,
            payment_method: row.payment_method.parse().map_err(corrupt)?,
            transaction_code: row.transaction_code,
            gateway_transaction_id: row.gateway_transaction_id,
            status: row.status.parse().map_err(corrupt)?,
            is_anonymous: row.is_anonymous,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row of the `campaigns` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CampaignRow {
    /// Primary key.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Fundraising goal.
    pub target_amount: i64,
    /// Running total of successful, non-refunded donations.
    pub current_total: i64,
    /// Optional closing date.
    pub end_date: Option<DateTime<Utc>>,
    /// Canonical status name.
    pub status: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = LedgerError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: CampaignId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            target_amount: to_amount(row.target_amount)?,
            current_total: to_amount(row.current_total)?,
            end_date: row.end_date,
            status: row.status.parse().map_err(corrupt)?,
            created_at: row.created_at,
        })
    }
}

/// Converts a stored amount into the domain type.
///
/// # Errors
///
/// Returns [`LedgerError::Persistence`] for a negative value.
pub fn to_amount(value: i64) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::Persistence(format!("negative amount {value}")))
}

/// Converts a domain amount into its stored form.
///
/// # Errors
///
/// Returns [`LedgerError::Validation`] for amounts beyond `i64::MAX`.
pub fn to_column(value: u64) -> Result<i64, LedgerError> {
    i64::try_from(value).map_err(|_| LedgerError::Validation(format!("amount {value} too large")))
}

fn corrupt(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Persistence(format!("corrupt row: {err}"))
}
