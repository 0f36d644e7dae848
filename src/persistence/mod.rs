//! Persistence layer: donation and campaign records.
//!
//! [`LedgerStore`] is the storage seam of the ledger. Status transitions are
//! exposed as guarded operations rather than plain updates: each one moves a
//! donation only if its current status permits it, and applies the matching
//! campaign adjustment in the same atomic step. Two implementations exist:
//! [`postgres::PostgresLedger`] and [`memory::MemoryLedger`], selected at
//! runtime through [`backend::LedgerBackend`].

pub mod backend;
pub mod memory;
pub mod models;
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{
    Campaign, CampaignId, Donation, DonationId, DonationStatus, NewCampaign, NewDonation,
    PaymentMethod,
};
use crate::error::LedgerError;

pub use backend::LedgerBackend;
pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;

/// Result of a guarded status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied, together with its campaign adjustment.
    Applied {
        /// Donation after the transition.
        donation: Donation,
        /// Campaign total after the adjustment, if the transition moved it.
        campaign_total: Option<u64>,
    },
    /// The donation exists but its status does not permit the transition.
    /// Nothing was written.
    Unchanged(Donation),
    /// No donation matches the key.
    Missing,
}

/// Criteria for listing donations. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct DonationFilter {
    /// Only donations to this campaign.
    pub campaign_id: Option<CampaignId>,
    /// Only donations by this donor.
    pub donor_id: Option<String>,
    /// Only donations in this status.
    pub status: Option<DonationStatus>,
    /// Keep anonymous donations.
    pub include_anonymous: bool,
    /// Created at or after.
    pub created_from: Option<DateTime<Utc>>,
    /// Created at or before.
    pub created_to: Option<DateTime<Utc>>,
}

impl DonationFilter {
    /// Returns `true` if `donation` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, donation: &Donation) -> bool {
        self.campaign_id.is_none_or(|id| donation.campaign_id == id)
            && self
                .donor_id
                .as_deref()
                .is_none_or(|donor| donation.donor_id == donor)
            && self.status.is_none_or(|s| donation.status == s)
            && (self.include_anonymous || !donation.is_anonymous)
            && self.created_from.is_none_or(|t| donation.created_at >= t)
            && self.created_to.is_none_or(|t| donation.created_at <= t)
    }
}

/// One page of a listing. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Page number, starting at 1.
    pub page: u32,
    /// Page size.
    pub limit: u32,
}

impl Page {
    /// Largest accepted page size.
    pub const MAX_LIMIT: u32 = 100;

    /// Builds a page, clamping the inputs into range.
    #[must_use]
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    /// Number of records to skip.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Aggregate over donations in one status.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StatusTotals {
    /// Status aggregated.
    pub status: DonationStatus,
    /// Number of donations.
    pub count: u64,
    /// Sum of amounts.
    pub total_amount: u64,
    /// Mean amount.
    pub average_amount: f64,
}

/// Aggregate over donations made through one payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MethodTotals {
    /// Payment method aggregated.
    pub payment_method: PaymentMethod,
    /// Number of donations.
    pub count: u64,
    /// Sum of amounts.
    pub total_amount: u64,
}

/// Donation statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct DonationStats {
    /// Per-status aggregates, statuses with no donations omitted.
    pub by_status: Vec<StatusTotals>,
    /// Per-method aggregates, methods with no donations omitted.
    pub by_method: Vec<MethodTotals>,
}

impl DonationStats {
    /// Aggregates `donations` in memory.
    pub fn from_donations<'a>(donations: impl IntoIterator<Item = &'a Donation>) -> Self {
        let mut by_status: Vec<StatusTotals> = Vec::new();
        let mut by_method: Vec<MethodTotals> = Vec::new();
        for donation in donations {
            match by_status.iter_mut().find(|s| s.status == donation.status) {
                Some(entry) => {
                    entry.count += 1;
                    entry.total_amount += donation.amount;
                }
                None => by_status.push(StatusTotals {
                    status: donation.status,
                    count: 1,
                    total_amount: donation.amount,
                    average_amount: 0.0,
                }),
            }
            match by_method
                .iter_mut()
                .find(|m| m.payment_method == donation.payment_method)
            {
                Some(entry) => {
                    entry.count += 1;
                    entry.total_amount += donation.amount;
                }
                None => by_method.push(MethodTotals {
                    payment_method: donation.payment_method,
                    count: 1,
                    total_amount: donation.amount,
                }),
            }
        }
        for entry in &mut by_status {
            #[allow(clippy::cast_precision_loss)]
            let average = entry.total_amount as f64 / entry.count as f64;
            entry.average_amount = average;
        }
        by_status.sort_by_key(|s| s.status.as_str());
        by_method.sort_by_key(|m| m.payment_method.as_str());
        Self {
            by_status,
            by_method,
        }
    }
}

/// Storage for donations and campaigns.
///
/// Every transition method is atomic with respect to concurrent calls: two
/// callers racing on the same donation observe exactly one `Applied`.
#[trait_variant::make(LedgerStore: Send)]
pub trait LocalLedgerStore {
    /// Inserts a campaign with a zero running total.
    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign, LedgerError>;

    /// Fetches a campaign.
    async fn fetch_campaign(&self, id: CampaignId) -> Result<Option<Campaign>, LedgerError>;

    /// Inserts a `PENDING` donation.
    ///
    /// Fails with [`LedgerError::DuplicateTransactionCode`] if the
    /// transaction code is taken, and [`LedgerError::NotFound`] if the
    /// campaign does not exist.
    async fn insert_donation(&self, donation: NewDonation) -> Result<Donation, LedgerError>;

    /// Fetches a donation by id.
    async fn fetch_donation(&self, id: DonationId) -> Result<Option<Donation>, LedgerError>;

    /// Fetches a donation by transaction code.
    async fn fetch_donation_by_code(&self, code: &str) -> Result<Option<Donation>, LedgerError>;

    /// Fetches a donation by the gateway-side transaction id recorded on
    /// success.
    async fn fetch_donation_by_gateway_id(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<Donation>, LedgerError>;

    /// `PENDING -> SUCCESSFUL`: records the gateway transaction id and
    /// credits the campaign.
    async fn credit_donation(
        &self,
        code: &str,
        gateway_transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, LedgerError>;

    /// `PENDING -> FAILED`.
    async fn fail_donation(&self, code: &str) -> Result<TransitionOutcome, LedgerError>;

    /// `SUCCESSFUL -> REFUNDED`: debits the campaign.
    async fn refund_donation(&self, code: &str) -> Result<TransitionOutcome, LedgerError>;

    /// Deletes a donation that is `PENDING` or `FAILED`.
    async fn delete_donation(&self, id: DonationId) -> Result<TransitionOutcome, LedgerError>;

    /// Lists donations matching `filter`, newest first, returning the page
    /// and the total match count.
    async fn list_donations(
        &self,
        filter: &DonationFilter,
        page: Page,
    ) -> Result<(Vec<Donation>, u64), LedgerError>;

    /// Aggregates donations matching `filter`.
    async fn donation_stats(&self, filter: &DonationFilter) -> Result<DonationStats, LedgerError>;

    /// Sums the amounts of `SUCCESSFUL` donations to a campaign.
    async fn successful_total(&self, campaign_id: CampaignId) -> Result<u64, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_is_clamped() {
        assert_eq!(Page::new(0, 0), Page { page: 1, limit: 1 });
        assert_eq!(Page::new(3, 1_000).limit, Page::MAX_LIMIT);
        assert_eq!(Page::new(3, 20).offset(), 40);
    }

    #[test]
    fn filter_hides_anonymous_unless_asked() {
        let mut donation = NewDonation {
            donor_id: "user-1".to_string(),
            campaign_id: CampaignId::new(),
            amount: 10_000,
            currency: "VND".to_string(),
            message: None,
            payment_method: PaymentMethod::Zalopay,
            transaction_code: "241017_01".to_string(),
            is_anonymous: true,
        }
        .into_donation(DonationId::new(), Utc::now());

        let filter = DonationFilter::default();
        assert!(!filter.matches(&donation));
        let filter = DonationFilter {
            include_anonymous: true,
            ..DonationFilter::default()
        };
        assert!(filter.matches(&donation));

        donation.is_anonymous = false;
        let filter = DonationFilter {
            status: Some(DonationStatus::Successful),
            ..DonationFilter::default()
        };
        assert!(!filter.matches(&donation));
    }
}
