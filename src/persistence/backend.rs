//! Runtime selection between the storage implementations.

use super::{
    DonationFilter, DonationStats, LedgerStore, MemoryLedger, Page, PostgresLedger,
    TransitionOutcome,
};
use crate::config::LedgerConfig;
use crate::domain::{Campaign, CampaignId, Donation, DonationId, NewCampaign, NewDonation};
use crate::error::LedgerError;

/// The store the server runs on, chosen by `PERSISTENCE_ENABLED`.
#[derive(Debug, Clone)]
pub enum LedgerBackend {
    /// Process-local records.
    Memory(MemoryLedger),
    /// PostgreSQL.
    Postgres(PostgresLedger),
}

impl LedgerBackend {
    /// Opens the configured store.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::Persistence`] if PostgreSQL is enabled and
    /// cannot be reached or migrated.
    pub async fn from_config(config: &LedgerConfig) -> Result<Self, LedgerError> {
        if config.persistence_enabled {
            tracing::info!("using PostgreSQL ledger store");
            Ok(Self::Postgres(PostgresLedger::connect(config).await?))
        } else {
            tracing::warn!("persistence disabled, records are kept in memory only");
            Ok(Self::Memory(MemoryLedger::new()))
        }
    }

    /// Short name of the active store.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Self::Memory($store) => $call.await,
            Self::Postgres($store) => $call.await,
        }
    };
}

impl LedgerStore for LedgerBackend {
    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign, LedgerError> {
        dispatch!(self, s => s.insert_campaign(campaign))
    }

    async fn fetch_campaign(&self, id: CampaignId) -> Result<Option<Campaign>, LedgerError> {
        dispatch!(self, s => s.fetch_campaign(id))
    }

    async fn insert_donation(&self, donation: NewDonation) -> Result<Donation, LedgerError> {
        dispatch!(self, s => s.insert_donation(donation))
    }

    async fn fetch_donation(&self, id: DonationId) -> Result<Option<Donation>, LedgerError> {
        dispatch!(self, s => s.fetch_donation(id))
    }

    async fn fetch_donation_by_code(&self, code: &str) -> Result<Option<Donation>, LedgerError> {
        dispatch!(self, s => s.fetch_donation_by_code(code))
    }

    async fn fetch_donation_by_gateway_id(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<Donation>, LedgerError> {
        dispatch!(self, s => s.fetch_donation_by_gateway_id(gateway_transaction_id))
    }

    async fn credit_donation(
        &self,
        code: &str,
        gateway_transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, LedgerError> {
        dispatch!(self, s => s.credit_donation(code, gateway_transaction_id))
    }

    async fn fail_donation(&self, code: &str) -> Result<TransitionOutcome, LedgerError> {
        dispatch!(self, s => s.fail_donation(code))
    }

    async fn refund_donation(&self, code: &str) -> Result<TransitionOutcome, LedgerError> {
        dispatch!(self, s => s.refund_donation(code))
    }

    async fn delete_donation(&self, id: DonationId) -> Result<TransitionOutcome, LedgerError> {
        dispatch!(self, s => s.delete_donation(id))
    }

    async fn list_donations(
        &self,
        filter: &DonationFilter,
        page: Page,
    ) -> Result<(Vec<Donation>, u64), LedgerError> {
        dispatch!(self, s => s.list_donations(filter, page))
    }

    async fn donation_stats(&self, filter: &DonationFilter) -> Result<DonationStats, LedgerError> {
        dispatch!(self, s => s.donation_stats(filter))
    }

    async fn successful_total(&self, campaign_id: CampaignId) -> Result<u64, LedgerError> {
        dispatch!(self, s => s.successful_total(campaign_id))
    }
}
