//! In-memory ledger store.
//!
//! Used when persistence is disabled and in tests. All records live behind a
//! single [`tokio::sync::RwLock`]; every transition reads the current status
//! and applies the change under one write guard, which makes it as atomic as
//! the guarded `UPDATE` of the PostgreSQL store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use super::{DonationFilter, DonationStats, LedgerStore, Page, TransitionOutcome};
use crate::domain::{
    Campaign, CampaignId, Donation, DonationId, DonationStatus, NewCampaign, NewDonation,
};
use crate::error::LedgerError;

#[derive(Debug, Default)]
struct State {
    campaigns: HashMap<CampaignId, Campaign>,
    donations: HashMap<DonationId, Donation>,
    by_code: HashMap<String, DonationId>,
}

/// Process-local [`LedgerStore`]. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<State>>,
}

/// Direction of a campaign adjustment.
#[derive(Debug, Clone, Copy)]
enum Adjustment {
    Credit,
    Debit,
    Keep,
}

impl MemoryLedger {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the donation for `code` to `target` if its status allows it,
    /// adjusting the campaign total in the same critical section.
    async fn transition(
        &self,
        code: &str,
        target: DonationStatus,
        adjustment: Adjustment,
        gateway_transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, LedgerError> {
        let mut guard = self.state.write().await;
        let State {
            campaigns,
            donations,
            by_code,
        } = &mut *guard;

        let Some(donation) = by_code.get(code).and_then(|id| donations.get_mut(id)) else {
            return Ok(TransitionOutcome::Missing);
        };
        if !donation.status.can_transition_to(target) {
            return Ok(TransitionOutcome::Unchanged(donation.clone()));
        }

        let campaign_total = match adjustment {
            Adjustment::Keep => None,
            Adjustment::Credit | Adjustment::Debit => {
                let Some(campaign) = campaigns.get_mut(&donation.campaign_id) else {
                    return Err(LedgerError::LedgerSplit(format!(
                        "campaign {} of donation {code} is missing",
                        donation.campaign_id
                    )));
                };
                let next = match adjustment {
                    Adjustment::Credit => campaign.current_total.checked_add(donation.amount),
                    _ => campaign.current_total.checked_sub(donation.amount),
                };
                let Some(next) = next else {
                    return Err(LedgerError::LedgerSplit(format!(
                        "campaign {} total {} cannot absorb {} for donation {code}",
                        campaign.id, campaign.current_total, donation.amount
                    )));
                };
                campaign.current_total = next;
                Some(next)
            }
        };

        donation.status = target;
        if let Some(id) = gateway_transaction_id {
            donation.gateway_transaction_id = Some(id.to_string());
        }
        donation.updated_at = Utc::now();
        Ok(TransitionOutcome::Applied {
            donation: donation.clone(),
            campaign_total,
        })
    }

    /// Overwrites a campaign's running total. Test hook for audit checks.
    #[cfg(test)]
    pub(crate) async fn force_campaign_total(&self, id: CampaignId, total: u64) {
        if let Some(campaign) = self.state.write().await.campaigns.get_mut(&id) {
            campaign.current_total = total;
        }
    }
}

impl LedgerStore for MemoryLedger {
    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign, LedgerError> {
        let campaign = campaign.into_campaign(CampaignId::new(), Utc::now());
        self.state
            .write()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn fetch_campaign(&self, id: CampaignId) -> Result<Option<Campaign>, LedgerError> {
        Ok(self.state.read().await.campaigns.get(&id).cloned())
    }

    async fn insert_donation(&self, donation: NewDonation) -> Result<Donation, LedgerError> {
        let mut state = self.state.write().await;
        if !state.campaigns.contains_key(&donation.campaign_id) {
            return Err(LedgerError::NotFound(format!(
                "campaign {}",
                donation.campaign_id
            )));
        }
        if state.by_code.contains_key(&donation.transaction_code) {
            return Err(LedgerError::DuplicateTransactionCode(
                donation.transaction_code,
            ));
        }
        let donation = donation.into_donation(DonationId::new(), Utc::now());
        state
            .by_code
            .insert(donation.transaction_code.clone(), donation.id);
        state.donations.insert(donation.id, donation.clone());
        Ok(donation)
    }

    async fn fetch_donation(&self, id: DonationId) -> Result<Option<Donation>, LedgerError> {
        Ok(self.state.read().await.donations.get(&id).cloned())
    }

    async fn fetch_donation_by_code(&self, code: &str) -> Result<Option<Donation>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .by_code
            .get(code)
            .and_then(|id| state.donations.get(id))
            .cloned())
    }

    async fn fetch_donation_by_gateway_id(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<Donation>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .donations
            .values()
            .find(|d| d.gateway_transaction_id.as_deref() == Some(gateway_transaction_id))
            .cloned())
    }

    async fn credit_donation(
        &self,
        code: &str,
        gateway_transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, LedgerError> {
        self.transition(
            code,
            DonationStatus::Successful,
            Adjustment::Credit,
            gateway_transaction_id,
        )
        .await
    }

    async fn fail_donation(&self, code: &str) -> Result<TransitionOutcome, LedgerError> {
        self.transition(code, DonationStatus::Failed, Adjustment::Keep, None)
            .await
    }

    async fn refund_donation(&self, code: &str) -> Result<TransitionOutcome, LedgerError> {
        self.transition(code, DonationStatus::Refunded, Adjustment::Debit, None)
            .await
    }

    async fn delete_donation(&self, id: DonationId) -> Result<TransitionOutcome, LedgerError> {
        let mut state = self.state.write().await;
        let Some(donation) = state.donations.get(&id) else {
            return Ok(TransitionOutcome::Missing);
        };
        if !donation.status.is_deletable() {
            return Ok(TransitionOutcome::Unchanged(donation.clone()));
        }
        let code = donation.transaction_code.clone();
        state.by_code.remove(&code);
        match state.donations.remove(&id) {
            Some(donation) => Ok(TransitionOutcome::Applied {
                donation,
                campaign_total: None,
            }),
            None => Ok(TransitionOutcome::Missing),
        }
    }

    async fn list_donations(
        &self,
        filter: &DonationFilter,
        page: Page,
    ) -> Result<(Vec<Donation>, u64), LedgerError> {
        let state = self.state.read().await;
        let mut matching: Vec<&Donation> = state
            .donations
            .values()
            .filter(|d| filter.matches(d))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let skip = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let take = usize::try_from(page.limit).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(skip)
            .take(take)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn donation_stats(&self, filter: &DonationFilter) -> Result<DonationStats, LedgerError> {
        let state = self.state.read().await;
        Ok(DonationStats::from_donations(
            state.donations.values().filter(|d| filter.matches(d)),
        ))
    }

    async fn successful_total(&self, campaign_id: CampaignId) -> Result<u64, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .donations
            .values()
            .filter(|d| d.campaign_id == campaign_id && d.status == DonationStatus::Successful)
            .map(|d| d.amount)
            .sum())
    }
}
