//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::{Donation, DonationId, DonationStatus, EventBus, PaymentMethod};
use crate::error::LedgerError;
use crate::gateway::{StripeClient, ZaloPayClient};
use crate::persistence::LedgerBackend;
use crate::secret::Secret;
use crate::service::DonationLedger;

/// Ledger driving the mobile-wallet gateway.
pub type ZaloPayLedger = DonationLedger<LedgerBackend, ZaloPayClient>;

/// Ledger driving the card processor.
pub type StripeLedger = DonationLedger<LedgerBackend, StripeClient>;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Mobile-wallet ledger. Also serves the gateway-independent reads.
    pub zalopay: Arc<ZaloPayLedger>,
    /// Card ledger, when the card processor is configured.
    pub stripe: Option<Arc<StripeLedger>>,
    /// Event bus shared by all ledgers.
    pub event_bus: EventBus,
    /// Operator bearer token. Operator routes are closed when unset.
    pub admin_token: Option<Secret<String>>,
}

impl AppState {
    /// Wires one ledger per gateway over a shared store and event bus.
    #[must_use]
    pub fn new(
        store: LedgerBackend,
        zalopay: ZaloPayClient,
        stripe: Option<StripeClient>,
        event_bus: EventBus,
        admin_token: Option<Secret<String>>,
    ) -> Self {
        let stripe = stripe
            .map(|client| Arc::new(DonationLedger::new(store.clone(), client, event_bus.clone())));
        Self {
            zalopay: Arc::new(DonationLedger::new(store, zalopay, event_bus.clone())),
            stripe,
            event_bus,
            admin_token,
        }
    }

    /// Returns the card ledger.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the card processor is not configured.
    pub fn stripe(&self) -> Result<&StripeLedger, LedgerError> {
        self.stripe
            .as_deref()
            .ok_or_else(|| LedgerError::NotFound("card payments are not configured".to_string()))
    }

    /// Overrides a donation's status through the ledger of the gateway it
    /// was paid with.
    ///
    /// # Errors
    ///
    /// Any error of [`DonationLedger::override_status`].
    pub async fn override_status(
        &self,
        id: DonationId,
        target: DonationStatus,
    ) -> Result<Donation, LedgerError> {
        let donation = self.zalopay.require_donation(id).await?;
        match donation.payment_method {
            PaymentMethod::Zalopay => self.zalopay.override_status(id, target).await,
            PaymentMethod::Stripe => self.stripe()?.override_status(id, target).await,
        }
    }
}
