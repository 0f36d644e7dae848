//! Donation ledger: order creation, callback reconciliation, overrides and
//! refunds.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    Campaign, CampaignId, Donation, DonationId, DonationStatus, EventBus, KeyedLocks,
    LedgerEvent, NewCampaign, NewDonation, transaction_code,
};
use crate::error::LedgerError;
use crate::gateway::{
    GatewayFailure, GatewayOrderStatus, OrderHandle, OrderRequest, PaymentGateway,
    RefundReceipt, RefundRequest, VerifiedPayment,
};
use crate::persistence::{DonationFilter, DonationStats, LedgerStore, Page, TransitionOutcome};

/// Attempts at finding an unused transaction code.
const CODE_ATTEMPTS: usize = 3;

/// Donor input for a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    /// Campaign to donate to.
    pub campaign_id: CampaignId,
    /// Opaque donor reference.
    pub donor_id: String,
    /// Name shown by the gateway.
    pub donor_name: String,
    /// Amount in the smallest currency unit.
    pub amount: u64,
    /// Free-text message, also used as the order description.
    pub message: Option<String>,
    /// Where the gateway sends the donor afterwards.
    pub redirect_url: Option<String>,
    /// Hide the donor in public views.
    pub is_anonymous: bool,
}

/// A persisted `PENDING` donation with its open gateway order.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    /// The donation, still `PENDING`.
    pub donation: Donation,
    /// What the gateway returned.
    pub handle: OrderHandle,
}

/// How a verified payment notification was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The donation moved to `SUCCESSFUL` and the campaign was credited.
    Credited {
        /// Donation after the credit.
        donation: Donation,
        /// Campaign total after the credit.
        campaign_total: u64,
    },
    /// The donation was already `SUCCESSFUL` or `REFUNDED`. Nothing changed.
    Duplicate(Donation),
    /// The gateway captured funds for a donation already marked `FAILED`.
    /// Nothing changed; the payment needs manual reconciliation.
    Unreconciled(Donation),
}

/// A committed refund.
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    /// Donation after the refund.
    pub donation: Donation,
    /// Gateway acknowledgement.
    pub receipt: RefundReceipt,
    /// Campaign total after the debit.
    pub campaign_total: u64,
}

/// Merged local and gateway view of one order.
#[derive(Debug, Clone)]
pub struct StatusView {
    /// Gateway-side state.
    pub gateway: GatewayOrderStatus,
    /// Local record, if the code is known.
    pub donation: Option<Donation>,
    /// Campaign of the local record.
    pub campaign: Option<Campaign>,
}

/// One page of donations.
#[derive(Debug, Clone)]
pub struct DonationPage {
    /// Records on this page.
    pub donations: Vec<Donation>,
    /// Total matching records.
    pub total: u64,
    /// The page served.
    pub page: Page,
}

impl DonationPage {
    /// Number of pages at the current page size.
    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.total.div_ceil(self.page.limit as u64)
    }
}

/// Result of recomputing a campaign total from its donations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignAudit {
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

/// Orchestrates one payment gateway against the ledger store.
///
/// The store owns atomicity: every status change goes through one of its
/// guarded transitions, so duplicate or concurrent notifications credit a
/// campaign at most once. Applied transitions are published on the
/// [`EventBus`].
#[derive(Debug)]
pub struct DonationLedger<S, G> {
    store: S,
    gateway: G,
    event_bus: EventBus,
    refund_locks: KeyedLocks,
}

impl<S, G> DonationLedger<S, G>
where
    S: LedgerStore + Sync,
    G: PaymentGateway + Sync,
{
    /// Creates a ledger over `store` and `gateway`.
    #[must_use]
    pub fn new(store: S, gateway: G, event_bus: EventBus) -> Self {
        Self {
            store,
            gateway,
            event_bus,
            refund_locks: KeyedLocks::new(),
        }
    }

    /// Returns the store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the gateway.
    #[must_use]
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Returns the event bus.
    #[must_use]
    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Records a `PENDING` donation and opens a gateway order for it.
    ///
    /// The donation is persisted before the gateway is contacted. If the
    /// gateway times out, cannot be reached, or refuses the order, the
    /// donation is marked `FAILED` before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for bad input or an amount outside the
    ///   gateway's limits.
    /// - [`LedgerError::NotFound`] if the campaign does not exist.
    /// - [`LedgerError::Conflict`] if the campaign no longer accepts
    ///   donations.
    /// - [`LedgerError::GatewayTimeout`], [`LedgerError::Gateway`] or
    ///   [`LedgerError::GatewayRejected`] if the order could not be opened.
    pub async fn create_order(&self, request: CreateOrder) -> Result<CreatedOrder, LedgerError> {
        if request.donor_id.trim().is_empty() {
            return Err(LedgerError::Validation("donor_id is required".to_string()));
        }
        if request.donor_name.trim().is_empty() {
            return Err(LedgerError::Validation("donor_name is required".to_string()));
        }
        let limits = self.gateway.amount_limits();
        if !limits.contains(request.amount) {
            return Err(LedgerError::Validation(format!(
                "amount must be between {} and {}",
                limits.min, limits.max
            )));
        }

        let now = Utc::now();
        let campaign = self.require_campaign(request.campaign_id).await?;
        if !campaign.accepts_donations(now) {
            return Err(LedgerError::Conflict(format!(
                "campaign {} is not accepting donations",
                campaign.id
            )));
        }

        let description = request
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("Donation to {}", campaign.name));
        let donation = self.insert_pending(&request, now).await?;

        let _ = self.event_bus.publish(LedgerEvent::DonationCreated {
            donation_id: donation.id,
            campaign_id: donation.campaign_id,
            transaction_code: donation.transaction_code.clone(),
            payment_method: donation.payment_method,
            amount: donation.amount,
            timestamp: donation.created_at,
        });
        tracing::info!(
            donation_id = %donation.id,
            transaction_code = %donation.transaction_code,
            campaign_id = %donation.campaign_id,
            amount = donation.amount,
            method = %donation.payment_method,
            "pending donation recorded"
        );

        let order = OrderRequest {
            donation_id: donation.id,
            campaign_id: donation.campaign_id,
            transaction_code: donation.transaction_code.clone(),
            donor_id: request.donor_id,
            donor_name: request.donor_name,
            amount: donation.amount,
            description,
            redirect_url: request.redirect_url,
        };
        let result =
            match tokio::time::timeout(self.gateway.timeout(), self.gateway.create_order(&order))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayFailure::Timeout),
            };

        match result {
            Ok(handle) => Ok(CreatedOrder { donation, handle }),
            Err(failure) => {
                tracing::warn!(
                    transaction_code = %donation.transaction_code,
                    error = %failure,
                    "gateway order failed"
                );
                self.fail_after_order_error(&donation.transaction_code, &failure)
                    .await;
                Err(failure.into())
            }
        }
    }

    async fn insert_pending(
        &self,
        request: &CreateOrder,
        now: DateTime<Utc>,
    ) -> Result<Donation, LedgerError> {
        let mut last_error = None;
        for _ in 0..CODE_ATTEMPTS {
            let new = NewDonation {
                donor_id: request.donor_id.clone(),
                campaign_id: request.campaign_id,
                amount: request.amount,
                currency: self.gateway.currency().to_string(),
                message: request.message.clone(),
                payment_method: self.gateway.method(),
                transaction_code: transaction_code::generate(now),
                is_anonymous: request.is_anonymous,
            };
            match self.store.insert_donation(new).await {
                Err(LedgerError::DuplicateTransactionCode(code)) => {
                    tracing::warn!(transaction_code = %code, "transaction code collision, retrying");
                    last_error = Some(LedgerError::DuplicateTransactionCode(code));
                }
                other => return other,
            }
        }
        Err(last_error.unwrap_or_else(|| {
            LedgerError::Internal("transaction code generation failed".to_string())
        }))
    }

    async fn fail_after_order_error(&self, code: &str, failure: &GatewayFailure) {
        match self.mark_failed(code, &failure.to_string()).await {
            Ok(TransitionOutcome::Applied { .. }) => {}
            Ok(TransitionOutcome::Unchanged(donation)) => {
                // A callback settled the donation while the order call was failing.
                tracing::warn!(
                    transaction_code = %code,
                    status = %donation.status,
                    "donation settled before order failure was recorded"
                );
            }
            Ok(TransitionOutcome::Missing) => {
                tracing::error!(transaction_code = %code, "pending donation vanished");
            }
            Err(err) => {
                tracing::error!(
                    transaction_code = %code,
                    error = %err,
                    "could not mark donation failed"
                );
            }
        }
    }

    /// Applies a verified payment notification.
    ///
    /// Settled donations are reported as [`ReconcileOutcome::Duplicate`],
    /// or [`ReconcileOutcome::Unreconciled`] when the donation had failed,
    /// without touching the campaign.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] if no donation carries the transaction
    ///   code.
    /// - [`LedgerError::AmountMismatch`] if the reported amount differs from
    ///   the stored one. Nothing is written.
    /// - [`LedgerError::LedgerSplit`] if the campaign could not be credited.
    ///   The status change is rolled back.
    pub async fn apply_verified_payment(
        &self,
        payment: &VerifiedPayment,
    ) -> Result<ReconcileOutcome, LedgerError> {
        let code = payment.transaction_code.as_str();
        let Some(donation) = self.store.fetch_donation_by_code(code).await? else {
            tracing::warn!(transaction_code = %code, "payment for unknown transaction code");
            return Err(LedgerError::NotFound(format!("donation {code}")));
        };

        if donation.status.is_settled() {
            return Ok(settled_outcome(donation, payment));
        }

        if donation.amount != payment.amount {
            tracing::warn!(
                transaction_code = %code,
                expected = donation.amount,
                received = payment.amount,
                gateway_transaction_id = %payment.gateway_transaction_id,
                "payment amount mismatch"
            );
            return Err(LedgerError::AmountMismatch {
                expected: donation.amount,
                received: payment.amount,
            });
        }

        match self
            .credit(code, Some(&payment.gateway_transaction_id))
            .await?
        {
            TransitionOutcome::Applied {
                donation,
                campaign_total,
            } => Ok(ReconcileOutcome::Credited {
                donation,
                campaign_total: campaign_total.unwrap_or_default(),
            }),
            TransitionOutcome::Unchanged(donation) => Ok(settled_outcome(donation, payment)),
            TransitionOutcome::Missing => Err(LedgerError::NotFound(format!("donation {code}"))),
        }
    }

    /// Guarded `PENDING -> SUCCESSFUL` with event publication.
    async fn credit(
        &self,
        code: &str,
        gateway_transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, LedgerError> {
        let outcome = self
            .store
            .credit_donation(code, gateway_transaction_id)
            .await
            .inspect_err(|err| {
                if matches!(err, LedgerError::LedgerSplit(_)) {
                    tracing::error!(transaction_code = %code, error = %err, "credit rolled back");
                }
            })?;
        if let TransitionOutcome::Applied {
            donation,
            campaign_total,
        } = &outcome
        {
            let total = campaign_total.unwrap_or_default();
            tracing::info!(
                donation_id = %donation.id,
                transaction_code = %code,
                amount = donation.amount,
                campaign_total = total,
                "donation credited"
            );
            let _ = self.event_bus.publish(LedgerEvent::DonationSucceeded {
                donation_id: donation.id,
                campaign_id: donation.campaign_id,
                transaction_code: donation.transaction_code.clone(),
                amount: donation.amount,
                campaign_total: total,
                timestamp: donation.updated_at,
            });
        }
        Ok(outcome)
    }

    /// Guarded `PENDING -> FAILED` with event publication.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store fails.
    pub async fn mark_failed(
        &self,
        code: &str,
        reason: &str,
    ) -> Result<TransitionOutcome, LedgerError> {
        let outcome = self.store.fail_donation(code).await?;
        if let TransitionOutcome::Applied { donation, .. } = &outcome {
            tracing::info!(transaction_code = %code, reason, "donation failed");
            let _ = self.event_bus.publish(LedgerEvent::DonationFailed {
                donation_id: donation.id,
                campaign_id: donation.campaign_id,
                transaction_code: donation.transaction_code.clone(),
                reason: reason.to_string(),
                timestamp: donation.updated_at,
            });
        }
        Ok(outcome)
    }

    /// Forces a donation into `target`, applying the same campaign effects
    /// as the automatic paths.
    ///
    /// Requesting the current status is a no-op. `REFUNDED` goes through
    /// [`DonationLedger::refund`].
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] for an unknown donation.
    /// - [`LedgerError::Conflict`] for a transition the status machine does
    ///   not allow.
    /// - Any refund error when `target` is `REFUNDED`.
    pub async fn override_status(
        &self,
        id: DonationId,
        target: DonationStatus,
    ) -> Result<Donation, LedgerError> {
        let donation = self.require_donation(id).await?;
        if donation.status == target {
            return Ok(donation);
        }
        if !donation.status.can_transition_to(target) {
            return Err(invalid_transition(&donation, target));
        }
        tracing::info!(
            donation_id = %id,
            from = %donation.status,
            to = %target,
            "operator status override"
        );

        let code = donation.transaction_code.as_str();
        let outcome = match target {
            DonationStatus::Successful => self.credit(code, None).await?,
            DonationStatus::Failed => self.mark_failed(code, "operator override").await?,
            DonationStatus::Refunded => {
                return self
                    .refund(id, Some("operator override".to_string()))
                    .await
                    .map(|refund| refund.donation);
            }
            DonationStatus::Pending => return Err(invalid_transition(&donation, target)),
        };
        match outcome {
            TransitionOutcome::Applied { donation, .. } => Ok(donation),
            TransitionOutcome::Unchanged(current) if current.status == target => Ok(current),
            TransitionOutcome::Unchanged(current) => Err(invalid_transition(&current, target)),
            TransitionOutcome::Missing => Err(LedgerError::NotFound(format!("donation {id}"))),
        }
    }

    /// Refunds a `SUCCESSFUL` donation through the gateway, then debits the
    /// campaign.
    ///
    /// Refunds of the same donation are serialized. If the gateway does not
    /// confirm the refund the donation stays `SUCCESSFUL`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] for an unknown donation.
    /// - [`LedgerError::Conflict`] if the donation is not `SUCCESSFUL` or has
    ///   no gateway transaction id.
    /// - Gateway errors if the refund was not executed.
    pub async fn refund(
        &self,
        id: DonationId,
        reason: Option<String>,
    ) -> Result<RefundOutcome, LedgerError> {
        let donation = self.require_donation(id).await?;
        let _guard = self.refund_locks.lock(&donation.transaction_code).await;
        // Re-read under the lock: a concurrent refund may have committed.
        let donation = self.require_donation(id).await?;

        if donation.status != DonationStatus::Successful {
            return Err(invalid_transition(&donation, DonationStatus::Refunded));
        }
        let Some(gateway_transaction_id) = donation.gateway_transaction_id.clone() else {
            return Err(LedgerError::Conflict(format!(
                "donation {id} has no gateway transaction id to refund"
            )));
        };

        let request = RefundRequest {
            transaction_code: donation.transaction_code.clone(),
            gateway_transaction_id,
            amount: donation.amount,
            description: reason.unwrap_or_else(|| format!("Refund {}", donation.transaction_code)),
        };
        let receipt =
            match tokio::time::timeout(self.gateway.timeout(), self.gateway.refund(&request)).await
            {
                Ok(Ok(receipt)) => receipt,
                Ok(Err(failure)) => {
                    tracing::warn!(
                        transaction_code = %donation.transaction_code,
                        error = %failure,
                        "gateway refund failed, donation stays SUCCESSFUL"
                    );
                    return Err(failure.into());
                }
                Err(_) => {
                    tracing::warn!(
                        transaction_code = %donation.transaction_code,
                        "gateway refund timed out, donation stays SUCCESSFUL"
                    );
                    return Err(LedgerError::GatewayTimeout);
                }
            };

        let code = donation.transaction_code.as_str();
        match self.store.refund_donation(code).await {
            Ok(TransitionOutcome::Applied {
                donation,
                campaign_total,
            }) => {
                let campaign_total = campaign_total.unwrap_or_default();
                tracing::info!(
                    donation_id = %donation.id,
                    transaction_code = %code,
                    refund_id = %receipt.refund_id,
                    amount = donation.amount,
                    campaign_total,
                    "donation refunded"
                );
                let _ = self.event_bus.publish(LedgerEvent::DonationRefunded {
                    donation_id: donation.id,
                    campaign_id: donation.campaign_id,
                    transaction_code: donation.transaction_code.clone(),
                    amount: donation.amount,
                    campaign_total,
                    timestamp: donation.updated_at,
                });
                Ok(RefundOutcome {
                    donation,
                    receipt,
                    campaign_total,
                })
            }
            Ok(TransitionOutcome::Unchanged(current)) => {
                tracing::error!(
                    transaction_code = %code,
                    refund_id = %receipt.refund_id,
                    status = %current.status,
                    "gateway refunded but local status moved underneath"
                );
                Err(invalid_transition(&current, DonationStatus::Refunded))
            }
            Ok(TransitionOutcome::Missing) => {
                tracing::error!(
                    transaction_code = %code,
                    refund_id = %receipt.refund_id,
                    "gateway refunded a donation that no longer exists"
                );
                Err(LedgerError::NotFound(format!("donation {id}")))
            }
            Err(err) => {
                tracing::error!(
                    transaction_code = %code,
                    refund_id = %receipt.refund_id,
                    error = %err,
                    "gateway refunded but local debit failed"
                );
                Err(err)
            }
        }
    }

    /// Refunds the donation settled under `gateway_transaction_id`.
    ///
    /// Only full refunds are supported: `amount` must equal the donation
    /// amount.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown gateway transaction,
    /// [`LedgerError::Validation`] for a partial amount, and any error of
    /// [`DonationLedger::refund`].
    pub async fn refund_by_gateway_transaction(
        &self,
        gateway_transaction_id: &str,
        amount: u64,
        reason: Option<String>,
    ) -> Result<RefundOutcome, LedgerError> {
        let Some(donation) = self
            .store
            .fetch_donation_by_gateway_id(gateway_transaction_id)
            .await?
        else {
            return Err(LedgerError::NotFound(format!(
                "gateway transaction {gateway_transaction_id}"
            )));
        };
        if donation.payment_method != self.gateway.method() {
            return Err(LedgerError::Validation(format!(
                "gateway transaction {gateway_transaction_id} was not paid via {}",
                self.gateway.method()
            )));
        }
        if donation.amount != amount {
            return Err(LedgerError::Validation(format!(
                "refund amount {amount} must equal donation amount {}",
                donation.amount
            )));
        }
        self.refund(donation.id, reason).await
    }

    /// Returns the gateway's live view of an order merged with the local
    /// record. Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the gateway cannot be queried, or a
    /// [`LedgerError::Persistence`] if the store fails.
    pub async fn query_status(&self, code: &str) -> Result<StatusView, LedgerError> {
        if code.trim().is_empty() {
            return Err(LedgerError::Validation("transaction code is required".to_string()));
        }
        if !transaction_code::is_well_formed(code) {
            return Err(LedgerError::Validation(format!(
                "malformed transaction code {code:?}"
            )));
        }
        let gateway_query = async {
            match tokio::time::timeout(self.gateway.timeout(), self.gateway.query_order(code)).await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayFailure::Timeout),
            }
        };
        let (gateway, local) = tokio::join!(gateway_query, self.store.fetch_donation_by_code(code));
        let gateway = gateway.map_err(|failure| {
            tracing::warn!(transaction_code = %code, error = %failure, "gateway query failed");
            LedgerError::from(failure)
        })?;
        let donation = local?;
        let campaign = match &donation {
            Some(d) => self.store.fetch_campaign(d.campaign_id).await?,
            None => None,
        };
        if let Some(d) = &donation {
            if gateway.is_paid && d.status == DonationStatus::Pending {
                tracing::warn!(
                    transaction_code = %code,
                    "gateway reports paid but no callback has been applied"
                );
            }
        }
        Ok(StatusView {
            gateway,
            donation,
            campaign,
        })
    }

    /// Fetches a donation and its campaign by transaction code.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown code.
    pub async fn donation_by_code(
        &self,
        code: &str,
    ) -> Result<(Donation, Option<Campaign>), LedgerError> {
        let Some(donation) = self.store.fetch_donation_by_code(code).await? else {
            return Err(LedgerError::NotFound(format!("donation {code}")));
        };
        let campaign = self.store.fetch_campaign(donation.campaign_id).await?;
        Ok((donation, campaign))
    }

    /// Fetches a donation by id.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown id.
    pub async fn require_donation(&self, id: DonationId) -> Result<Donation, LedgerError> {
        self.store
            .fetch_donation(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("donation {id}")))
    }

    /// Lists a campaign's donations and sums its `SUCCESSFUL` donations.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown campaign.
    pub async fn campaign_donations(
        &self,
        campaign_id: CampaignId,
        status: Option<DonationStatus>,
        include_anonymous: bool,
        page: Page,
    ) -> Result<(DonationPage, u64), LedgerError> {
        self.require_campaign(campaign_id).await?;
        let filter = DonationFilter {
            campaign_id: Some(campaign_id),
            status,
            include_anonymous,
            ..DonationFilter::default()
        };
        let (donations, total) = self.store.list_donations(&filter, page).await?;
        let successful_total = self.store.successful_total(campaign_id).await?;
        Ok((
            DonationPage {
                donations,
                total,
                page,
            },
            successful_total,
        ))
    }

    /// Lists a donor's donations.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store fails.
    pub async fn donor_donations(
        &self,
        donor_id: &str,
        status: Option<DonationStatus>,
        page: Page,
    ) -> Result<DonationPage, LedgerError> {
        let filter = DonationFilter {
            donor_id: Some(donor_id.to_string()),
            status,
            include_anonymous: true,
            ..DonationFilter::default()
        };
        let (donations, total) = self.store.list_donations(&filter, page).await?;
        Ok(DonationPage {
            donations,
            total,
            page,
        })
    }

    /// Aggregates donations per status and per payment method.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] for an inverted date range.
    pub async fn stats(
        &self,
        campaign_id: Option<CampaignId>,
        created_from: Option<DateTime<Utc>>,
        created_to: Option<DateTime<Utc>>,
    ) -> Result<DonationStats, LedgerError> {
        if let (Some(from), Some(to)) = (created_from, created_to) {
            if from > to {
                return Err(LedgerError::Validation(
                    "start_date must not be after end_date".to_string(),
                ));
            }
        }
        let filter = DonationFilter {
            campaign_id,
            include_anonymous: true,
            created_from,
            created_to,
            ..DonationFilter::default()
        };
        self.store.donation_stats(&filter).await
    }

    /// Deletes a `PENDING` or `FAILED` donation.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown id, and
    /// [`LedgerError::Conflict`] for a settled donation.
    pub async fn delete_donation(&self, id: DonationId) -> Result<Donation, LedgerError> {
        match self.store.delete_donation(id).await? {
            TransitionOutcome::Applied { donation, .. } => {
                tracing::info!(donation_id = %id, status = %donation.status, "donation deleted");
                Ok(donation)
            }
            TransitionOutcome::Unchanged(donation) => Err(LedgerError::Conflict(format!(
                "cannot delete a {} donation",
                donation.status
            ))),
            TransitionOutcome::Missing => Err(LedgerError::NotFound(format!("donation {id}"))),
        }
    }

    /// Creates a campaign.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] for an empty name or a zero target.
    pub async fn create_campaign(&self, campaign: NewCampaign) -> Result<Campaign, LedgerError> {
        if campaign.name.trim().is_empty() {
            return Err(LedgerError::Validation("name is required".to_string()));
        }
        if campaign.target_amount == 0 {
            return Err(LedgerError::Validation(
                "target_amount must be positive".to_string(),
            ));
        }
        let campaign = self.store.insert_campaign(campaign).await?;
        tracing::info!(campaign_id = %campaign.id, target = campaign.target_amount, "campaign created");
        Ok(campaign)
    }

    /// Fetches a campaign.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown id.
    pub async fn require_campaign(&self, id: CampaignId) -> Result<Campaign, LedgerError> {
        self.store
            .fetch_campaign(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("campaign {id}")))
    }

    /// Recomputes a campaign's total from its `SUCCESSFUL` donations and
    /// compares it with the running total.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown campaign.
    pub async fn audit_campaign(&self, id: CampaignId) -> Result<CampaignAudit, LedgerError> {
        let campaign = self.require_campaign(id).await?;
        let recomputed_total = self.store.successful_total(id).await?;
        let consistent = recomputed_total == campaign.current_total;
        if consistent {
            tracing::info!(campaign_id = %id, total = recomputed_total, "campaign audit passed");
        } else {
            tracing::error!(
                campaign_id = %id,
                running_total = campaign.current_total,
                recomputed_total,
                "campaign total diverges from its donations"
            );
        }
        Ok(CampaignAudit {
            campaign_id: id,
            running_total: campaign.current_total,
            recomputed_total,
            consistent,
            audited_at: Utc::now(),
        })
    }
}

/// Classifies a payment for a donation that is no longer `PENDING`.
fn settled_outcome(donation: Donation, payment: &VerifiedPayment) -> ReconcileOutcome {
    if donation.status == DonationStatus::Failed {
        tracing::error!(
            transaction_code = %payment.transaction_code,
            gateway_transaction_id = %payment.gateway_transaction_id,
            amount = payment.amount,
            "payment captured for a failed donation, reconcile manually"
        );
        return ReconcileOutcome::Unreconciled(donation);
    }
    tracing::info!(
        transaction_code = %payment.transaction_code,
        status = %donation.status,
        "duplicate payment notification ignored"
    );
    ReconcileOutcome::Duplicate(donation)
}

fn invalid_transition(donation: &Donation, target: DonationStatus) -> LedgerError {
    LedgerError::Conflict(format!(
        "donation {} cannot move from {} to {target}",
        donation.id, donation.status
    ))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::AmountLimits;
    use crate::domain::{CampaignStatus, PaymentMethod};
    use crate::persistence::MemoryLedger;

    /// Scripted gateway: answers from fixed settings and counts calls.
    #[derive(Debug, Clone, Default)]
    struct ScriptedGateway {
        order_delay: Option<Duration>,
        reject_orders: bool,
        reject_refunds: bool,
        refunds: Arc<AtomicUsize>,
    }

    impl PaymentGateway for ScriptedGateway {
        fn method(&self) -> PaymentMethod {
            PaymentMethod::Zalopay
        }

        fn currency(&self) -> &str {
            "VND"
        }

        fn amount_limits(&self) -> AmountLimits {
            AmountLimits {
                min: 1_000,
                max: 5_000_000,
            }
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        async fn create_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayFailure> {
            if let Some(delay) = self.order_delay {
                tokio::time::sleep(delay).await;
            }
            if self.reject_orders {
                return Err(GatewayFailure::Rejected {
                    code: -68,
                    message: "duplicate app_trans_id".to_string(),
                });
            }
            Ok(OrderHandle {
                order_url: Some(format!("https://pay.test/{}", order.transaction_code)),
                ..OrderHandle::default()
            })
        }

        async fn query_order(&self, _code: &str) -> Result<GatewayOrderStatus, GatewayFailure> {
            Ok(GatewayOrderStatus {
                return_code: 1,
                return_message: "paid".to_string(),
                is_paid: true,
                is_processing: false,
                gateway_transaction_id: Some("zp-1".to_string()),
                amount: Some(50_000),
                discount_amount: 0,
            })
        }

        async fn refund(&self, refund: &RefundRequest) -> Result<RefundReceipt, GatewayFailure> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.reject_refunds {
                return Err(GatewayFailure::Rejected {
                    code: 3,
                    message: "refund processing".to_string(),
                });
            }
            self.refunds.fetch_add(1, Ordering::SeqCst);
            Ok(RefundReceipt {
                refund_id: format!("r-{}", refund.transaction_code),
                return_code: 1,
                return_message: "ok".to_string(),
            })
        }
    }

    async fn ledger_with(
        gateway: ScriptedGateway,
    ) -> (DonationLedger<MemoryLedger, ScriptedGateway>, Campaign) {
        let ledger = DonationLedger::new(MemoryLedger::new(), gateway, EventBus::new(64));
        let Ok(campaign) = ledger
            .create_campaign(NewCampaign {
                name: "School roof".to_string(),
                description: String::new(),
                target_amount: 1_000_000,
                end_date: None,
                status: CampaignStatus::Active,
            })
            .await
        else {
            panic!("campaign creation failed");
        };
        (ledger, campaign)
    }

    fn order(campaign_id: CampaignId, amount: u64) -> CreateOrder {
        CreateOrder {
            campaign_id,
            donor_id: "user-7".to_string(),
            donor_name: "Minh".to_string(),
            amount,
            message: None,
            redirect_url: None,
            is_anonymous: false,
        }
    }

    async fn campaign_total<G: PaymentGateway + Sync>(
        ledger: &DonationLedger<MemoryLedger, G>,
        id: CampaignId,
    ) -> u64 {
        match ledger.require_campaign(id).await {
            Ok(campaign) => campaign.current_total,
            Err(err) => panic!("campaign lookup failed: {err}"),
        }
    }

    async fn paid_donation(
        ledger: &DonationLedger<MemoryLedger, ScriptedGateway>,
        campaign: &Campaign,
    ) -> Donation {
        let Ok(created) = ledger.create_order(order(campaign.id, 50_000)).await else {
            panic!("order failed");
        };
        let payment = VerifiedPayment {
            transaction_code: created.donation.transaction_code.clone(),
            amount: 50_000,
            gateway_transaction_id: "zp-1".to_string(),
        };
        let Ok(ReconcileOutcome::Credited { donation, .. }) =
            ledger.apply_verified_payment(&payment).await
        else {
            panic!("payment not credited");
        };
        donation
    }

    #[tokio::test]
    async fn order_creates_one_pending_donation() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let mut events = ledger.event_bus().subscribe();

        let Ok(created) = ledger.create_order(order(campaign.id, 50_000)).await else {
            panic!("order failed");
        };
        assert_eq!(created.donation.status, DonationStatus::Pending);
        assert!(created.handle.order_url.is_some());
        assert!(matches!(
            events.try_recv(),
            Ok(LedgerEvent::DonationCreated { amount: 50_000, .. })
        ));
        assert_eq!(campaign_total(&ledger, campaign.id).await, 0);
    }

    #[tokio::test]
    async fn amounts_outside_limits_are_rejected() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        for amount in [0, 999, 5_000_001] {
            assert!(matches!(
                ledger.create_order(order(campaign.id, amount)).await,
                Err(LedgerError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn unknown_or_ended_campaigns_refuse_orders() {
        let (ledger, _) = ledger_with(ScriptedGateway::default()).await;
        assert!(matches!(
            ledger.create_order(order(CampaignId::new(), 50_000)).await,
            Err(LedgerError::NotFound(_))
        ));

        let Ok(ended) = ledger
            .create_campaign(NewCampaign {
                name: "Past".to_string(),
                description: String::new(),
                target_amount: 10_000,
                end_date: None,
                status: CampaignStatus::Ended,
            })
            .await
        else {
            panic!("campaign creation failed");
        };
        assert!(matches!(
            ledger.create_order(order(ended.id, 50_000)).await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn gateway_timeout_fails_the_donation() {
        let gateway = ScriptedGateway {
            order_delay: Some(Duration::from_millis(500)),
            ..ScriptedGateway::default()
        };
        let (ledger, campaign) = ledger_with(gateway).await;

        let result = ledger.create_order(order(campaign.id, 50_000)).await;
        assert!(matches!(result, Err(LedgerError::GatewayTimeout)));

        let Ok((page, _)) = ledger
            .campaign_donations(campaign.id, None, true, Page::default())
            .await
        else {
            panic!("listing failed");
        };
        assert_eq!(page.donations.len(), 1);
        assert!(
            page.donations
                .iter()
                .all(|d| d.status == DonationStatus::Failed)
        );
        assert_eq!(campaign_total(&ledger, campaign.id).await, 0);
    }

    #[tokio::test]
    async fn rejected_order_fails_the_donation() {
        let gateway = ScriptedGateway {
            reject_orders: true,
            ..ScriptedGateway::default()
        };
        let (ledger, campaign) = ledger_with(gateway).await;
        let mut events = ledger.event_bus().subscribe();

        let result = ledger.create_order(order(campaign.id, 50_000)).await;
        assert!(matches!(
            result,
            Err(LedgerError::GatewayRejected { code: -68, .. })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(LedgerEvent::DonationCreated { .. })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(LedgerEvent::DonationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn redelivered_payment_credits_once() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let Ok(created) = ledger.create_order(order(campaign.id, 50_000)).await else {
            panic!("order failed");
        };
        let payment = VerifiedPayment {
            transaction_code: created.donation.transaction_code.clone(),
            amount: 50_000,
            gateway_transaction_id: "zp-1".to_string(),
        };

        let first = ledger.apply_verified_payment(&payment).await;
        assert!(matches!(
            first,
            Ok(ReconcileOutcome::Credited {
                campaign_total: 50_000,
                ..
            })
        ));
        let second = ledger.apply_verified_payment(&payment).await;
        assert!(matches!(second, Ok(ReconcileOutcome::Duplicate(_))));
        assert_eq!(campaign_total(&ledger, campaign.id).await, 50_000);
    }

    #[tokio::test]
    async fn concurrent_deliveries_credit_once() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let ledger = Arc::new(ledger);
        let Ok(created) = ledger.create_order(order(campaign.id, 50_000)).await else {
            panic!("order failed");
        };
        let payment = VerifiedPayment {
            transaction_code: created.donation.transaction_code.clone(),
            amount: 50_000,
            gateway_transaction_id: "zp-1".to_string(),
        };

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let payment = payment.clone();
                tokio::spawn(async move { ledger.apply_verified_payment(&payment).await })
            })
            .collect();
        let mut credited = 0;
        for task in tasks {
            match task.await {
                Ok(Ok(ReconcileOutcome::Credited { .. })) => credited += 1,
                Ok(Ok(ReconcileOutcome::Duplicate(_))) => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(credited, 1);
        assert_eq!(campaign_total(&ledger, campaign.id).await, 50_000);
    }

    #[tokio::test]
    async fn amount_mismatch_leaves_donation_pending() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let Ok(created) = ledger.create_order(order(campaign.id, 50_000)).await else {
            panic!("order failed");
        };
        let payment = VerifiedPayment {
            transaction_code: created.donation.transaction_code.clone(),
            amount: 40_000,
            gateway_transaction_id: "zp-1".to_string(),
        };
        assert!(matches!(
            ledger.apply_verified_payment(&payment).await,
            Err(LedgerError::AmountMismatch {
                expected: 50_000,
                received: 40_000
            })
        ));
        let Ok(donation) = ledger.require_donation(created.donation.id).await else {
            panic!("donation vanished");
        };
        assert_eq!(donation.status, DonationStatus::Pending);
        assert_eq!(campaign_total(&ledger, campaign.id).await, 0);
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let (ledger, _) = ledger_with(ScriptedGateway::default()).await;
        let payment = VerifiedPayment {
            transaction_code: "241017_unknown".to_string(),
            amount: 50_000,
            gateway_transaction_id: "zp-1".to_string(),
        };
        assert!(matches!(
            ledger.apply_verified_payment(&payment).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn override_to_successful_does_not_double_credit() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let donation = paid_donation(&ledger, &campaign).await;

        let Ok(same) = ledger
            .override_status(donation.id, DonationStatus::Successful)
            .await
        else {
            panic!("no-op override failed");
        };
        assert_eq!(same.status, DonationStatus::Successful);
        assert_eq!(campaign_total(&ledger, campaign.id).await, 50_000);

        assert!(matches!(
            ledger
                .override_status(donation.id, DonationStatus::Failed)
                .await,
            Err(LedgerError::Conflict(_))
        ));
        assert!(matches!(
            ledger
                .override_status(donation.id, DonationStatus::Pending)
                .await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn override_pending_to_successful_credits() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let Ok(created) = ledger.create_order(order(campaign.id, 70_000)).await else {
            panic!("order failed");
        };
        let Ok(donation) = ledger
            .override_status(created.donation.id, DonationStatus::Successful)
            .await
        else {
            panic!("override failed");
        };
        assert_eq!(donation.status, DonationStatus::Successful);
        assert_eq!(campaign_total(&ledger, campaign.id).await, 70_000);
    }

    #[tokio::test]
    async fn refund_debits_once_under_concurrency() {
        let gateway = ScriptedGateway::default();
        let refunds = Arc::clone(&gateway.refunds);
        let (ledger, campaign) = ledger_with(gateway).await;
        let donation = paid_donation(&ledger, &campaign).await;
        let ledger = Arc::new(ledger);

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.refund(donation.id, None).await })
            })
            .collect();
        let mut ok = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await {
                Ok(Ok(_)) => ok += 1,
                Ok(Err(LedgerError::Conflict(_))) => conflicts += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!((ok, conflicts), (1, 1));
        assert_eq!(refunds.load(Ordering::SeqCst), 1);
        assert_eq!(campaign_total(&ledger, campaign.id).await, 0);
    }

    #[tokio::test]
    async fn failed_gateway_refund_keeps_donation_successful() {
        let gateway = ScriptedGateway {
            reject_refunds: true,
            ..ScriptedGateway::default()
        };
        let (ledger, campaign) = ledger_with(gateway).await;
        let donation = paid_donation(&ledger, &campaign).await;

        assert!(matches!(
            ledger
                .override_status(donation.id, DonationStatus::Refunded)
                .await,
            Err(LedgerError::GatewayRejected { code: 3, .. })
        ));
        let Ok(current) = ledger.require_donation(donation.id).await else {
            panic!("donation vanished");
        };
        assert_eq!(current.status, DonationStatus::Successful);
        assert_eq!(campaign_total(&ledger, campaign.id).await, 50_000);
    }

    #[tokio::test]
    async fn pending_donation_cannot_be_refunded() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let Ok(created) = ledger.create_order(order(campaign.id, 50_000)).await else {
            panic!("order failed");
        };
        assert!(matches!(
            ledger.refund(created.donation.id, None).await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn refund_by_gateway_transaction_requires_full_amount() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let _ = paid_donation(&ledger, &campaign).await;

        assert!(matches!(
            ledger
                .refund_by_gateway_transaction("zp-1", 10_000, None)
                .await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            ledger
                .refund_by_gateway_transaction("zp-404", 50_000, None)
                .await,
            Err(LedgerError::NotFound(_))
        ));
        let Ok(refund) = ledger
            .refund_by_gateway_transaction("zp-1", 50_000, None)
            .await
        else {
            panic!("refund failed");
        };
        assert_eq!(refund.donation.status, DonationStatus::Refunded);
        assert_eq!(refund.campaign_total, 0);
    }

    #[tokio::test]
    async fn query_merges_gateway_and_local_state() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let Ok(created) = ledger.create_order(order(campaign.id, 50_000)).await else {
            panic!("order failed");
        };
        let Ok(view) = ledger
            .query_status(&created.donation.transaction_code)
            .await
        else {
            panic!("query failed");
        };
        assert!(view.gateway.is_paid);
        assert_eq!(
            view.donation.map(|d| d.status),
            Some(DonationStatus::Pending)
        );
        assert_eq!(view.campaign.map(|c| c.id), Some(campaign.id));
    }

    #[tokio::test]
    async fn query_refuses_malformed_codes() {
        let (ledger, _) = ledger_with(ScriptedGateway::default()).await;
        let result = ledger.query_status("241017_ab12' OR 'a'='a").await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn payment_for_failed_donation_is_unreconciled() {
        let gateway = ScriptedGateway {
            reject_orders: true,
            ..ScriptedGateway::default()
        };
        let (ledger, campaign) = ledger_with(gateway).await;
        let mut events = ledger.event_bus().subscribe();
        assert!(ledger.create_order(order(campaign.id, 50_000)).await.is_err());
        let Ok(LedgerEvent::DonationCreated {
            transaction_code, ..
        }) = events.try_recv()
        else {
            panic!("missing creation event");
        };

        let payment = VerifiedPayment {
            transaction_code,
            amount: 50_000,
            gateway_transaction_id: "zp-late".to_string(),
        };
        let Ok(ReconcileOutcome::Unreconciled(donation)) =
            ledger.apply_verified_payment(&payment).await
        else {
            panic!("late payment must be flagged");
        };
        assert_eq!(donation.status, DonationStatus::Failed);
        assert_eq!(campaign_total(&ledger, campaign.id).await, 0);
    }

    #[tokio::test]
    async fn settled_donations_cannot_be_deleted() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let donation = paid_donation(&ledger, &campaign).await;
        assert!(matches!(
            ledger.delete_donation(donation.id).await,
            Err(LedgerError::Conflict(_))
        ));
        assert!(matches!(
            ledger.delete_donation(DonationId::new()).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn audit_detects_divergence() {
        let (ledger, campaign) = ledger_with(ScriptedGateway::default()).await;
        let _ = paid_donation(&ledger, &campaign).await;

        let Ok(audit) = ledger.audit_campaign(campaign.id).await else {
            panic!("audit failed");
        };
        assert!(audit.consistent);
        assert_eq!(audit.recomputed_total, 50_000);

        ledger
            .store()
            .force_campaign_total(campaign.id, 90_000)
            .await;
        let Ok(audit) = ledger.audit_campaign(campaign.id).await else {
            panic!("audit failed");
        };
        assert!(!audit.consistent);
        assert_eq!(audit.running_total, 90_000);
    }

    #[tokio::test]
    async fn stats_reject_inverted_range() {
        let (ledger, _) = ledger_with(ScriptedGateway::default()).await;
        let now = Utc::now();
        assert!(matches!(
            ledger
                .stats(None, Some(now), Some(now - chrono::Duration::days(1)))
                .await,
            Err(LedgerError::Validation(_))
        ));
    }
}
