//! Service layer: business logic orchestration.
//!
//! [`DonationLedger`] coordinates one payment gateway with the ledger store
//! and emits events through the [`super::domain::EventBus`]. The server runs
//! one ledger per configured gateway, all sharing the same store and bus.

pub mod donation_ledger;

pub use donation_ledger::{
    CampaignAudit, CreateOrder, CreatedOrder, DonationLedger, DonationPage, ReconcileOutcome,
    RefundOutcome, StatusView,
};
