//! Domain layer: records, status machine, and the event system.
//!
//! This module contains the ledger's domain model: donation and campaign
//! records with their identifiers, the closed donation status machine,
//! transaction code generation, the event bus for broadcasting applied
//! transitions, and per-key locks used to serialize refunds.

pub mod campaign;
pub mod donation;
pub mod event_bus;
pub mod ids;
pub mod keyed_lock;
pub mod ledger_event;
pub mod transaction_code;

pub use campaign::{Campaign, CampaignStatus, NewCampaign};
pub use donation::{Donation, DonationStatus, NewDonation, PaymentMethod};
pub use event_bus::{CampaignEvents, EventBus};
pub use ids::{CampaignId, DonationId};
pub use keyed_lock::KeyedLocks;
pub use ledger_event::LedgerEvent;
