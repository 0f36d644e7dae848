//! # donation-ledger
//!
//! Crowdfunding donation ledger: opens payment orders with external
//! gateways, reconciles their signed callbacks into donation records, and
//! keeps each campaign's running total equal to the sum of its successful
//! donations.
//!
//! ## Architecture
//!
//! ```text
//! Donors, operators, gateway callbacks (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── DonationLedger per gateway (service/)
//!     ├── EventBus (domain/)
//!     │
//!     ├── PaymentGateway: ZaloPay, Stripe (gateway/)
//!     │
//!     └── LedgerStore: PostgreSQL or in-memory (persistence/)
//! ```
//!
//! Every status change is a guarded transition applied by the store
//! together with its campaign adjustment, so a redelivered or concurrent
//! callback credits a campaign at most once.

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod persistence;
pub mod secret;
pub mod service;
