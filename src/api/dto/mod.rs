//! Data Transfer Objects for REST request/response serialization.
//!
//! Amounts are integers in the smallest currency unit. Gateway-facing
//! bodies keep the gateway's own field names (`app_trans_id`,
//! `return_code`, ...).

pub mod campaign_dto;
pub mod common_dto;
pub mod donation_dto;
pub mod payment_dto;

pub use campaign_dto::*;
pub use common_dto::*;
pub use donation_dto::*;
pub use payment_dto::*;
