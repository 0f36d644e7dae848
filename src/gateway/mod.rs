//! Payment gateway adapters.
//!
//! [`PaymentGateway`] is the seam between the ledger and a remote payment
//! service. Each adapter signs its outbound requests, maps the remote
//! response shapes onto the types below, and verifies its own inbound
//! notifications ([`zalopay::ZaloPayClient::verify_callback`],
//! [`stripe::StripeClient::verify_webhook`]).

pub mod signing;
pub mod stripe;
pub mod zalopay;

use std::time::Duration;

use serde::Serialize;

use crate::config::AmountLimits;
use crate::domain::{CampaignId, DonationId, PaymentMethod};
use crate::error::LedgerError;

pub use stripe::StripeClient;
pub use zalopay::ZaloPayClient;

/// Everything an adapter needs to open one gateway order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Local donation the order pays for.
    pub donation_id: DonationId,
    /// Campaign receiving the funds.
    pub campaign_id: CampaignId,
    /// Correlation key, already persisted on the `PENDING` donation.
    pub transaction_code: String,
    /// Opaque donor reference.
    pub donor_id: String,
    /// Name shown by the gateway.
    pub donor_name: String,
    /// Amount in the smallest currency unit.
    pub amount: u64,
    /// Order description.
    pub description: String,
    /// Where the gateway sends the donor after paying.
    pub redirect_url: Option<String>,
}

/// What the gateway hands back for a freshly opened order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderHandle {
    /// Payment page to redirect the donor to (wallet gateways).
    pub order_url: Option<String>,
    /// Client-side confirmation secret (card processors).
    pub client_secret: Option<String>,
    /// Gateway-side order identifier or token.
    pub gateway_order_id: Option<String>,
    /// Secondary order token, when the gateway issues one.
    pub order_token: Option<String>,
}

/// Live order state as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayOrderStatus {
    /// Gateway return code, as reported.
    pub return_code: i64,
    /// Gateway return message.
    pub return_message: String,
    /// Whether the gateway considers the order paid.
    pub is_paid: bool,
    /// Whether the gateway is still processing the order.
    pub is_processing: bool,
    /// Gateway-side transaction id, once known.
    pub gateway_transaction_id: Option<String>,
    /// Amount the gateway recorded.
    pub amount: Option<u64>,
    /// Discount applied by the gateway.
    pub discount_amount: u64,
}

/// Input for a gateway refund.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    /// Correlation key of the donation being refunded.
    pub transaction_code: String,
    /// Gateway-side transaction id recorded on success.
    pub gateway_transaction_id: String,
    /// Amount to return.
    pub amount: u64,
    /// Reason shown by the gateway.
    pub description: String,
}

/// Gateway acknowledgement of an executed refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundReceipt {
    /// Refund identifier (merchant-side or gateway-side).
    pub refund_id: String,
    /// Gateway return code.
    pub return_code: i64,
    /// Gateway return message.
    pub return_message: String,
}

/// Verified payment notification, extracted from a signed callback.
///
/// Only produced after the signature has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    /// Correlation key of the paid order.
    pub transaction_code: String,
    /// Amount the gateway collected.
    pub amount: u64,
    /// Gateway-side transaction id.
    pub gateway_transaction_id: String,
}

/// Failure talking to a gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayFailure {
    /// No answer within the configured timeout.
    #[error("gateway timed out")]
    Timeout,

    /// Connection or protocol failure.
    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered with a business failure.
    #[error("gateway rejected request ({code}): {message}")]
    Rejected {
        /// Gateway return code.
        code: i64,
        /// Gateway return message.
        message: String,
    },

    /// The gateway answered with something we cannot interpret.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    /// The request could not be signed; nothing was sent.
    #[error("request could not be signed: {0}")]
    Signing(String),
}

impl GatewayFailure {
    /// Returns `true` if the outcome on the gateway side is unknown.
    #[must_use]
    pub const fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
    }
}

impl From<reqwest::Error> for GatewayFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<signing::InvalidKey> for GatewayFailure {
    fn from(err: signing::InvalidKey) -> Self {
        Self::Signing(err.to_string())
    }
}

impl From<GatewayFailure> for LedgerError {
    fn from(failure: GatewayFailure) -> Self {
        match failure {
            GatewayFailure::Timeout => Self::GatewayTimeout,
            GatewayFailure::Transport(reason) | GatewayFailure::InvalidResponse(reason) => {
                Self::Gateway(reason)
            }
            GatewayFailure::Rejected { code, message } => Self::GatewayRejected { code, message },
            GatewayFailure::Signing(reason) => Self::Internal(reason),
        }
    }
}

/// A remote payment service.
///
/// Implementations must be cheap to share across tasks; the ledger calls
/// them concurrently.
#[trait_variant::make(PaymentGateway: Send)]
pub trait LocalPaymentGateway {
    /// Payment method recorded on donations made through this gateway.
    fn method(&self) -> PaymentMethod;

    /// Currency the gateway charges in.
    fn currency(&self) -> &str;

    /// Accepted order amounts.
    fn amount_limits(&self) -> AmountLimits;

    /// Bound on every outbound call.
    fn timeout(&self) -> Duration;

    /// Opens a gateway order for a persisted `PENDING` donation.
    async fn create_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayFailure>;

    /// Queries the live state of the order for `transaction_code`.
    async fn query_order(&self, transaction_code: &str)
    -> Result<GatewayOrderStatus, GatewayFailure>;

    /// Asks the gateway to return the funds of a settled payment.
    async fn refund(&self, refund: &RefundRequest) -> Result<RefundReceipt, GatewayFailure>;
}

/// Builds the shared HTTP client used by the adapters.
///
/// # Errors
///
/// Returns [`GatewayFailure::Transport`] if the TLS backend cannot be
/// initialised.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, GatewayFailure> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("donation-ledger/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| GatewayFailure::Transport(e.to_string()))
}
