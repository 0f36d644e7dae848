//! Gateway-facing DTOs: order creation, callbacks, queries and refunds.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common_dto::{CampaignDto, DonationDto};
use crate::domain::{CampaignId, DonationId};
use crate::error::LedgerError;
use crate::service::CreateOrder;

/// Request body for `POST /api/zalopay/create` and
/// `POST /api/stripe/create-payment-intent`.
///
/// Required fields are optional here so that a missing one is reported as
/// a validation error naming it.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    /// Amount in the smallest currency unit.
    #[serde(default)]
    pub amount: Option<u64>,
    /// Opaque donor reference.
    #[serde(default)]
    pub donor_id: Option<String>,
    /// Campaign to donate to.
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    /// Name shown by the gateway.
    #[serde(default)]
    pub donor_name: Option<String>,
    /// Free-text message.
    #[serde(default, alias = "description")]
    pub message: Option<String>,
    /// Where the gateway sends the donor afterwards.
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// Hide the donor in public views.
    #[serde(default)]
    pub is_anonymous: bool,
}

impl TryFrom<CreateOrderRequest> for CreateOrder {
    type Error = LedgerError;

    fn try_from(req: CreateOrderRequest) -> Result<Self, Self::Error> {
        let missing = [
            ("amount", req.amount.is_none()),
            ("donor_id", req.donor_id.is_none()),
            ("campaign_id", req.campaign_id.is_none()),
            ("donor_name", req.donor_name.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect::<Vec<_>>();
        match (req.amount, req.donor_id, req.campaign_id, req.donor_name) {
            (Some(amount), Some(donor_id), Some(campaign_id), Some(donor_name)) => Ok(Self {
                campaign_id,
                donor_id,
                donor_name,
                amount,
                message: req.message,
                redirect_url: req.redirect_url,
                is_anonymous: req.is_anonymous,
            }),
            _ => Err(LedgerError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            ))),
        }
    }
}

/// Response body for `POST /api/zalopay/create`.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    /// Always `1`.
    pub return_code: i64,
    /// Human-readable outcome.
    pub return_message: String,
    /// Payment page to redirect the donor to.
    pub order_url: Option<String>,
    /// Gateway order token.
    pub zp_trans_token: Option<String>,
    /// Secondary order token.
    pub order_token: Option<String>,
    /// Transaction code of the new donation.
    pub app_trans_id: String,
    /// Local donation identifier.
    pub donation_id: DonationId,
}

/// Request body for `POST /api/zalopay/callback`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CallbackRequest {
    /// Serialized payment payload, authenticated by `mac`.
    #[serde(default)]
    pub data: Option<String>,
    /// Hex HMAC-SHA256 of `data` under the inbound key.
    #[serde(default)]
    pub mac: Option<String>,
}

/// Acknowledgement returned to the gateway for every callback.
///
/// `return_code` is `1` when the payment is recorded, `0` when the gateway
/// should retry later, and `-1` when the callback is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CallbackAck {
    /// Gateway return code.
    pub return_code: i64,
    /// Short reason.
    pub return_message: String,
}

impl CallbackAck {
    /// Payment recorded, now or by an earlier delivery.
    #[must_use]
    pub fn success() -> Self {
        Self::new(1, "success")
    }

    /// Callback rejected without saying why.
    #[must_use]
    pub fn rejected() -> Self {
        Self::new(-1, "rejected")
    }

    /// Builds an acknowledgement.
    #[must_use]
    pub fn new(return_code: i64, return_message: &str) -> Self {
        Self {
            return_code,
            return_message: return_message.to_string(),
        }
    }
}

/// Request body for `POST /api/zalopay/query`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// Transaction code to look up.
    #[serde(default)]
    pub app_trans_id: Option<String>,
}

/// Response body for `POST /api/zalopay/query`.
#[derive(Debug, Serialize, ToSchema)]
pub struct QueryResponse {
    /// Gateway return code.
    pub return_code: i64,
    /// Gateway return message.
    pub return_message: String,
    /// Whether the gateway considers the order paid.
    pub is_paid: bool,
    /// Whether the gateway is still processing the order.
    pub is_processing: bool,
    /// Gateway transaction id, once known.
    pub zp_trans_id: Option<String>,
    /// Amount recorded by the gateway.
    pub amount: Option<u64>,
    /// Discount applied by the gateway.
    pub discount_amount: u64,
    /// Local record, donor hidden when anonymous.
    pub donation: Option<DonationDto>,
    /// Campaign of the local record.
    pub campaign: Option<CampaignDto>,
}

/// Request body for `POST /api/zalopay/refund`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefundRequestDto {
    /// Gateway transaction id of the payment to refund.
    #[serde(default)]
    pub zp_trans_id: Option<String>,
    /// Amount to refund. Must equal the donation amount.
    #[serde(default)]
    pub amount: Option<u64>,
    /// Reason forwarded to the gateway.
    #[serde(default)]
    pub description: Option<String>,
}

/// Response body for a committed refund.
#[derive(Debug, Serialize, ToSchema)]
pub struct RefundResponse {
    /// Always `1`.
    pub return_code: i64,
    /// Gateway return message.
    pub return_message: String,
    /// Refund identifier.
    pub refund_id: String,
    /// Donation after the refund.
    pub donation: DonationDto,
    /// Campaign total after the debit.
    pub campaign_total: u64,
}

/// Response body for `POST /api/stripe/create-payment-intent`.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentIntentResponse {
    /// Secret the client confirms the card payment with.
    pub client_secret: Option<String>,
    /// Payment intent id.
    pub payment_intent_id: Option<String>,
    /// Transaction code of the new donation.
    pub transaction_code: String,
    /// Local donation identifier.
    pub donation_id: DonationId,
}

/// Response body of an accepted webhook delivery.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    /// Always `true`.
    pub received: bool,
}
