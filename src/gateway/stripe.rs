//! Stripe card-processor adapter.
//!
//! Orders are payment intents tagged with the transaction code in their
//! metadata. Webhooks carry a `Stripe-Signature` header with a timestamp and
//! one or more `v1` HMAC-SHA256 tags over `"<timestamp>.<body>"`.
//!
//! A declined card does not close an intent: the donor may retry and the
//! same intent can still succeed. Only `payment_intent.canceled` is final.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::signing::verify_hmac_sha256_hex;
use super::{
    GatewayFailure, GatewayOrderStatus, OrderHandle, OrderRequest, PaymentGateway,
    RefundReceipt, RefundRequest, VerifiedPayment, http_client,
};
use crate::config::{AmountLimits, StripeConfig};
use crate::domain::{PaymentMethod, transaction_code};
use crate::error::LedgerError;

/// Metadata key carrying the ledger's correlation key.
const METADATA_TRANSACTION_CODE: &str = "transaction_code";

/// Stripe REST client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    config: StripeConfig,
    http: reqwest::Client,
}

/// Verified webhook event, reduced to what the ledger acts upon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// `payment_intent.succeeded` for one of our orders.
    PaymentSucceeded(VerifiedPayment),
    /// `payment_intent.payment_failed`: one attempt was declined. The intent
    /// stays open and the donation stays `PENDING`.
    AttemptFailed {
        /// Correlation key from the intent metadata.
        transaction_code: String,
        /// Payment intent id.
        gateway_transaction_id: String,
        /// Decline reason reported by Stripe.
        reason: String,
    },
    /// `payment_intent.canceled`: the intent can no longer be paid.
    PaymentCanceled {
        /// Correlation key from the intent metadata.
        transaction_code: String,
        /// Payment intent id.
        gateway_transaction_id: String,
        /// Cancellation reason reported by Stripe.
        reason: String,
    },
    /// Any other event, or an intent we did not create.
    Ignored {
        /// Stripe event type.
        event_type: String,
    },
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: PaymentIntent,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    amount: u64,
    #[serde(default)]
    amount_received: u64,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    last_payment_error: Option<StripeErrorBody>,
    #[serde(default)]
    cancellation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    data: Vec<PaymentIntent>,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl StripeClient {
    /// Builds a client with its own HTTP connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayFailure::Transport`] if the HTTP client cannot be
    /// built.
    pub fn new(config: StripeConfig) -> Result<Self, GatewayFailure> {
        let http = http_client(config.timeout)?;
        Ok(Self { config, http })
    }

    /// Verifies a webhook delivery and classifies the event.
    ///
    /// The body is parsed only after a `v1` tag in `signature_header`
    /// authenticates it and its timestamp lies within the configured
    /// tolerance of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Signature`] for a missing, stale or invalid
    /// signature, and [`LedgerError::Validation`] for an authenticated body
    /// that is not a Stripe event.
    pub fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent, LedgerError> {
        let mut timestamp: Option<i64> = None;
        let mut tags = Vec::new();
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => tags.push(value),
                _ => {}
            }
        }
        let Some(timestamp) = timestamp else {
            return Err(LedgerError::Signature);
        };
        if now.timestamp().abs_diff(timestamp) > self.config.signature_tolerance.as_secs() {
            tracing::warn!(timestamp, "stale webhook signature");
            return Err(LedgerError::Signature);
        }

        let mut signed = format!("{timestamp}.").into_bytes();
        signed.extend_from_slice(payload);
        let secret = self.config.webhook_secret.reveal();
        if !tags
            .iter()
            .any(|tag| verify_hmac_sha256_hex(secret, &signed, tag).is_ok())
        {
            return Err(LedgerError::Signature);
        }

        let event: Event = serde_json::from_slice(payload)
            .map_err(|e| LedgerError::Validation(format!("malformed webhook event: {e}")))?;
        Ok(classify(event))
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayFailure> {
        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayFailure::Transport(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            let body = response
                .json::<StripeErrorEnvelope>()
                .await
                .map_err(|e| GatewayFailure::InvalidResponse(e.to_string()))?;
            let message = body
                .error
                .message
                .or(body.error.code)
                .unwrap_or_else(|| status.to_string());
            return Err(GatewayFailure::Rejected {
                code: i64::from(status.as_u16()),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayFailure::InvalidResponse(e.to_string()))
    }
}

fn classify(event: Event) -> WebhookEvent {
    let intent = event.data.object;
    let code = intent.metadata.get(METADATA_TRANSACTION_CODE).cloned();
    match (event.event_type.as_str(), code) {
        ("payment_intent.succeeded", Some(transaction_code)) => {
            WebhookEvent::PaymentSucceeded(VerifiedPayment {
                transaction_code,
                amount: intent.amount_received,
                gateway_transaction_id: intent.id,
            })
        }
        ("payment_intent.payment_failed", Some(transaction_code)) => WebhookEvent::AttemptFailed {
            transaction_code,
            gateway_transaction_id: intent.id,
            reason: intent
                .last_payment_error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "payment failed".to_string()),
        },
        ("payment_intent.canceled", Some(transaction_code)) => WebhookEvent::PaymentCanceled {
            transaction_code,
            gateway_transaction_id: intent.id,
            reason: intent
                .cancellation_reason
                .unwrap_or_else(|| "canceled".to_string()),
        },
        _ => WebhookEvent::Ignored {
            event_type: event.event_type.clone(),
        },
    }
}

impl PaymentGateway for StripeClient {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    fn currency(&self) -> &str {
        &self.config.currency
    }

    fn amount_limits(&self) -> AmountLimits {
        self.config.limits
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayFailure> {
        let form = [
            ("amount", order.amount.to_string()),
            ("currency", self.config.currency.clone()),
            ("description", order.description.clone()),
            ("payment_method_types[]", "card".to_string()),
            ("metadata[transaction_code]", order.transaction_code.clone()),
            ("metadata[donation_id]", order.donation_id.to_string()),
            ("metadata[campaign_id]", order.campaign_id.to_string()),
            ("metadata[donor_id]", order.donor_id.clone()),
        ];
        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.config.api_base))
            .bearer_auth(self.config.secret_key.reveal())
            .header("Idempotency-Key", &order.transaction_code)
            .form(&form)
            .send()
            .await?;
        let intent: PaymentIntent = Self::read(response).await?;

        let Some(client_secret) = intent.client_secret else {
            return Err(GatewayFailure::InvalidResponse(
                "payment intent without client_secret".to_string(),
            ));
        };
        Ok(OrderHandle {
            order_url: None,
            client_secret: Some(client_secret),
            gateway_order_id: Some(intent.id),
            order_token: None,
        })
    }

    async fn query_order(
        &self,
        transaction_code: &str,
    ) -> Result<GatewayOrderStatus, GatewayFailure> {
        if !transaction_code::is_well_formed(transaction_code) {
            return Err(GatewayFailure::Rejected {
                code: 400,
                message: "malformed transaction code".to_string(),
            });
        }
        let query = format!("metadata['{METADATA_TRANSACTION_CODE}']:'{transaction_code}'");
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/search", self.config.api_base))
            .bearer_auth(self.config.secret_key.reveal())
            .query(&[("query", query.as_str())])
            .send()
            .await?;
        let result: SearchResult = Self::read(response).await?;

        let Some(intent) = result.data.into_iter().next() else {
            return Ok(GatewayOrderStatus {
                return_code: -1,
                return_message: "no payment intent for transaction code".to_string(),
                is_paid: false,
                is_processing: false,
                gateway_transaction_id: None,
                amount: None,
                discount_amount: 0,
            });
        };
        let (return_code, is_paid, is_processing) = match intent.status.as_str() {
            "succeeded" => (1, true, false),
            "canceled" => (2, false, false),
            _ => (3, false, true),
        };
        Ok(GatewayOrderStatus {
            return_code,
            return_message: intent.status,
            is_paid,
            is_processing,
            gateway_transaction_id: Some(intent.id),
            amount: Some(if is_paid {
                intent.amount_received
            } else {
                intent.amount
            }),
            discount_amount: 0,
        })
    }

    async fn refund(&self, refund: &RefundRequest) -> Result<RefundReceipt, GatewayFailure> {
        let form = [
            ("payment_intent", refund.gateway_transaction_id.clone()),
            ("amount", refund.amount.to_string()),
            ("reason", "requested_by_customer".to_string()),
            ("metadata[transaction_code]", refund.transaction_code.clone()),
        ];
        let response = self
            .http
            .post(format!("{}/v1/refunds", self.config.api_base))
            .bearer_auth(self.config.secret_key.reveal())
            .header("Idempotency-Key", format!("refund-{}", refund.transaction_code))
            .form(&form)
            .send()
            .await?;
        let result: Refund = Self::read(response).await?;

        match result.status.as_str() {
            "succeeded" | "pending" => Ok(RefundReceipt {
                refund_id: result.id,
                return_code: 1,
                return_message: result.status,
            }),
            _ => Err(GatewayFailure::Rejected {
                code: 2,
                message: format!("refund {}", result.status),
            }),
        }
    }
}
