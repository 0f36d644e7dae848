//! Card processor handlers: payment intents and webhooks.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use chrono::Utc;

use crate::api::dto::{CreateOrderRequest, PaymentIntentResponse, WebhookAck};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, LedgerError};
use crate::gateway::stripe::WebhookEvent;
use crate::service::CreateOrder;

/// Header carrying the webhook signature.
const SIGNATURE_HEADER: &str = "stripe-signature";

/// `POST /api/stripe/create-payment-intent` — Open a card payment.
///
/// # Errors
///
/// Returns [`LedgerError`] when card payments are not configured, on invalid
/// input, an unknown or closed campaign, or a processor failure.
#[utoipa::path(
    post,
    path = "/api/stripe/create-payment-intent",
    tag = "Stripe",
    summary = "Create a card payment intent",
    description = "Records a PENDING donation and opens a payment intent carrying its transaction code in the metadata.",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Payment intent opened", body = PaymentIntentResponse),
        (status = 400, description = "Invalid input or intent refused", body = ErrorResponse),
        (status = 404, description = "Campaign not found or card payments disabled", body = ErrorResponse),
        (status = 504, description = "Processor timed out", body = ErrorResponse),
    )
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let ledger = state.stripe()?;
    let order = CreateOrder::try_from(req)?;
    let created = ledger.create_order(order).await?;

    Ok(Json(PaymentIntentResponse {
        client_secret: created.handle.client_secret,
        payment_intent_id: created.handle.gateway_order_id,
        transaction_code: created.donation.transaction_code,
        donation_id: created.donation.id,
    }))
}

/// `POST /api/stripe/webhook` — Signed event delivery from the processor.
///
/// # Errors
///
/// Returns [`LedgerError::Signature`] (400) for a missing, stale or forged
/// signature. Every authenticated delivery is acknowledged with 200.
#[utoipa::path(
    post,
    path = "/api/stripe/webhook",
    tag = "Stripe",
    summary = "Processor webhook",
    description = "Verifies the `Stripe-Signature` header over the raw body. `payment_intent.succeeded` credits the donation exactly once, `payment_intent.canceled` fails it. A declined attempt (`payment_intent.payment_failed`) leaves the donation pending. Other events are ignored.",
    request_body(content = String, description = "Raw event JSON"),
    responses(
        (status = 200, description = "Delivery accepted", body = WebhookAck),
        (status = 400, description = "Invalid signature", body = ErrorResponse),
    )
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, LedgerError> {
    let ledger = state.stripe()?;
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        tracing::warn!("webhook without signature header");
        return Err(LedgerError::Signature);
    };
    let event = ledger
        .gateway()
        .verify_webhook(&body, signature, Utc::now())
        .inspect_err(|err| tracing::warn!(error = %err, "webhook rejected"))?;

    match event {
        WebhookEvent::PaymentSucceeded(payment) => {
            if let Err(err) = ledger.apply_verified_payment(&payment).await {
                tracing::warn!(
                    transaction_code = %payment.transaction_code,
                    error = %err,
                    "webhook payment not applied"
                );
            }
        }
        WebhookEvent::AttemptFailed {
            transaction_code,
            gateway_transaction_id,
            reason,
        } => {
            tracing::warn!(
                transaction_code = %transaction_code,
                payment_intent = %gateway_transaction_id,
                reason = %reason,
                "card attempt declined, donation stays pending"
            );
        }
        WebhookEvent::PaymentCanceled {
            transaction_code,
            gateway_transaction_id,
            reason,
        } => {
            if let Err(err) = ledger.mark_failed(&transaction_code, &reason).await {
                tracing::error!(
                    transaction_code = %transaction_code,
                    payment_intent = %gateway_transaction_id,
                    error = %err,
                    "webhook cancellation not applied"
                );
            }
        }
        WebhookEvent::Ignored { event_type } => {
            tracing::debug!(event_type = %event_type, "webhook event ignored");
        }
    }

    Ok(Json(WebhookAck { received: true }))
}
