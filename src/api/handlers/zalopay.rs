//! Mobile-wallet payment handlers: order creation, callback, query, refund.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::api::dto::{
    CallbackAck, CallbackRequest, CampaignDto, CreateOrderRequest, CreateOrderResponse,
    DonationDto, QueryRequest, QueryResponse, RefundRequestDto, RefundResponse,
};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, LedgerError};
use crate::service::{CreateOrder, ReconcileOutcome};

/// `POST /api/zalopay/create` — Open a wallet payment order.
///
/// # Errors
///
/// Returns [`LedgerError`] on invalid input, an unknown or closed campaign,
/// or a gateway failure. The donation is `FAILED` in the latter case.
#[utoipa::path(
    post,
    path = "/api/zalopay/create",
    tag = "ZaloPay",
    summary = "Create a wallet payment order",
    description = "Records a PENDING donation under a fresh transaction code, then opens a signed ZaloPay order for it.",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Order opened", body = CreateOrderResponse),
        (status = 400, description = "Invalid input or order refused by the gateway", body = ErrorResponse),
        (status = 404, description = "Campaign not found", body = ErrorResponse),
        (status = 409, description = "Campaign closed", body = ErrorResponse),
        (status = 500, description = "Gateway unreachable", body = ErrorResponse),
        (status = 504, description = "Gateway timed out", body = ErrorResponse),
    )
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let order = CreateOrder::try_from(req)?;
    let created = state.zalopay.create_order(order).await?;

    Ok(Json(CreateOrderResponse {
        return_code: 1,
        return_message: "order created".to_string(),
        order_url: created.handle.order_url,
        zp_trans_token: created.handle.gateway_order_id,
        order_token: created.handle.order_token,
        app_trans_id: created.donation.transaction_code,
        donation_id: created.donation.id,
    }))
}

/// `POST /api/zalopay/callback` — Payment notification from the gateway.
///
/// Always answers HTTP 200; the outcome is carried in `return_code`.
#[utoipa::path(
    post,
    path = "/api/zalopay/callback",
    tag = "ZaloPay",
    summary = "Gateway payment callback",
    description = "Verifies the MAC of `data` with the inbound key, then credits the donation exactly once. Redeliveries are acknowledged with `return_code` 1 without crediting again.",
    request_body = CallbackRequest,
    responses(
        (status = 200, description = "Acknowledgement: 1 recorded, 0 retry later, -1 rejected", body = CallbackAck),
    )
)]
pub async fn callback(State(state): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    Json(reconcile_callback(&state, &body).await)
}

async fn reconcile_callback(state: &AppState, body: &[u8]) -> CallbackAck {
    let request = serde_json::from_slice::<CallbackRequest>(body).unwrap_or_default();
    let data = request.data.filter(|d| !d.is_empty());
    let mac = request.mac.filter(|m| !m.is_empty());
    let (Some(data), Some(mac)) = (data, mac) else {
        tracing::warn!(bytes = body.len(), "callback without data or mac");
        return CallbackAck::new(-1, "missing callback data");
    };

    let payment = match state.zalopay.gateway().verify_callback(&data, &mac) {
        Ok(payment) => payment,
        Err(err) => {
            tracing::warn!(error = %err, data = %data, "callback rejected");
            return CallbackAck::rejected();
        }
    };

    match state.zalopay.apply_verified_payment(&payment).await {
        Ok(
            ReconcileOutcome::Credited { .. }
            | ReconcileOutcome::Duplicate(_)
            | ReconcileOutcome::Unreconciled(_),
        ) => CallbackAck::success(),
        Err(LedgerError::NotFound(_)) => CallbackAck::new(0, "donation not found"),
        Err(LedgerError::AmountMismatch { .. }) => CallbackAck::rejected(),
        Err(err) => {
            tracing::error!(
                transaction_code = %payment.transaction_code,
                error = %err,
                "callback could not be applied"
            );
            CallbackAck::new(0, "processing error")
        }
    }
}

/// `POST /api/zalopay/query` — Live order status merged with the local record.
///
/// # Errors
///
/// Returns [`LedgerError`] on a missing transaction code or a gateway
/// failure.
#[utoipa::path(
    post,
    path = "/api/zalopay/query",
    tag = "ZaloPay",
    summary = "Query order status",
    description = "Queries the gateway for the order and merges the answer with the local donation and campaign. Nothing is written.",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Merged status", body = QueryResponse),
        (status = 400, description = "Missing transaction code", body = ErrorResponse),
        (status = 504, description = "Gateway timed out", body = ErrorResponse),
    )
)]
pub async fn query_order(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let Some(code) = req.app_trans_id.filter(|c| !c.trim().is_empty()) else {
        return Err(LedgerError::Validation(
            "app_trans_id is required".to_string(),
        ));
    };
    let view = state.zalopay.query_status(&code).await?;

    Ok(Json(QueryResponse {
        return_code: view.gateway.return_code,
        return_message: view.gateway.return_message,
        is_paid: view.gateway.is_paid,
        is_processing: view.gateway.is_processing,
        zp_trans_id: view.gateway.gateway_transaction_id,
        amount: view.gateway.amount,
        discount_amount: view.gateway.discount_amount,
        donation: view.donation.map(DonationDto::public),
        campaign: view.campaign.map(CampaignDto::from),
    }))
}

/// `POST /api/zalopay/refund` — Refund a settled wallet payment (operator).
///
/// # Errors
///
/// Returns [`LedgerError`] on invalid input, an unknown transaction, a
/// donation that is not `SUCCESSFUL`, or a gateway failure. The donation
/// stays `SUCCESSFUL` unless the gateway confirms the refund.
#[utoipa::path(
    post,
    path = "/api/zalopay/refund",
    tag = "ZaloPay",
    summary = "Refund a payment",
    description = "Refunds the donation settled under `zp_trans_id` through the gateway, then debits its campaign. Only full refunds are supported.",
    request_body = RefundRequestDto,
    security(("operator_token" = [])),
    responses(
        (status = 200, description = "Refund committed", body = RefundResponse),
        (status = 400, description = "Invalid input or refund refused by the gateway", body = ErrorResponse),
        (status = 401, description = "Missing or invalid operator token", body = ErrorResponse),
        (status = 404, description = "Unknown gateway transaction", body = ErrorResponse),
        (status = 409, description = "Donation is not SUCCESSFUL", body = ErrorResponse),
    )
)]
pub async fn refund(
    State(state): State<AppState>,
    Json(req): Json<RefundRequestDto>,
) -> Result<impl IntoResponse, LedgerError> {
    let (Some(zp_trans_id), Some(amount)) = (req.zp_trans_id, req.amount) else {
        return Err(LedgerError::Validation(
            "zp_trans_id and amount are required".to_string(),
        ));
    };
    let outcome = state
        .zalopay
        .refund_by_gateway_transaction(&zp_trans_id, amount, req.description)
        .await?;

    Ok(Json(RefundResponse {
        return_code: 1,
        return_message: outcome.receipt.return_message,
        refund_id: outcome.receipt.refund_id,
        donation: DonationDto::full(outcome.donation),
        campaign_total: outcome.campaign_total,
    }))
}
