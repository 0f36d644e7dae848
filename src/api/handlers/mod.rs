//! REST endpoint handlers organized by resource.

pub mod campaign;
pub mod donation;
pub mod stripe;
pub mod system;
pub mod zalopay;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post};

use crate::api::auth::require_operator;
use crate::app_state::AppState;

/// Routes open to donors and gateways.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(system::health_handler))
        .route("/api/zalopay/create", post(zalopay::create_order))
        .route("/api/zalopay/callback", post(zalopay::callback))
        .route("/api/zalopay/query", post(zalopay::query_order))
        .route("/api/zalopay/donation/{id}", get(donation::get_donation))
        .route(
            "/api/zalopay/donations/campaign/{campaign_id}",
            get(donation::campaign_donations),
        )
        .route(
            "/api/zalopay/donations/user/{donor_id}",
            get(donation::donor_donations),
        )
        .route("/api/zalopay/donations/stats", get(donation::stats))
        .route(
            "/api/stripe/create-payment-intent",
            post(stripe::create_payment_intent),
        )
        .route("/api/stripe/webhook", post(stripe::webhook))
        .route("/api/campaigns", post(campaign::create_campaign))
        .route("/api/campaigns/{id}", get(campaign::get_campaign))
}

/// Routes that require the operator bearer token.
pub fn operator_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/zalopay/refund", post(zalopay::refund))
        .route(
            "/api/zalopay/donation/{id}/status",
            patch(donation::update_status),
        )
        .route("/api/zalopay/donation/{id}", delete(donation::delete_donation))
        .route("/api/campaigns/{id}/audit", get(campaign::audit_campaign))
        .route_layer(from_fn_with_state(state.clone(), require_operator))
}
