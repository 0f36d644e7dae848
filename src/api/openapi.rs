//! OpenAPI document for the REST surface.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use super::handlers;

/// Generated OpenAPI 3 document, served at `/api-docs/openapi.json`.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "donation-ledger",
        description = "Crowdfunding donation ledger: gateway orders, signed callback reconciliation, refunds."
    ),
    paths(
        handlers::system::health_handler,
        handlers::zalopay::create_order,
        handlers::zalopay::callback,
        handlers::zalopay::query_order,
        handlers::zalopay::refund,
        handlers::donation::get_donation,
        handlers::donation::update_status,
        handlers::donation::delete_donation,
        handlers::donation::campaign_donations,
        handlers::donation::donor_donations,
        handlers::donation::stats,
        handlers::stripe::create_payment_intent,
        handlers::stripe::webhook,
        handlers::campaign::create_campaign,
        handlers::campaign::get_campaign,
        handlers::campaign::audit_campaign,
    ),
    modifiers(&OperatorToken),
    tags(
        (name = "System", description = "Service health"),
        (name = "ZaloPay", description = "Wallet orders, callbacks, queries and refunds"),
        (name = "Stripe", description = "Card payment intents and webhooks"),
        (name = "Donations", description = "Donation lookups, listings and operator maintenance"),
        (name = "Campaigns", description = "Campaigns and total audits"),
    )
)]
pub struct ApiDoc;

/// Registers the `operator_token` bearer scheme.
#[derive(Debug)]
struct OperatorToken;

impl Modify for OperatorToken {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "operator_token",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}
