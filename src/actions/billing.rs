use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval, CreateCustomer, Currency, Customer,
    Webhook,
};
use tracing::{error, warn};

use crate::billing;
use crate::web::AppState;

use super::json_error;

/// Acknowledgement body for accepted webhook deliveries
#[derive(Debug, Serialize)]
pub struct WebhookReceivedResponse {
    pub received: bool,
}

/// Request body for starting a subscription checkout
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Response carrying the Stripe-hosted checkout URL
#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub url: String,
}

/// POST /api/stripe-webhook
/// Handle incoming Stripe webhook events.
///
/// The raw body is required unparsed: the signature covers the exact bytes
/// Stripe sent, and that signature is the only authentication on this path.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(stripe_config) = state.stripe.clone() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    metrics::counter!("stripe.webhook.received").increment(1);
    let start = std::time::Instant::now();

    let Some(signature) = headers
        .get("Stripe-Signature")
        .and_then(|sig| sig.to_str().ok())
    else {
        metrics::counter!("stripe.webhook.signature_invalid").increment(1);
        return webhook_error("missing Stripe-Signature header");
    };

    let Ok(payload) = std::str::from_utf8(&body) else {
        return webhook_error("body is not valid UTF-8");
    };

    // Verify the signature against the raw payload. Failure means no state
    // change at all.
    let event = match Webhook::construct_event(payload, signature, &stripe_config.webhook_secret) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Invalid webhook signature");
            metrics::counter!("stripe.webhook.signature_invalid").increment(1);
            return webhook_error(&e.to_string());
        }
    };

    let result = billing::process_webhook_event(state.billing_store.as_ref(), &event).await;

    let duration_ms = start.elapsed().as_millis() as f64;
    metrics::histogram!("stripe.webhook.processing_ms").record(duration_ms);

    match result {
        Ok(()) => Json(WebhookReceivedResponse { received: true }).into_response(),
        Err(e) => {
            error!(event_type = %event.type_, error = %e, "Failed to process webhook event");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Webhook handler failed").into_response()
        }
    }
}

fn webhook_error(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, format!("Webhook Error: {message}")).into_response()
}

/// POST /api/create-checkout-session
/// Create (or reuse) a Stripe customer for the user and open a
/// subscription-mode checkout session for the Pro plan
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(request): Json<CheckoutSessionRequest>,
) -> Response {
    let (user_id, email) = match (request.user_id.as_deref(), request.email.as_deref()) {
        (Some(user_id), Some(email)) if !user_id.is_empty() && !email.is_empty() => {
            (user_id, email)
        }
        _ => {
            return json_error(StatusCode::BAD_REQUEST, "Missing userId or email").into_response();
        }
    };

    let Some(stripe_config) = state.stripe.clone() else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "Stripe is not configured")
            .into_response();
    };

    let store = state.billing_store.as_ref();

    let existing_customer = match store.stripe_customer_id(user_id).await {
        Ok(id) => id,
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to look up Stripe customer");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create checkout session",
            )
            .into_response();
        }
    };

    // stripe_customer_id is assigned once and reused for every later
    // checkout of the same user
    let customer_id = match existing_customer {
        Some(id) => match id.parse() {
            Ok(id) => id,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Invalid Stripe customer ID in database");
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to create checkout session",
                )
                .into_response();
            }
        },
        None => {
            let mut customer_params = CreateCustomer::new();
            customer_params.email = Some(email);
            customer_params.metadata = Some(HashMap::from([(
                "supabase_user_id".to_string(),
                user_id.to_string(),
            )]));

            let customer = match Customer::create(&stripe_config.client, customer_params).await {
                Ok(customer) => customer,
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "Failed to create Stripe customer");
                    metrics::counter!("stripe.api.errors").increment(1);
                    return json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to create checkout session",
                    )
                    .into_response();
                }
            };

            if let Err(e) = store
                .set_stripe_customer_id(user_id, customer.id.as_str())
                .await
            {
                error!(user_id = %user_id, error = %e, "Failed to store Stripe customer ID");
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to create checkout session",
                )
                .into_response();
            }

            customer.id
        }
    };

    let base_url =
        std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let success_url = format!("{base_url}/dashboard?upgrade=success");
    let cancel_url = format!("{base_url}/dashboard?upgrade=cancelled");

    let mut checkout_params = CreateCheckoutSession::new();
    checkout_params.customer = Some(customer_id);
    checkout_params.mode = Some(CheckoutSessionMode::Subscription);
    checkout_params.success_url = Some(&success_url);
    checkout_params.cancel_url = Some(&cancel_url);
    checkout_params.payment_method_types =
        Some(vec![stripe::CreateCheckoutSessionPaymentMethodTypes::Card]);
    checkout_params.line_items = Some(vec![CreateCheckoutSessionLineItems {
        price_data: Some(CreateCheckoutSessionLineItemsPriceData {
            currency: Currency::USD,
            product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                name: "Omi Pro".to_string(),
                description: Some("Unlimited AI generations and premium features".to_string()),
                ..Default::default()
            }),
            recurring: Some(CreateCheckoutSessionLineItemsPriceDataRecurring {
                interval: CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
                interval_count: None,
            }),
            unit_amount: Some(500),
            ..Default::default()
        }),
        quantity: Some(1),
        ..Default::default()
    }]);
    // The webhook resolves the account from this metadata when the session
    // completes
    checkout_params.metadata = Some(HashMap::from([(
        "supabase_user_id".to_string(),
        user_id.to_string(),
    )]));

    let session = match CheckoutSession::create(&stripe_config.client, checkout_params).await {
        Ok(session) => session,
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to create checkout session");
            metrics::counter!("stripe.api.errors").increment(1);
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create checkout session",
            )
            .into_response();
        }
    };

    metrics::counter!("stripe.checkout.sessions_created").increment(1);

    let url = session.url.unwrap_or_default();
    Json(CheckoutSessionResponse { url }).into_response()
}
