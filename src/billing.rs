use anyhow::Result;
use chrono::{DateTime, Utc};
use stripe::{Event, EventObject};
use tracing::{info, warn};

use crate::quota_store::QuotaStore;
use crate::users::SubscriptionStatus;

/// Map a Stripe subscription status onto ours. Anything that is neither
/// active nor canceled (past_due, unpaid, incomplete, ...) counts as
/// expired.
pub fn map_provider_status(provider_status: &str) -> SubscriptionStatus {
    match provider_status {
        "active" => SubscriptionStatus::Active,
        "canceled" => SubscriptionStatus::Cancelled,
        _ => SubscriptionStatus::Expired,
    }
}

/// Apply one verified webhook event to the quota store.
///
/// Stripe does not guarantee end-to-end ordering, so every arm asserts only
/// the transition implied by its own event type and is safe to replay.
/// Events that cannot be resolved to an account are logged and dropped;
/// only store failures propagate.
pub async fn process_webhook_event(store: &dyn QuotaStore, event: &Event) -> Result<()> {
    let event_type = event.type_.to_string();

    match event_type.as_str() {
        "checkout.session.completed" => {
            if let EventObject::CheckoutSession(session) = &event.data.object {
                let user_id = session
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("supabase_user_id"))
                    .cloned();
                let subscription_id = session.subscription.as_ref().map(|s| s.id().to_string());

                match (user_id, subscription_id) {
                    (Some(user_id), Some(subscription_id)) => {
                        handle_checkout_completed(store, &user_id, &subscription_id).await?;
                    }
                    _ => {
                        warn!(
                            session_id = %session.id,
                            "checkout.session.completed without user id or subscription, skipping"
                        );
                    }
                }
            }
        }
        "customer.subscription.updated" => {
            if let EventObject::Subscription(subscription) = &event.data.object {
                let customer_id = subscription.customer.id().to_string();
                let cancel_at = subscription
                    .cancel_at
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

                handle_subscription_updated(
                    store,
                    &customer_id,
                    subscription.status.as_str(),
                    cancel_at,
                )
                .await?;
            }
        }
        "customer.subscription.deleted" => {
            if let EventObject::Subscription(subscription) = &event.data.object {
                let customer_id = subscription.customer.id().to_string();
                handle_subscription_deleted(store, &customer_id).await?;
            }
        }
        _ => {
            info!(event_type = %event_type, "Unhandled webhook event type");
        }
    }

    Ok(())
}

/// Checkout completed: upgrade the account to pro/active and record the
/// provider subscription id. Replaying the same event writes the same
/// state again.
pub async fn handle_checkout_completed(
    store: &dyn QuotaStore,
    user_id: &str,
    subscription_id: &str,
) -> Result<()> {
    store
        .activate_subscription(user_id, subscription_id, Utc::now())
        .await?;

    metrics::counter!("stripe.subscriptions.activated").increment(1);
    info!(user_id = %user_id, "User upgraded to Pro");
    Ok(())
}

/// Subscription updated: mirror the provider status. Cancellations carry
/// the provider's cancellation timestamp as the end date; any other status
/// clears it.
pub async fn handle_subscription_updated(
    store: &dyn QuotaStore,
    customer_id: &str,
    provider_status: &str,
    cancel_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let Some(user_id) = store.find_user_by_stripe_customer(customer_id).await? else {
        info!(customer_id = %customer_id, "No account for Stripe customer, skipping update");
        return Ok(());
    };

    let status = map_provider_status(provider_status);
    let end_date = if status == SubscriptionStatus::Cancelled {
        cancel_at
    } else {
        None
    };

    store
        .set_subscription_status(&user_id, status, end_date)
        .await?;

    info!(user_id = %user_id, status = status.as_str(), "Subscription updated");
    Ok(())
}

/// Subscription deleted: downgrade to free/expired and clear the
/// subscription id.
pub async fn handle_subscription_deleted(store: &dyn QuotaStore, customer_id: &str) -> Result<()> {
    let Some(user_id) = store.find_user_by_stripe_customer(customer_id).await? else {
        info!(customer_id = %customer_id, "No account for Stripe customer, skipping delete");
        return Ok(());
    };

    store.expire_subscription(&user_id, Utc::now()).await?;

    metrics::counter!("stripe.subscriptions.expired").increment(1);
    info!(user_id = %user_id, "User downgraded to Free");
    Ok(())
}
