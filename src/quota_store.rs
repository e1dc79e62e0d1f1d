use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::usage::QuotaDecision;
use crate::users::{SubscriptionStatus, SubscriptionTier};

/// Remote quota store holding per-user counters and subscription state.
///
/// The store owns all correctness for concurrent increments: `increment_usage`
/// must re-verify the limit and increment in a single atomic step, per
/// (user, usage type) key. This layer issues one call and trusts that
/// property; it performs no client-side locking.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Fetch the user's subscription tier. Unknown users are an error, not
    /// a default tier.
    async fn subscription_tier(&self, user_id: &str) -> Result<SubscriptionTier>;

    /// Atomic check via the store's `can_user_perform_action` RPC. Rows are
    /// returned verbatim; an empty result is the caller's problem.
    async fn can_perform_action(&self, user_id: &str, usage_type: &str)
    -> Result<Vec<QuotaDecision>>;

    /// Atomic increment via the store's `increment_usage` RPC. Returns
    /// `true` if the counter was incremented, `false` if the limit was hit.
    async fn increment_usage(&self, user_id: &str, usage_type: &str) -> Result<bool>;

    /// Resolve a user id from a Stripe customer id. `None` when no account
    /// matches (webhooks for unknown customers are a graceful no-op).
    async fn find_user_by_stripe_customer(&self, customer_id: &str) -> Result<Option<String>>;

    /// Fetch the user's Stripe customer id, if one was ever assigned.
    async fn stripe_customer_id(&self, user_id: &str) -> Result<Option<String>>;

    /// Persist a newly-created Stripe customer id.
    async fn set_stripe_customer_id(&self, user_id: &str, customer_id: &str) -> Result<()>;

    /// Checkout completed: tier=pro, status=active, record the start date
    /// and the provider subscription id.
    async fn activate_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
        start_date: DateTime<Utc>,
    ) -> Result<()>;

    /// Mirror a provider status change. `end_date` is set for cancellations
    /// and cleared otherwise.
    async fn set_subscription_status(
        &self,
        user_id: &str,
        status: SubscriptionStatus,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Subscription deleted: back to free/expired, subscription id cleared.
    async fn expire_subscription(&self, user_id: &str, end_date: DateTime<Utc>) -> Result<()>;
}
