use std::sync::Arc;

use thiserror::Error;

use crate::quota_store::QuotaStore;
use crate::usage::{IncrementOutcome, UsageStatus};
use crate::users::SubscriptionTier;

/// Gate failures. The `Display` string of each variant is the message
/// returned to the caller; upstream detail stays in the source chain and
/// only reaches the logs.
#[derive(Debug, Error)]
pub enum UsageGateError {
    #[error("Failed to fetch user data")]
    UserLookup(#[source] anyhow::Error),
    #[error("Failed to check usage limits")]
    QuotaCheck(#[source] anyhow::Error),
    #[error("No usage data found")]
    MissingUsageData,
    #[error("Failed to increment usage")]
    Increment(#[source] anyhow::Error),
}

/// Answers "can user U perform action T right now?" and records performed
/// actions against the quota store.
///
/// `check` and `increment` are deliberately two separate store calls:
/// `check` is advisory (the UI paints limits from it), `increment` is the
/// authoritative atomic step. The surrounding flow calls them at different
/// points, so they must not be merged into one transaction here.
#[derive(Clone)]
pub struct UsageGate {
    store: Arc<dyn QuotaStore>,
}

impl UsageGate {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self { store }
    }

    /// Check whether the user may perform `usage_type`. Read-only.
    ///
    /// Pro accounts short-circuit without touching counters. Free accounts
    /// get the quota store's decision row verbatim.
    pub async fn check(
        &self,
        user_id: &str,
        usage_type: &str,
    ) -> Result<UsageStatus, UsageGateError> {
        let tier = self
            .store
            .subscription_tier(user_id)
            .await
            .map_err(UsageGateError::UserLookup)?;

        if tier == SubscriptionTier::Pro {
            return Ok(UsageStatus::pro());
        }

        let rows = self
            .store
            .can_perform_action(user_id, usage_type)
            .await
            .map_err(UsageGateError::QuotaCheck)?;

        // An empty result set is an error, not "allowed"
        let decision = rows.into_iter().next().ok_or(UsageGateError::MissingUsageData)?;

        Ok(UsageStatus {
            can_perform: decision.can_perform,
            is_pro: false,
            current_usage: decision.current_usage,
            usage_limit: decision.usage_limit,
            reset_at: decision.reset_at,
        })
    }

    /// Record that the user performed `usage_type`.
    ///
    /// The store re-verifies the limit and increments in one atomic step;
    /// a `false` return means the limit was hit and nothing changed.
    pub async fn increment(
        &self,
        user_id: &str,
        usage_type: &str,
    ) -> Result<IncrementOutcome, UsageGateError> {
        let incremented = self
            .store
            .increment_usage(user_id, usage_type)
            .await
            .map_err(UsageGateError::Increment)?;

        if incremented {
            Ok(IncrementOutcome::Applied)
        } else {
            Ok(IncrementOutcome::LimitReached)
        }
    }
}
