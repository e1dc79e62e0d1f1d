use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel limit reported for pro-tier users. Pro accounts are never
/// throttled, so the gate never consults their counters.
pub const PRO_USAGE_LIMIT: i64 = 999_999;

/// One row returned by the quota store's `can_user_perform_action` RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub can_perform: bool,
    pub current_usage: i64,
    pub usage_limit: i64,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Result of a usage check for one (user, usage type) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStatus {
    pub can_perform: bool,
    pub is_pro: bool,
    pub current_usage: i64,
    pub usage_limit: i64,
    pub reset_at: Option<DateTime<Utc>>,
}

impl UsageStatus {
    /// Short-circuit status for pro accounts: always allowed, counters
    /// reported as untouched.
    pub fn pro() -> Self {
        Self {
            can_perform: true,
            is_pro: true,
            current_usage: 0,
            usage_limit: PRO_USAGE_LIMIT,
            reset_at: None,
        }
    }
}

/// Outcome of an increment attempt. `LimitReached` is an expected policy
/// rejection, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    Applied,
    LimitReached,
}
