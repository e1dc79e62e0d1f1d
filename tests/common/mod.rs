#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use omi_usage::quota_store::QuotaStore;
use omi_usage::usage::QuotaDecision;
use omi_usage::users::{SubscriptionStatus, SubscriptionTier};

/// Subscription fields of one in-memory account
#[derive(Debug, Clone, PartialEq)]
pub struct MockUser {
    pub tier: SubscriptionTier,
    pub status: Option<SubscriptionStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

impl Default for MockUser {
    fn default() -> Self {
        Self {
            tier: SubscriptionTier::Free,
            status: None,
            start_date: None,
            end_date: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
        }
    }
}

/// In-memory quota store. Counters behave like the real RPCs: the
/// increment re-checks the limit under the same lock, so concurrent calls
/// can never overshoot.
pub struct MockQuotaStore {
    pub usage_limit: i64,
    pub users: Mutex<HashMap<String, MockUser>>,
    pub counters: Mutex<HashMap<(String, String), i64>>,
    /// When set, `can_perform_action` returns zero rows
    pub return_empty_rows: bool,
    /// Names of every mutating call, in order
    pub writes: Mutex<Vec<String>>,
}

impl MockQuotaStore {
    pub fn new(usage_limit: i64) -> Self {
        Self {
            usage_limit,
            users: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            return_empty_rows: false,
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_user(self, user_id: &str, user: MockUser) -> Self {
        self.users.lock().unwrap().insert(user_id.to_string(), user);
        self
    }

    pub fn with_free_user(self, user_id: &str) -> Self {
        self.with_user(user_id, MockUser::default())
    }

    pub fn with_pro_user(self, user_id: &str, customer_id: &str) -> Self {
        self.with_user(
            user_id,
            MockUser {
                tier: SubscriptionTier::Pro,
                status: Some(SubscriptionStatus::Active),
                stripe_customer_id: Some(customer_id.to_string()),
                stripe_subscription_id: Some("sub_existing".to_string()),
                ..Default::default()
            },
        )
    }

    pub fn user(&self, user_id: &str) -> MockUser {
        self.users.lock().unwrap().get(user_id).cloned().unwrap()
    }

    pub fn counter(&self, user_id: &str, usage_type: &str) -> i64 {
        self.counters
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), usage_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    fn record_write(&self, name: &str) {
        self.writes.lock().unwrap().push(name.to_string());
    }
}

#[async_trait]
impl QuotaStore for MockQuotaStore {
    async fn subscription_tier(&self, user_id: &str) -> Result<SubscriptionTier> {
        let users = self.users.lock().unwrap();
        match users.get(user_id) {
            Some(user) => Ok(user.tier),
            None => bail!("No user found with id {user_id}"),
        }
    }

    async fn can_perform_action(
        &self,
        user_id: &str,
        usage_type: &str,
    ) -> Result<Vec<QuotaDecision>> {
        if self.return_empty_rows {
            return Ok(Vec::new());
        }

        let current = self.counter(user_id, usage_type);
        Ok(vec![QuotaDecision {
            can_perform: current < self.usage_limit,
            current_usage: current,
            usage_limit: self.usage_limit,
            reset_at: None,
        }])
    }

    async fn increment_usage(&self, user_id: &str, usage_type: &str) -> Result<bool> {
        let mut counters = self.counters.lock().unwrap();
        let current = counters
            .entry((user_id.to_string(), usage_type.to_string()))
            .or_insert(0);

        if *current >= self.usage_limit {
            return Ok(false);
        }

        *current += 1;
        drop(counters);
        self.record_write("increment_usage");
        Ok(true)
    }

    async fn find_user_by_stripe_customer(&self, customer_id: &str) -> Result<Option<String>> {
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .find(|(_, user)| user.stripe_customer_id.as_deref() == Some(customer_id))
            .map(|(id, _)| id.clone()))
    }

    async fn stripe_customer_id(&self, user_id: &str) -> Result<Option<String>> {
        let users = self.users.lock().unwrap();
        match users.get(user_id) {
            Some(user) => Ok(user.stripe_customer_id.clone()),
            None => bail!("No user found with id {user_id}"),
        }
    }

    async fn set_stripe_customer_id(&self, user_id: &str, customer_id: &str) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| anyhow!("No user found with id {user_id}"))?;
        user.stripe_customer_id = Some(customer_id.to_string());
        drop(users);
        self.record_write("set_stripe_customer_id");
        Ok(())
    }

    async fn activate_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
        start_date: DateTime<Utc>,
    ) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| anyhow!("No user found with id {user_id}"))?;
        user.tier = SubscriptionTier::Pro;
        user.status = Some(SubscriptionStatus::Active);
        user.start_date = Some(start_date);
        user.stripe_subscription_id = Some(subscription_id.to_string());
        drop(users);
        self.record_write("activate_subscription");
        Ok(())
    }

    async fn set_subscription_status(
        &self,
        user_id: &str,
        status: SubscriptionStatus,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| anyhow!("No user found with id {user_id}"))?;
        user.status = Some(status);
        user.end_date = end_date;
        drop(users);
        self.record_write("set_subscription_status");
        Ok(())
    }

    async fn expire_subscription(&self, user_id: &str, end_date: DateTime<Utc>) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| anyhow!("No user found with id {user_id}"))?;
        user.tier = SubscriptionTier::Free;
        user.status = Some(SubscriptionStatus::Expired);
        user.end_date = Some(end_date);
        user.stripe_subscription_id = None;
        drop(users);
        self.record_write("expire_subscription");
        Ok(())
    }
}
