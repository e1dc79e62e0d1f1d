use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::quota_store::QuotaStore;
use crate::usage::QuotaDecision;
use crate::users::{SubscriptionStatus, SubscriptionTier};

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Configuration for the Supabase-backed quota store
#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub service_role_key: String,
}

impl SupabaseConfig {
    /// Initialize Supabase configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("SUPABASE_URL").context("SUPABASE_URL must be set")?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY").context("SUPABASE_ANON_KEY must be set")?;
        let service_role_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .context("SUPABASE_SERVICE_ROLE_KEY must be set")?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            service_role_key,
        })
    }
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"[REDACTED]")
            .field("service_role_key", &"[REDACTED]")
            .finish()
    }
}

/// Client for the Supabase REST interface (PostgREST).
///
/// Two instances exist per process: one holding the anon key for the usage
/// path, one holding the service-role key for the webhook path. The key is
/// fixed at construction so a handler can never escalate by accident.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TierRow {
    #[serde(default)]
    subscription_tier: SubscriptionTier,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CustomerIdRow {
    stripe_customer_id: Option<String>,
}

impl SupabaseClient {
    /// Create a client for the usage path (anon key)
    pub fn new(client: Client, config: &SupabaseConfig) -> Self {
        Self {
            client,
            base_url: config.url.clone(),
            api_key: config.anon_key.clone(),
        }
    }

    /// Create a client for the webhook path (service-role key, admin writes)
    pub fn new_admin(client: Client, config: &SupabaseConfig) -> Self {
        Self {
            client,
            base_url: config.url.clone(),
            api_key: config.service_role_key.clone(),
        }
    }

    /// Call a Postgres function through `/rest/v1/rpc/{function}`
    async fn rpc(&self, function: &str, params: Value) -> Result<Value> {
        debug!("Calling Supabase RPC {}", function);

        let url = format!("{}/rest/v1/rpc/{}", self.base_url, function);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to call Supabase RPC {function}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Supabase RPC {function} failed with {status}: {body}"));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Supabase RPC {function} response"))
    }

    /// Fetch rows from a table through `/rest/v1/{table}`
    async fn select(&self, table: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to query Supabase table {table}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Supabase query on {table} failed with {status}: {body}"));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Supabase response for {table}"))
    }

    /// Update rows matching a filter through `PATCH /rest/v1/{table}`
    async fn patch(&self, table: &str, filter: (&str, String), body: Value) -> Result<()> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .client
            .patch(&url)
            .query(&[filter])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to update Supabase table {table}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Supabase update on {table} failed with {status}: {text}"));
        }

        Ok(())
    }
}

#[async_trait]
impl QuotaStore for SupabaseClient {
    async fn subscription_tier(&self, user_id: &str) -> Result<SubscriptionTier> {
        let value = self
            .select(
                "users",
                &[
                    ("id", format!("eq.{user_id}")),
                    ("select", "subscription_tier".to_string()),
                ],
            )
            .await?;

        let rows: Vec<TierRow> =
            serde_json::from_value(value).context("Unexpected shape for users row")?;

        match rows.into_iter().next() {
            Some(row) => Ok(row.subscription_tier),
            None => bail!("No user found with id {user_id}"),
        }
    }

    async fn can_perform_action(
        &self,
        user_id: &str,
        usage_type: &str,
    ) -> Result<Vec<QuotaDecision>> {
        let value = self
            .rpc(
                "can_user_perform_action",
                json!({ "p_user_id": user_id, "p_usage_type": usage_type }),
            )
            .await?;

        serde_json::from_value(value).context("Unexpected shape for can_user_perform_action result")
    }

    async fn increment_usage(&self, user_id: &str, usage_type: &str) -> Result<bool> {
        let value = self
            .rpc(
                "increment_usage",
                json!({ "p_user_id": user_id, "p_usage_type": usage_type }),
            )
            .await?;

        // The RPC returns a bare boolean: true = incremented, false = at limit
        value
            .as_bool()
            .ok_or_else(|| anyhow!("increment_usage returned non-boolean: {value}"))
    }

    async fn find_user_by_stripe_customer(&self, customer_id: &str) -> Result<Option<String>> {
        let value = self
            .select(
                "users",
                &[
                    ("stripe_customer_id", format!("eq.{customer_id}")),
                    ("select", "id".to_string()),
                ],
            )
            .await?;

        let rows: Vec<IdRow> =
            serde_json::from_value(value).context("Unexpected shape for users row")?;

        Ok(rows.into_iter().next().map(|row| row.id))
    }

    async fn stripe_customer_id(&self, user_id: &str) -> Result<Option<String>> {
        let value = self
            .select(
                "users",
                &[
                    ("id", format!("eq.{user_id}")),
                    ("select", "stripe_customer_id".to_string()),
                ],
            )
            .await?;

        let rows: Vec<CustomerIdRow> =
            serde_json::from_value(value).context("Unexpected shape for users row")?;

        Ok(rows.into_iter().next().and_then(|row| row.stripe_customer_id))
    }

    async fn set_stripe_customer_id(&self, user_id: &str, customer_id: &str) -> Result<()> {
        self.patch(
            "users",
            ("id", format!("eq.{user_id}")),
            json!({ "stripe_customer_id": customer_id }),
        )
        .await
    }

    async fn activate_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
        start_date: DateTime<Utc>,
    ) -> Result<()> {
        self.patch(
            "users",
            ("id", format!("eq.{user_id}")),
            json!({
                "subscription_tier": SubscriptionTier::Pro.as_str(),
                "subscription_status": SubscriptionStatus::Active.as_str(),
                "subscription_start_date": start_date.to_rfc3339(),
                "stripe_subscription_id": subscription_id,
            }),
        )
        .await
    }

    async fn set_subscription_status(
        &self,
        user_id: &str,
        status: SubscriptionStatus,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.patch(
            "users",
            ("id", format!("eq.{user_id}")),
            json!({
                "subscription_status": status.as_str(),
                "subscription_end_date": end_date.map(|t| t.to_rfc3339()),
            }),
        )
        .await
    }

    async fn expire_subscription(&self, user_id: &str, end_date: DateTime<Utc>) -> Result<()> {
        self.patch(
            "users",
            ("id", format!("eq.{user_id}")),
            json!({
                "subscription_tier": SubscriptionTier::Free.as_str(),
                "subscription_status": SubscriptionStatus::Expired.as_str(),
                "subscription_end_date": end_date.to_rfc3339(),
                "stripe_subscription_id": Value::Null,
            }),
        )
        .await
    }
}
