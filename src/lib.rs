//! Usage metering and subscription billing service for the Omi app.
//!
//! Enforces per-user quotas against an external Supabase quota store and
//! mirrors Stripe subscription lifecycle events into it. Stateless per
//! request; all atomicity lives in the store's RPCs.

pub mod actions;
pub mod billing;
pub mod metrics;
pub mod quota_store;
pub mod stripe_client;
pub mod supabase_client;
pub mod usage;
pub mod usage_gate;
pub mod users;
pub mod web;
