mod common;

use chrono::{TimeZone, Utc};
use common::MockQuotaStore;
use omi_usage::billing::{
    handle_checkout_completed, handle_subscription_deleted, handle_subscription_updated,
};
use omi_usage::users::{SubscriptionStatus, SubscriptionTier};

#[tokio::test]
async fn checkout_completed_upgrades_to_pro_active() {
    let store = MockQuotaStore::new(10).with_free_user("alice");

    handle_checkout_completed(&store, "alice", "sub_123")
        .await
        .unwrap();

    let user = store.user("alice");
    assert_eq!(user.tier, SubscriptionTier::Pro);
    assert_eq!(user.status, Some(SubscriptionStatus::Active));
    assert!(user.start_date.is_some());
    assert_eq!(user.stripe_subscription_id.as_deref(), Some("sub_123"));
}

#[tokio::test]
async fn checkout_completed_replay_is_idempotent() {
    let store = MockQuotaStore::new(10).with_free_user("alice");

    handle_checkout_completed(&store, "alice", "sub_123")
        .await
        .unwrap();
    let first = store.user("alice");

    // Delivering the identical event again asserts the same transition
    handle_checkout_completed(&store, "alice", "sub_123")
        .await
        .unwrap();
    let second = store.user("alice");

    assert_eq!(first.tier, second.tier);
    assert_eq!(first.status, second.status);
    assert_eq!(first.stripe_subscription_id, second.stripe_subscription_id);
}

#[tokio::test]
async fn subscription_updated_mirrors_active_status() {
    let store = MockQuotaStore::new(10).with_pro_user("alice", "cus_1");

    handle_subscription_updated(&store, "cus_1", "active", None)
        .await
        .unwrap();

    let user = store.user("alice");
    assert_eq!(user.status, Some(SubscriptionStatus::Active));
    assert_eq!(user.end_date, None);
}

#[tokio::test]
async fn subscription_updated_cancellation_records_end_date() {
    let store = MockQuotaStore::new(10).with_pro_user("alice", "cus_1");
    let cancel_at = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();

    handle_subscription_updated(&store, "cus_1", "canceled", Some(cancel_at))
        .await
        .unwrap();

    let user = store.user("alice");
    assert_eq!(user.status, Some(SubscriptionStatus::Cancelled));
    assert_eq!(user.end_date, Some(cancel_at));
    // Tier is untouched until the deletion event arrives
    assert_eq!(user.tier, SubscriptionTier::Pro);
}

#[tokio::test]
async fn subscription_updated_unknown_provider_status_maps_to_expired() {
    let store = MockQuotaStore::new(10).with_pro_user("alice", "cus_1");

    handle_subscription_updated(&store, "cus_1", "past_due", None)
        .await
        .unwrap();

    let user = store.user("alice");
    assert_eq!(user.status, Some(SubscriptionStatus::Expired));
    assert_eq!(user.end_date, None);
}

#[tokio::test]
async fn subscription_updated_clears_stale_end_date_on_reactivation() {
    let store = MockQuotaStore::new(10).with_pro_user("alice", "cus_1");
    let cancel_at = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();

    handle_subscription_updated(&store, "cus_1", "canceled", Some(cancel_at))
        .await
        .unwrap();
    handle_subscription_updated(&store, "cus_1", "active", None)
        .await
        .unwrap();

    let user = store.user("alice");
    assert_eq!(user.status, Some(SubscriptionStatus::Active));
    assert_eq!(user.end_date, None);
}

#[tokio::test]
async fn subscription_updated_for_unknown_customer_is_a_noop() {
    let store = MockQuotaStore::new(10).with_free_user("alice");

    handle_subscription_updated(&store, "cus_nobody", "active", None)
        .await
        .unwrap();

    assert_eq!(store.write_count(), 0);
    assert_eq!(store.user("alice").status, None);
}

#[tokio::test]
async fn subscription_deleted_downgrades_to_free_expired() {
    let store = MockQuotaStore::new(10).with_pro_user("alice", "cus_1");

    handle_subscription_deleted(&store, "cus_1").await.unwrap();

    let user = store.user("alice");
    assert_eq!(user.tier, SubscriptionTier::Free);
    assert_eq!(user.status, Some(SubscriptionStatus::Expired));
    assert!(user.end_date.is_some());
    assert_eq!(user.stripe_subscription_id, None);
    // The customer id stays: it is assigned at most once
    assert_eq!(user.stripe_customer_id.as_deref(), Some("cus_1"));
}

#[tokio::test]
async fn subscription_deleted_for_unknown_customer_is_a_noop() {
    let store = MockQuotaStore::new(10).with_free_user("alice");

    handle_subscription_deleted(&store, "cus_nobody")
        .await
        .unwrap();

    assert_eq!(store.write_count(), 0);
}
