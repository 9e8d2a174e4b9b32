// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for the catalog and the query surface used by the API layer.

mod common;

use std::sync::Arc;

use common::*;
use serde_json::json;

use kudos_core::catalog::{AchievementCatalog, MetricType, default_catalog};
use kudos_core::persistence::{Persistence, SqlitePersistence};
use kudos_core::router::tags;

fn active_default_count() -> usize {
    default_catalog().iter().filter(|e| e.active).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_seed_default_catalog_once() {
    let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::in_memory().await.unwrap());
    let catalog = AchievementCatalog::new(persistence.clone());

    let inserted = catalog.seed().await.unwrap();
    assert_eq!(inserted as usize, default_catalog().len());
    assert_eq!(catalog.seed().await.unwrap(), 0);

    let active = catalog.list_active().await.unwrap();
    assert_eq!(active.len(), active_default_count());

    // Ordered by category, then name.
    let keys: Vec<(String, String)> = active
        .iter()
        .map(|a| (a.category.clone(), a.name.clone()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);

    for record in &active {
        assert!(record.metric().is_ok(), "bad metric on {}", record.slug);
        assert!(record.category().is_ok(), "bad category on {}", record.slug);
        assert!(record.target_value > 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_register_profile_initializes_every_active_achievement() {
    let ctx = TestContext::sqlite(&default_catalog()).await;

    let created = ctx.engine.register_profile(&ctx.profile_id).await.unwrap();
    assert_eq!(created as usize, active_default_count());
    assert_eq!(ctx.engine.register_profile(&ctx.profile_id).await.unwrap(), 0);

    let views = ctx.engine.queries().list_progress(&ctx.profile_id).await.unwrap();
    assert_eq!(views.len(), active_default_count());
    assert!(views.iter().all(|v| v.current_progress == 0 && !v.is_completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_badge_lifecycle_through_events() {
    let ctx = TestContext::sqlite(&[
        entry("first_friend", MetricType::FriendConnections, 1),
        entry("ten_friends", MetricType::FriendConnections, 10),
    ])
    .await;
    ctx.engine.register_profile("friend-2").await.unwrap();
    let queries = ctx.engine.queries();

    ctx.send(
        tags::FRIENDSHIP_ACCEPTED,
        json!({ "accepterId": ctx.profile_id, "requesterId": "friend-2" }),
    )
    .await;

    let unlocked = queries.list_unlocked(&ctx.profile_id).await.unwrap();
    assert_eq!(unlocked.len(), 1);
    assert_eq!(unlocked[0].achievement_id, ctx.definition("first_friend").achievement_id);
    assert_eq!(unlocked[0].name, "first friend");
    assert!(unlocked[0].has_new_badge);
    assert_eq!(queries.count_new_badges(&ctx.profile_id).await.unwrap(), 1);

    assert!(
        queries
            .mark_badge_seen(&ctx.profile_id, &unlocked[0].achievement_id)
            .await
            .unwrap()
    );
    assert_eq!(queries.count_new_badges(&ctx.profile_id).await.unwrap(), 0);
    // The other profile's badge is untouched.
    assert_eq!(queries.count_new_badges("friend-2").await.unwrap(), 1);

    let views = queries.list_progress(&ctx.profile_id).await.unwrap();
    let ten = views.iter().find(|v| v.slug == "ten_friends").unwrap();
    assert_eq!(ten.current_progress, 1);
    assert_eq!(ten.progress_percentage, 10);
    assert!(!ten.is_completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_progress_view_serializes_camel_case() {
    let ctx = TestContext::sqlite(&[entry("first_goal", MetricType::PersonalGoal, 4)]).await;
    ctx.apply(MetricType::PersonalGoal, 1).await;

    let views = ctx.engine.queries().list_progress(&ctx.profile_id).await.unwrap();
    let wire = serde_json::to_value(&views[0]).unwrap();

    assert_eq!(wire["slug"], "first_goal");
    assert_eq!(wire["metricType"], "personal_goal");
    assert_eq!(wire["currentProgress"], 1);
    assert_eq!(wire["progressPercentage"], 25);
    assert_eq!(wire["isCompleted"], false);
    assert!(wire["unlockedAt"].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_reseed_discards_progress_and_unlocks() {
    let ctx = TestContext::sqlite(&[entry("first_goal", MetricType::PersonalGoal, 1)]).await;
    ctx.apply(MetricType::PersonalGoal, 1).await;
    assert_eq!(ctx.engine.queries().count_new_badges(&ctx.profile_id).await.unwrap(), 1);

    let inserted = ctx
        .engine
        .catalog()
        .reseed_with(&[entry("goal_setter", MetricType::PersonalGoal, 3)])
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let queries = ctx.engine.queries();
    assert!(queries.list_unlocked(&ctx.profile_id).await.unwrap().is_empty());
    assert!(ctx.persistence.list_progress(&ctx.profile_id).await.unwrap().is_empty());

    // The profile survives and counts toward the new catalog.
    let report = ctx.apply(MetricType::PersonalGoal, 1).await;
    assert_eq!(notified_percentages(&report), vec![33]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_invalid_catalog_is_rejected() {
    let ctx = TestContext::sqlite(&[entry("first_goal", MetricType::PersonalGoal, 1)]).await;

    let err = ctx
        .engine
        .catalog()
        .reseed_with(&[entry("broken", MetricType::PersonalGoal, 0)])
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    let err = ctx
        .engine
        .catalog()
        .reseed_with(&[
            entry("twice", MetricType::PersonalGoal, 1),
            entry("twice", MetricType::WeeklyGoals, 1),
        ])
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    // Nothing was replaced.
    assert_eq!(ctx.engine.queries().list_catalog().await.unwrap().len(), 1);
}
