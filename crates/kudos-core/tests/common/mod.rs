// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for kudos-core integration tests.
//!
//! Provides TestContext for setting up a store, a catalog, a profile and an
//! engine with a broadcast sink attached.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use kudos_core::catalog::{AchievementCategory, CatalogEntry, MetricType};
use kudos_core::engine::{AchievementEngine, ProcessReport};
use kudos_core::events::{BroadcastSink, OutboundEvent};
use kudos_core::persistence::{
    AchievementRecord, Persistence, PostgresPersistence, ProgressRecord, SqlitePersistence,
};
use kudos_core::retry::RetryPolicy;
use kudos_core::router::{EventEnvelope, MetricUpdate};

/// Test context holding a store with a known catalog and one registered profile.
pub struct TestContext {
    pub persistence: Arc<dyn Persistence>,
    pub engine: AchievementEngine,
    pub events: broadcast::Receiver<OutboundEvent>,
    pub profile_id: String,
    pub definitions: Vec<AchievementRecord>,
    // Keeps a file-backed database alive for the duration of the test.
    _dir: Option<tempfile::TempDir>,
}

impl TestContext {
    /// Private in-memory SQLite store.
    pub async fn sqlite(entries: &[CatalogEntry]) -> Self {
        let persistence = SqlitePersistence::in_memory()
            .await
            .expect("Failed to create in-memory SQLite persistence");
        Self::with_persistence(Arc::new(persistence), entries, None).await
    }

    /// File-backed SQLite store with a multi-connection pool, so concurrent
    /// handlers really contend for the database.
    pub async fn sqlite_file(entries: &[CatalogEntry]) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let persistence = SqlitePersistence::from_path(dir.path().join("kudos.db"))
            .await
            .expect("Failed to create file-backed SQLite persistence");
        Self::with_persistence(Arc::new(persistence), entries, Some(dir)).await
    }

    /// PostgreSQL store from TEST_DATABASE_URL.
    ///
    /// Slugs are made unique so tests can share one database.
    pub async fn postgres(entries: &[CatalogEntry]) -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let persistence = PostgresPersistence::connect(&database_url).await.ok()?;

        let suffix = Uuid::new_v4().simple().to_string();
        let entries: Vec<CatalogEntry> = entries
            .iter()
            .cloned()
            .map(|mut entry| {
                entry.slug = format!("{}_{}", entry.slug, suffix);
                entry
            })
            .collect();

        Some(Self::with_persistence(Arc::new(persistence), &entries, None).await)
    }

    async fn with_persistence(
        persistence: Arc<dyn Persistence>,
        entries: &[CatalogEntry],
        dir: Option<tempfile::TempDir>,
    ) -> Self {
        persistence
            .insert_achievements(entries)
            .await
            .expect("Failed to seed catalog");

        let profile_id = format!("profile-{}", Uuid::new_v4());
        persistence
            .register_profile(&profile_id)
            .await
            .expect("Failed to register profile");

        let mut definitions = Vec::new();
        for entry in entries {
            let found = persistence
                .list_achievements_for_metric(entry.metric)
                .await
                .expect("Failed to list definitions")
                .into_iter()
                .find(|r| r.slug == entry.slug);
            definitions.extend(found);
        }

        let sink = BroadcastSink::new(1024);
        let events = sink.subscribe();
        let engine = AchievementEngine::with_retry_policy(persistence.clone(), RetryPolicy::default())
            .with_sink(Arc::new(sink));

        Self {
            persistence,
            engine,
            events,
            profile_id,
            definitions,
            _dir: dir,
        }
    }

    /// Definition whose slug starts with `slug` (Postgres slugs carry a suffix).
    pub fn definition(&self, slug: &str) -> &AchievementRecord {
        self.definitions
            .iter()
            .find(|d| d.slug == slug || d.slug.starts_with(&format!("{}_", slug)))
            .unwrap_or_else(|| panic!("no active definition '{}'", slug))
    }

    /// Progress row for the context profile.
    pub async fn progress(&self, slug: &str) -> Option<ProgressRecord> {
        let achievement_id = self.definition(slug).achievement_id.clone();
        self.persistence
            .get_progress(&self.profile_id, &achievement_id)
            .await
            .expect("Failed to read progress")
    }

    /// Counter value for the context profile, 0 when no row exists.
    pub async fn current_value(&self, slug: &str) -> i64 {
        self.progress(slug).await.map_or(0, |p| p.current_value)
    }

    /// Apply a metric update for the context profile.
    pub async fn apply(&self, metric: MetricType, amount: i64) -> ProcessReport {
        let update = MetricUpdate {
            profile_id: self.profile_id.clone(),
            metric,
            amount,
            metadata: None,
        };
        self.engine
            .apply_update(&update)
            .await
            .expect("apply_update failed")
    }

    /// Process a wire envelope.
    pub async fn send(&self, event: &str, payload: Value) -> ProcessReport {
        self.engine
            .process_envelope(&EventEnvelope::new(event, payload))
            .await
            .expect("process_envelope failed")
    }

    /// Drain every outbound event published so far.
    pub fn drain_events(&mut self) -> Vec<OutboundEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// Catalog entry with a generated name and description.
pub fn entry(slug: &str, metric: MetricType, target_value: i64) -> CatalogEntry {
    CatalogEntry {
        slug: slug.to_string(),
        name: slug.replace('_', " "),
        description: format!("{} (test)", slug),
        category: AchievementCategory::General,
        metric,
        target_value,
        icon_key: None,
        active: true,
    }
}

/// Same as [`entry`] but inactive.
pub fn inactive(slug: &str, metric: MetricType, target_value: i64) -> CatalogEntry {
    CatalogEntry {
        active: false,
        ..entry(slug, metric, target_value)
    }
}

/// Percentages of the progress notifications in a report, in emission order.
pub fn notified_percentages(report: &ProcessReport) -> Vec<u8> {
    report
        .notifications
        .iter()
        .map(|n| n.progress_percentage)
        .collect()
}

/// Helper macro to skip tests if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
