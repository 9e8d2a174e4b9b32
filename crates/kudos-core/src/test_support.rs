// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixtures shared by the in-crate unit tests.

use std::sync::Arc;

use crate::catalog::{AchievementCategory, CatalogEntry, MetricType};
use crate::persistence::{AchievementRecord, Persistence, SqlitePersistence};

pub(crate) const PROFILE: &str = "profile-1";

pub(crate) fn entry(slug: &str, metric: MetricType, target_value: i64) -> CatalogEntry {
    CatalogEntry {
        slug: slug.to_string(),
        name: slug.replace('_', " "),
        description: format!("{} test achievement", slug),
        category: AchievementCategory::General,
        metric,
        target_value,
        icon_key: None,
        active: true,
    }
}

/// In-memory store holding `entries` and a registered [`PROFILE`].
pub(crate) async fn store_with(
    entries: &[CatalogEntry],
) -> (Arc<dyn Persistence>, Vec<AchievementRecord>) {
    let persistence = SqlitePersistence::in_memory()
        .await
        .expect("Failed to create in-memory SQLite persistence");
    persistence.insert_achievements(entries).await.unwrap();
    persistence.register_profile(PROFILE).await.unwrap();

    // Active records in the order of `entries`.
    let active = persistence.list_active_achievements().await.unwrap();
    let records = entries
        .iter()
        .filter_map(|e| active.iter().find(|r| r.slug == e.slug).cloned())
        .collect();

    (Arc::new(persistence), records)
}
