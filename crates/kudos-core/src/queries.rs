// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read and acknowledge operations for the API layer.
//!
//! Percentages and completion flags are computed here at read time and never
//! stored. Unknown profiles read as empty, matching what a freshly registered
//! profile would see.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::catalog::AchievementCatalog;
use crate::error::{CoreError, Result};
use crate::notifier::progress_percentage;
use crate::persistence::{AchievementRecord, Persistence, UnlockedAchievementRecord};

/// Progress of one profile toward one active achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    /// Achievement ID.
    pub achievement_id: String,
    /// Stable key.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Category.
    pub category: String,
    /// Metric counted.
    pub metric_type: String,
    /// Counter value needed to unlock.
    pub target_value: i64,
    /// Front-end icon identifier.
    pub icon_key: Option<String>,
    /// Counter value, 0 when no row exists.
    pub current_progress: i64,
    /// Rounded percentage, capped at 100.
    pub progress_percentage: u8,
    /// Whether an unlock record exists.
    pub is_completed: bool,
    /// When the achievement was unlocked.
    pub unlocked_at: Option<DateTime<Utc>>,
}

/// Query surface over the achievement store.
#[derive(Clone)]
pub struct AchievementQueries {
    persistence: Arc<dyn Persistence>,
    catalog: AchievementCatalog,
}

impl AchievementQueries {
    /// Create the query surface over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        let catalog = AchievementCatalog::new(persistence.clone());
        Self {
            persistence,
            catalog,
        }
    }

    /// Active catalog definitions, ordered by category then name.
    pub async fn list_catalog(&self) -> Result<Vec<AchievementRecord>> {
        self.catalog.list_active().await
    }

    /// The profile's unlocked achievements, newest first.
    pub async fn list_unlocked(&self, profile_id: &str) -> Result<Vec<UnlockedAchievementRecord>> {
        self.persistence.list_unlocked(profile_id).await
    }

    /// Progress toward every active achievement.
    #[instrument(skip(self))]
    pub async fn list_progress(&self, profile_id: &str) -> Result<Vec<ProgressView>> {
        if !self.persistence.profile_exists(profile_id).await? {
            return Ok(Vec::new());
        }

        let definitions = self.catalog.list_active().await?;
        let progress: HashMap<String, i64> = self
            .persistence
            .list_progress(profile_id)
            .await?
            .into_iter()
            .map(|p| (p.achievement_id, p.current_value))
            .collect();
        let unlocked: HashMap<String, DateTime<Utc>> = self
            .persistence
            .list_unlocked(profile_id)
            .await?
            .into_iter()
            .map(|u| (u.achievement_id, u.unlocked_at))
            .collect();

        let views = definitions
            .into_iter()
            .map(|definition| {
                let current_progress = progress
                    .get(&definition.achievement_id)
                    .copied()
                    .unwrap_or(0);
                let unlocked_at = unlocked.get(&definition.achievement_id).copied();
                ProgressView {
                    progress_percentage: progress_percentage(
                        current_progress,
                        definition.target_value,
                    ),
                    is_completed: unlocked_at.is_some(),
                    unlocked_at,
                    current_progress,
                    achievement_id: definition.achievement_id,
                    slug: definition.slug,
                    name: definition.name,
                    description: definition.description,
                    category: definition.category,
                    metric_type: definition.metric_type,
                    target_value: definition.target_value,
                    icon_key: definition.icon_key,
                }
            })
            .collect();

        Ok(views)
    }

    /// Number of unlocks the profile has not acknowledged.
    pub async fn count_new_badges(&self, profile_id: &str) -> Result<i64> {
        self.persistence.count_new_badges(profile_id).await
    }

    /// Acknowledge a badge.
    ///
    /// Returns false when the profile has not unlocked the achievement.
    /// An achievement missing from the catalog is an error.
    #[instrument(skip(self))]
    pub async fn mark_badge_seen(&self, profile_id: &str, achievement_id: &str) -> Result<bool> {
        if self
            .persistence
            .get_achievement(achievement_id)
            .await?
            .is_none()
        {
            return Err(CoreError::AchievementNotFound {
                achievement_id: achievement_id.to_string(),
            });
        }

        self.persistence
            .mark_badge_seen(profile_id, achievement_id)
            .await
    }

    /// Create zeroed progress rows for every active achievement.
    pub async fn initialize_profile(&self, profile_id: &str) -> Result<u64> {
        self.catalog.initialize_profile(profile_id).await
    }
}
