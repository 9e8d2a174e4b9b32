// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Unlock Engine: the one-time transition of a pair to `Unlocked`.
//!
//! ```text
//!                 first increment             current >= target
//!  NotStarted ───────────────────▶ InProgress ─────────────────▶ Unlocked
//!                                                  (insert wins)  (terminal)
//! ```
//!
//! Existence check and creation of the unlock record are one statement
//! guarded by the `(profile_id, achievement_id)` primary key. Losing that
//! race is a normal outcome and reported as `Ok(None)`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::events::AchievementUnlocked;
use crate::persistence::{AchievementRecord, Persistence, ProgressRecord};
use crate::retry::RetryPolicy;

/// Lifecycle of one (profile, achievement) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AchievementState {
    /// No increment has been recorded yet.
    NotStarted,
    /// Counting toward the target.
    InProgress,
    /// Completed. Terminal.
    Unlocked,
}

impl AchievementState {
    /// Derive the state from the stored rows.
    ///
    /// A zeroed row created by profile initialization is still `NotStarted`.
    pub fn from_rows(progress: Option<&ProgressRecord>, unlocked: bool) -> Self {
        if unlocked {
            Self::Unlocked
        } else if progress.is_some_and(|p| p.current_value > 0) {
            Self::InProgress
        } else {
            Self::NotStarted
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Unlocked)
    }
}

/// A successful unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockResult {
    /// When the unlock record was written.
    pub unlocked_at: DateTime<Utc>,
    /// Event to publish.
    pub event: AchievementUnlocked,
}

/// Performs idempotent unlocks.
#[derive(Clone)]
pub struct UnlockEngine {
    persistence: Arc<dyn Persistence>,
    retry: RetryPolicy,
}

impl UnlockEngine {
    /// Create an unlock engine over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>, retry: RetryPolicy) -> Self {
        Self { persistence, retry }
    }

    /// Unlock the achievement if `progress` reached its target.
    ///
    /// Returns `Some` only for the single caller whose insert created the
    /// unlock record.
    pub async fn check_completion(
        &self,
        progress: &ProgressRecord,
        definition: &AchievementRecord,
    ) -> Result<Option<UnlockResult>> {
        if progress.current_value < definition.target_value {
            return Ok(None);
        }

        let inserted = self
            .retry
            .run("insert_unlock", || {
                self.persistence
                    .insert_unlock_if_absent(&progress.profile_id, &definition.achievement_id)
            })
            .await?;

        let Some(record) = inserted else {
            debug!(
                profile_id = %progress.profile_id,
                achievement_id = %definition.achievement_id,
                "Achievement already unlocked by a concurrent update"
            );
            return Ok(None);
        };

        info!(
            profile_id = %record.profile_id,
            achievement_id = %record.achievement_id,
            achievement = %definition.name,
            current_value = progress.current_value,
            target_value = definition.target_value,
            "Achievement unlocked"
        );

        Ok(Some(UnlockResult {
            unlocked_at: record.unlocked_at,
            event: AchievementUnlocked {
                profile_id: record.profile_id,
                achievement_id: record.achievement_id,
                achievement_name: definition.name.clone(),
                achievement_category: definition.category.clone(),
            },
        }))
    }

    /// Current state of a pair.
    pub async fn state(&self, profile_id: &str, achievement_id: &str) -> Result<AchievementState> {
        if self
            .persistence
            .get_unlock(profile_id, achievement_id)
            .await?
            .is_some()
        {
            return Ok(AchievementState::Unlocked);
        }

        let progress = self
            .persistence
            .get_progress(profile_id, achievement_id)
            .await?;
        Ok(AchievementState::from_rows(progress.as_ref(), false))
    }
}
