// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Progress Ledger: atomic per-pair counter increments.
//!
//! The ledger is the only writer of `current_value`. Each increment is one
//! storage statement that both freezes unlocked pairs and adds to the
//! counter, so concurrent increments for the same pair are never lost and
//! a retry of a failed statement can never be applied twice.

use std::sync::Arc;

use tracing::{debug, error, instrument};

use crate::catalog::{AchievementCatalog, MetricType};
use crate::error::{CoreError, Result};
use crate::persistence::{AchievementRecord, Persistence, ProgressRecord};
use crate::retry::RetryPolicy;

/// Counter state after an increment, paired with its definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedProgress {
    /// Definition the counter belongs to.
    pub definition: AchievementRecord,
    /// Counter after the increment.
    pub progress: ProgressRecord,
}

/// What happened to one (profile, achievement) pair.
#[derive(Debug, Clone)]
pub enum PairOutcome {
    /// The increment was applied.
    Applied(UpdatedProgress),
    /// The pair is already unlocked; nothing was written.
    Frozen {
        /// Unlocked achievement.
        achievement_id: String,
    },
    /// The increment failed after retries. Sibling pairs are unaffected.
    Failed {
        /// Achievement whose counter could not be updated.
        achievement_id: String,
        /// Last error.
        error: CoreError,
    },
}

/// Applies metric increments to every matching active achievement.
#[derive(Clone)]
pub struct ProgressLedger {
    persistence: Arc<dyn Persistence>,
    catalog: AchievementCatalog,
    retry: RetryPolicy,
}

impl ProgressLedger {
    /// Create a ledger over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>, retry: RetryPolicy) -> Self {
        let catalog = AchievementCatalog::new(persistence.clone());
        Self {
            persistence,
            catalog,
            retry,
        }
    }

    /// Add `amount` to the counter of every active achievement counting
    /// `metric`.
    ///
    /// Fails as a whole only when `amount` is not positive or the profile
    /// does not exist. A metric with no active definitions yields an empty
    /// list. Per-pair failures are reported as [`PairOutcome::Failed`].
    #[instrument(skip(self, metric), fields(metric = %metric))]
    pub async fn apply_increment(
        &self,
        profile_id: &str,
        metric: MetricType,
        amount: i64,
    ) -> Result<Vec<PairOutcome>> {
        if amount <= 0 {
            return Err(CoreError::ValidationError {
                field: "amount".to_string(),
                message: format!("increment must be positive, got {}", amount),
            });
        }

        let exists = self
            .retry
            .run("profile_exists", || self.persistence.profile_exists(profile_id))
            .await?;
        if !exists {
            return Err(CoreError::ProfileNotFound {
                profile_id: profile_id.to_string(),
            });
        }

        let definitions = self
            .retry
            .run("list_achievements_for_metric", || {
                self.catalog.definitions_for(metric)
            })
            .await?;
        if definitions.is_empty() {
            debug!("No active achievements for metric");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            outcomes.push(self.increment_pair(profile_id, definition, amount).await);
        }

        Ok(outcomes)
    }

    async fn increment_pair(
        &self,
        profile_id: &str,
        definition: AchievementRecord,
        amount: i64,
    ) -> PairOutcome {
        let achievement_id = definition.achievement_id.as_str();
        let result = self
            .retry
            .run("increment_progress", || {
                self.persistence
                    .increment_progress(profile_id, achievement_id, amount)
            })
            .await;

        match result {
            Ok(Some(progress)) => {
                debug!(
                    achievement_id,
                    current_value = progress.current_value,
                    target_value = definition.target_value,
                    "Progress incremented"
                );
                PairOutcome::Applied(UpdatedProgress {
                    definition,
                    progress,
                })
            }
            Ok(None) => {
                debug!(achievement_id, "Achievement already unlocked, progress frozen");
                PairOutcome::Frozen {
                    achievement_id: definition.achievement_id,
                }
            }
            Err(error) => {
                error!(achievement_id, error = %error, "Failed to increment progress");
                PairOutcome::Failed {
                    achievement_id: definition.achievement_id,
                    error,
                }
            }
        }
    }
}
