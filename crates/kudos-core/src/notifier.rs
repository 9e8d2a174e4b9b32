// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Milestone Notifier: one progress notification per crossed threshold.
//!
//! A jump over several thresholds emits a single notification for the
//! highest one. The threshold is recorded with a compare-and-swap on
//! `last_notified_threshold`, so only one of several concurrent or
//! redelivered increments wins the right to notify.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::events::ProgressNotification;
use crate::persistence::{AchievementRecord, Persistence, ProgressRecord};
use crate::retry::RetryPolicy;

/// Notification thresholds in percent, ascending. 100% is not a threshold.
pub const THRESHOLDS: [i32; 2] = [10, 50];

/// `min(100, round(current / target * 100))`, rounding halves up.
///
/// A non-positive target counts as complete.
pub fn progress_percentage(current: i64, target: i64) -> u8 {
    if target <= 0 {
        return 100;
    }
    let current = i128::from(current.max(0));
    let target = i128::from(target);
    let rounded = (current * 200 + target) / (target * 2);
    rounded.min(100) as u8
}

/// Highest threshold reached by `percentage` that is above `last_notified`.
pub fn highest_newly_crossed(percentage: u8, last_notified: i32) -> Option<i32> {
    THRESHOLDS
        .iter()
        .rev()
        .copied()
        .find(|&threshold| i32::from(percentage) >= threshold && last_notified < threshold)
}

/// Decides and records milestone notifications.
#[derive(Clone)]
pub struct MilestoneNotifier {
    persistence: Arc<dyn Persistence>,
    retry: RetryPolicy,
}

impl MilestoneNotifier {
    /// Create a notifier over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>, retry: RetryPolicy) -> Self {
        Self { persistence, retry }
    }

    /// Check whether this increment newly crossed a threshold.
    ///
    /// Returns the notification only for the caller that advanced
    /// `last_notified_threshold`. A completing increment still notifies the
    /// highest threshold it crossed, ahead of the unlock.
    pub async fn check_thresholds(
        &self,
        progress: &ProgressRecord,
        definition: &AchievementRecord,
    ) -> Result<Option<ProgressNotification>> {
        let percentage = progress_percentage(progress.current_value, definition.target_value);
        let Some(threshold) = highest_newly_crossed(percentage, progress.last_notified_threshold)
        else {
            return Ok(None);
        };

        let advanced = self
            .retry
            .run("advance_notified_threshold", || {
                self.persistence.advance_notified_threshold(
                    &progress.profile_id,
                    &progress.achievement_id,
                    threshold,
                )
            })
            .await?;

        if !advanced {
            debug!(
                profile_id = %progress.profile_id,
                achievement_id = %progress.achievement_id,
                threshold,
                "Threshold already notified"
            );
            return Ok(None);
        }

        Ok(Some(ProgressNotification {
            profile_id: progress.profile_id.clone(),
            achievement_id: definition.achievement_id.clone(),
            achievement_name: definition.name.clone(),
            progress_percentage: percentage,
            current_value: progress.current_value,
            target_value: definition.target_value,
        }))
    }
}
