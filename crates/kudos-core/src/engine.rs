// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The achievement engine: router, ledger, notifier and unlock engine wired
//! together.
//!
//! Every [`MetricUpdate`] derived from one event is processed on its own.
//! A failure in one update (or in one achievement within an update) is
//! recorded in the [`ProcessReport`] and never stops its siblings.

use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::catalog::{AchievementCatalog, MetricType};
use crate::error::{CoreError, Result};
use crate::events::{AchievementUnlocked, EventSink, OutboundEvent, ProgressNotification};
use crate::ledger::{PairOutcome, ProgressLedger, UpdatedProgress};
use crate::notifier::MilestoneNotifier;
use crate::persistence::Persistence;
use crate::queries::AchievementQueries;
use crate::retry::RetryPolicy;
use crate::router::{self, DomainEvent, EventEnvelope, MetricUpdate};
use crate::unlock::UnlockEngine;

/// A failure isolated to one metric update or one achievement.
#[derive(Debug, Clone)]
pub struct UpdateFailure {
    /// Profile the update was for.
    pub profile_id: String,
    /// Metric being incremented.
    pub metric: MetricType,
    /// Achievement involved, when the failure was specific to one.
    pub achievement_id: Option<String>,
    /// What went wrong.
    pub error: CoreError,
}

/// Outcome of processing one event or one metric update.
#[derive(Debug, Clone, Default)]
pub struct ProcessReport {
    /// Metric updates attempted.
    pub updates: usize,
    /// Progress notifications emitted.
    pub notifications: Vec<ProgressNotification>,
    /// Unlocks performed.
    pub unlocks: Vec<AchievementUnlocked>,
    /// Isolated failures.
    pub failures: Vec<UpdateFailure>,
}

impl ProcessReport {
    /// True when nothing failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: ProcessReport) {
        self.updates += other.updates;
        self.notifications.extend(other.notifications);
        self.unlocks.extend(other.unlocks);
        self.failures.extend(other.failures);
    }
}

/// Processes domain events into progress, notifications and unlocks.
#[derive(Clone)]
pub struct AchievementEngine {
    persistence: Arc<dyn Persistence>,
    catalog: AchievementCatalog,
    ledger: ProgressLedger,
    notifier: MilestoneNotifier,
    unlocks: UnlockEngine,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl AchievementEngine {
    /// Create an engine with the default retry policy and no sinks.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self::with_retry_policy(persistence, RetryPolicy::default())
    }

    /// Create an engine with the given retry policy and no sinks.
    pub fn with_retry_policy(persistence: Arc<dyn Persistence>, retry: RetryPolicy) -> Self {
        Self {
            catalog: AchievementCatalog::new(persistence.clone()),
            ledger: ProgressLedger::new(persistence.clone(), retry),
            notifier: MilestoneNotifier::new(persistence.clone(), retry),
            unlocks: UnlockEngine::new(persistence.clone(), retry),
            persistence,
            sinks: Vec::new(),
        }
    }

    /// Register a sink for outbound events.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// The catalog this engine reads.
    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    /// The unlock engine, for state inspection.
    pub fn unlocks(&self) -> &UnlockEngine {
        &self.unlocks
    }

    /// Query surface over the same store.
    pub fn queries(&self) -> AchievementQueries {
        AchievementQueries::new(self.persistence.clone())
    }

    /// Record a new profile and create its zeroed progress rows.
    ///
    /// Idempotent. Returns the number of progress rows created.
    #[instrument(skip(self))]
    pub async fn register_profile(&self, profile_id: &str) -> Result<u64> {
        self.persistence.register_profile(profile_id).await?;
        self.catalog.initialize_profile(profile_id).await
    }

    /// Decode and process a wire envelope.
    ///
    /// Unknown tags produce an empty report. A malformed payload for a known
    /// tag is an [`CoreError::InvalidEvent`].
    pub async fn process_envelope(&self, envelope: &EventEnvelope) -> Result<ProcessReport> {
        match DomainEvent::from_envelope(envelope)? {
            Some(event) => Ok(self.process(&event).await),
            None => Ok(ProcessReport::default()),
        }
    }

    /// Route an event and apply every resulting metric update.
    #[instrument(skip(self, event), fields(event = event.tag()))]
    pub async fn process(&self, event: &DomainEvent) -> ProcessReport {
        let updates = router::route(event);
        debug!(updates = updates.len(), "Routed event");

        let mut report = ProcessReport::default();
        for update in &updates {
            match self.apply_update(update).await {
                Ok(partial) => report.merge(partial),
                Err(error) => {
                    error!(
                        profile_id = %update.profile_id,
                        metric = %update.metric,
                        error = %error,
                        "Metric update failed"
                    );
                    report.updates += 1;
                    report.failures.push(UpdateFailure {
                        profile_id: update.profile_id.clone(),
                        metric: update.metric,
                        achievement_id: None,
                        error,
                    });
                }
            }
        }

        report
    }

    /// Apply one metric update: increment, then notify and unlock per pair.
    ///
    /// Fails only for a missing profile or an invalid amount.
    #[instrument(
        skip(self, update),
        fields(profile_id = %update.profile_id, metric = %update.metric, amount = update.amount)
    )]
    pub async fn apply_update(&self, update: &MetricUpdate) -> Result<ProcessReport> {
        if let Some(metadata) = &update.metadata {
            debug!(%metadata, "Applying metric update");
        }

        let outcomes = self
            .ledger
            .apply_increment(&update.profile_id, update.metric, update.amount)
            .await?;

        let mut report = ProcessReport {
            updates: 1,
            ..ProcessReport::default()
        };

        for outcome in outcomes {
            match outcome {
                PairOutcome::Applied(updated) => {
                    self.react(update, updated, &mut report).await;
                }
                PairOutcome::Frozen { achievement_id } => {
                    debug!(%achievement_id, "Skipping unlocked achievement");
                }
                PairOutcome::Failed {
                    achievement_id,
                    error,
                } => report.failures.push(UpdateFailure {
                    profile_id: update.profile_id.clone(),
                    metric: update.metric,
                    achievement_id: Some(achievement_id),
                    error,
                }),
            }
        }

        Ok(report)
    }

    /// Notifier and unlock engine for one incremented pair.
    ///
    /// A failure here leaves the counter incremented; the next increment for
    /// the pair re-evaluates both checks.
    async fn react(
        &self,
        update: &MetricUpdate,
        updated: UpdatedProgress,
        report: &mut ProcessReport,
    ) {
        let UpdatedProgress {
            definition,
            progress,
        } = updated;

        match self.notifier.check_thresholds(&progress, &definition).await {
            Ok(Some(notification)) => {
                self.publish(notification.clone().into()).await;
                report.notifications.push(notification);
            }
            Ok(None) => {}
            Err(error) => {
                warn!(
                    achievement_id = %definition.achievement_id,
                    error = %error,
                    "Milestone check failed"
                );
                report.failures.push(UpdateFailure {
                    profile_id: update.profile_id.clone(),
                    metric: update.metric,
                    achievement_id: Some(definition.achievement_id.clone()),
                    error,
                });
            }
        }

        match self.unlocks.check_completion(&progress, &definition).await {
            Ok(Some(unlock)) => {
                self.publish(unlock.event.clone().into()).await;
                report.unlocks.push(unlock.event);
            }
            Ok(None) => {}
            Err(error) => {
                error!(
                    achievement_id = %definition.achievement_id,
                    error = %error,
                    "Unlock failed"
                );
                report.failures.push(UpdateFailure {
                    profile_id: update.profile_id.clone(),
                    metric: update.metric,
                    achievement_id: Some(definition.achievement_id),
                    error,
                });
            }
        }
    }

    async fn publish(&self, event: OutboundEvent) {
        for sink in &self.sinks {
            sink.publish(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BroadcastSink;
    use crate::router::tags;
    use crate::test_support::{PROFILE, entry, store_with};
    use serde_json::json;

    async fn engine(entries: &[crate::catalog::CatalogEntry]) -> AchievementEngine {
        let (persistence, _) = store_with(entries).await;
        AchievementEngine::with_retry_policy(persistence, RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_process_publishes_to_sinks() {
        let sink = BroadcastSink::new(16);
        let mut rx = sink.subscribe();
        let engine = engine(&[entry("first_entry", MetricType::DiaryEntries, 1)])
            .await
            .with_sink(Arc::new(sink));

        let report = engine
            .process_envelope(&EventEnvelope::new(
                tags::DIARY_ENTRY_CREATED,
                json!({ "profileId": PROFILE, "entryId": "e1" }),
            ))
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.unlocks.len(), 1);
        // The completing increment crosses 50% first, then unlocks.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.tag(), crate::events::PROGRESS_NOTIFICATION);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.tag(), crate::events::ACHIEVEMENT_UNLOCKED);
    }

    #[tokio::test]
    async fn test_unknown_envelope_is_empty_report() {
        let engine = engine(&[]).await;

        let report = engine
            .process_envelope(&EventEnvelope::new("user.logged.in", json!({})))
            .await
            .unwrap();

        assert_eq!(report.updates, 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_missing_profile_isolated_per_update() {
        let engine =
            engine(&[entry("first_connection", MetricType::FriendConnections, 1)]).await;

        let report = engine
            .process_envelope(&EventEnvelope::new(
                tags::FRIENDSHIP_ACCEPTED,
                json!({ "accepterId": PROFILE, "requesterId": "ghost" }),
            ))
            .await
            .unwrap();

        assert_eq!(report.updates, 2);
        assert_eq!(report.unlocks.len(), 1);
        assert_eq!(report.unlocks[0].profile_id, PROFILE);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].profile_id, "ghost");
        assert_eq!(report.failures[0].error.error_code(), "PROFILE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_register_profile_initializes_progress() {
        let engine = engine(&[
            entry("a", MetricType::DiaryEntries, 1),
            entry("b", MetricType::WeeklyGoals, 4),
        ])
        .await;

        assert_eq!(engine.register_profile("newcomer").await.unwrap(), 2);
        assert_eq!(engine.register_profile("newcomer").await.unwrap(), 0);
    }
}
