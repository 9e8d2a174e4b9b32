// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound events and the sinks that deliver them.
//!
//! The engine hands every unlock and progress notification to each
//! registered [`EventSink`]. Delivery is best effort: a sink never causes the
//! engine to fail or roll back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Tag of [`AchievementUnlocked`] on the wire.
pub const ACHIEVEMENT_UNLOCKED: &str = "achievement.unlocked";

/// Tag of [`ProgressNotification`] on the wire.
pub const PROGRESS_NOTIFICATION: &str = "progress.notification";

/// A profile unlocked an achievement. Emitted exactly once per pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementUnlocked {
    /// Profile that unlocked the achievement.
    pub profile_id: String,
    /// Unlocked achievement.
    pub achievement_id: String,
    /// Display name.
    pub achievement_name: String,
    /// Category, as stored.
    pub achievement_category: String,
}

/// A profile's progress crossed a milestone threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotification {
    /// Profile whose progress moved.
    pub profile_id: String,
    /// Achievement the progress counts toward.
    pub achievement_id: String,
    /// Display name.
    pub achievement_name: String,
    /// Rounded percentage at the time of the increment.
    pub progress_percentage: u8,
    /// Counter value after the increment.
    pub current_value: i64,
    /// Counter value at which the achievement unlocks.
    pub target_value: i64,
}

/// Everything the engine publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum OutboundEvent {
    /// `achievement.unlocked`
    #[serde(rename = "achievement.unlocked")]
    AchievementUnlocked(AchievementUnlocked),
    /// `progress.notification`
    #[serde(rename = "progress.notification")]
    ProgressNotification(ProgressNotification),
}

impl OutboundEvent {
    /// Wire tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AchievementUnlocked(_) => ACHIEVEMENT_UNLOCKED,
            Self::ProgressNotification(_) => PROGRESS_NOTIFICATION,
        }
    }

    /// Profile the event is about.
    pub fn profile_id(&self) -> &str {
        match self {
            Self::AchievementUnlocked(e) => &e.profile_id,
            Self::ProgressNotification(e) => &e.profile_id,
        }
    }
}

impl From<AchievementUnlocked> for OutboundEvent {
    fn from(event: AchievementUnlocked) -> Self {
        Self::AchievementUnlocked(event)
    }
}

impl From<ProgressNotification> for OutboundEvent {
    fn from(event: ProgressNotification) -> Self {
        Self::ProgressNotification(event)
    }
}

/// Consumer of outbound events, typically a notification service adapter.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Implementations handle their own failures.
    async fn publish(&self, event: &OutboundEvent);
}

/// Fans events out to in-process subscribers over a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<OutboundEvent>,
}

impl BroadcastSink {
    /// Create a sink whose subscribers may lag by up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn publish(&self, event: &OutboundEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!(event = event.tag(), "No subscribers for outbound event");
        }
    }
}

/// Logs every event at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn publish(&self, event: &OutboundEvent) {
        match event {
            OutboundEvent::AchievementUnlocked(e) => info!(
                profile_id = %e.profile_id,
                achievement_id = %e.achievement_id,
                achievement = %e.achievement_name,
                category = %e.achievement_category,
                "Achievement unlocked"
            ),
            OutboundEvent::ProgressNotification(e) => info!(
                profile_id = %e.profile_id,
                achievement_id = %e.achievement_id,
                achievement = %e.achievement_name,
                percentage = e.progress_percentage,
                current = e.current_value,
                target = e.target_value,
                "Achievement progress"
            ),
        }
    }
}
