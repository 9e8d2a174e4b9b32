// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Achievement catalog: definitions, the default seed set, and seeding.
//!
//! The catalog is read-only on the event path. It is written only by
//! [`AchievementCatalog::seed`] (insert when empty) and
//! [`AchievementCatalog::reseed`] (destructive replace).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{CoreError, Result};
use crate::persistence::{AchievementRecord, Persistence};

/// Achievement category, used for grouping in the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementCategory {
    /// Friendships, forum and chat.
    Social,
    /// Diary and plan habits.
    Personal,
    /// Goals and plans.
    GoalsPlans,
    /// Everything else.
    General,
}

impl AchievementCategory {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Social => "social",
            Self::Personal => "personal",
            Self::GoalsPlans => "goals_plans",
            Self::General => "general",
        }
    }
}

impl fmt::Display for AchievementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AchievementCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "social" => Ok(Self::Social),
            "personal" => Ok(Self::Personal),
            "goals_plans" => Ok(Self::GoalsPlans),
            "general" => Ok(Self::General),
            other => Err(CoreError::ValidationError {
                field: "category".to_string(),
                message: format!("unknown achievement category '{}'", other),
            }),
        }
    }
}

/// A category of user action counted toward one or more achievements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Accepted friendships.
    FriendConnections,
    /// Likes, comments and replies in the forum.
    ForumInteractions,
    /// Own posts that reached the likes milestone.
    PopularPost,
    /// Conversations started with a new friend.
    NewConversation,
    /// Completed plans.
    PlanCompletion,
    /// Plan progress increments.
    ConsecutivePractices,
    /// Diary entries written.
    DiaryEntries,
    /// Completed AI-generated plans.
    AiPlanCompletion,
    /// Weekly goals met.
    WeeklyGoals,
    /// Personal goals reached.
    PersonalGoal,
    /// Diary entries that qualify as deep reflections.
    DeepReflection,
    /// AI consultations used.
    AiHelpSeeking,
}

impl MetricType {
    /// Every metric type, in declaration order.
    pub const ALL: [MetricType; 12] = [
        Self::FriendConnections,
        Self::ForumInteractions,
        Self::PopularPost,
        Self::NewConversation,
        Self::PlanCompletion,
        Self::ConsecutivePractices,
        Self::DiaryEntries,
        Self::AiPlanCompletion,
        Self::WeeklyGoals,
        Self::PersonalGoal,
        Self::DeepReflection,
        Self::AiHelpSeeking,
    ];

    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FriendConnections => "friend_connections",
            Self::ForumInteractions => "forum_interactions",
            Self::PopularPost => "popular_post",
            Self::NewConversation => "new_conversation",
            Self::PlanCompletion => "plan_completion",
            Self::ConsecutivePractices => "consecutive_practices",
            Self::DiaryEntries => "diary_entries",
            Self::AiPlanCompletion => "ai_plan_completion",
            Self::WeeklyGoals => "weekly_goals",
            Self::PersonalGoal => "personal_goal",
            Self::DeepReflection => "deep_reflection",
            Self::AiHelpSeeking => "ai_help_seeking",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| CoreError::ValidationError {
                field: "metric_type".to_string(),
                message: format!("unknown metric type '{}'", s),
            })
    }
}

/// An achievement definition to be written to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Stable key, unique across the catalog.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Grouping category.
    pub category: AchievementCategory,
    /// Metric counted toward this achievement.
    pub metric: MetricType,
    /// Counter value at which the achievement unlocks. Must be positive.
    pub target_value: i64,
    /// Front-end icon identifier.
    pub icon_key: Option<String>,
    /// Inactive definitions receive no progress.
    pub active: bool,
}

impl CatalogEntry {
    fn new(
        slug: &str,
        name: &str,
        description: &str,
        category: AchievementCategory,
        metric: MetricType,
        target_value: i64,
        icon_key: &str,
    ) -> Self {
        Self {
            slug: slug.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            category,
            metric,
            target_value,
            icon_key: Some(icon_key.to_string()),
            active: true,
        }
    }
}

/// The catalog shipped with the application.
pub fn default_catalog() -> Vec<CatalogEntry> {
    use AchievementCategory::*;
    use MetricType::*;

    vec![
        // Social
        CatalogEntry::new(
            "first_connection",
            "First Connection",
            "Make your first friend in the community.",
            Social,
            FriendConnections,
            1,
            "handshake",
        ),
        CatalogEntry::new(
            "support_circle",
            "Support Circle",
            "Build a circle of ten friends.",
            Social,
            FriendConnections,
            10,
            "people",
        ),
        CatalogEntry::new(
            "forum_voice",
            "Forum Voice",
            "Like, comment or reply in the forum ten times.",
            Social,
            ForumInteractions,
            10,
            "chat-bubble",
        ),
        CatalogEntry::new(
            "forum_pillar",
            "Forum Pillar",
            "Interact in the forum fifty times.",
            Social,
            ForumInteractions,
            50,
            "column",
        ),
        CatalogEntry::new(
            "popular_post",
            "Inspiring Words",
            "Write a post that reaches ten likes.",
            Social,
            PopularPost,
            1,
            "star",
        ),
        CatalogEntry::new(
            "new_conversation",
            "Ice Breaker",
            "Start a conversation with a new friend.",
            Social,
            NewConversation,
            1,
            "message",
        ),
        // Personal
        CatalogEntry::new(
            "first_entry",
            "Dear Diary",
            "Write your first diary entry.",
            Personal,
            DiaryEntries,
            1,
            "book",
        ),
        CatalogEntry::new(
            "diary_habit",
            "Daily Writer",
            "Write thirty diary entries.",
            Personal,
            DiaryEntries,
            30,
            "feather",
        ),
        CatalogEntry::new(
            "plan_finisher",
            "Finisher",
            "Complete a plan.",
            Personal,
            PlanCompletion,
            1,
            "flag",
        ),
        CatalogEntry::new(
            "steady_practice",
            "Steady Practice",
            "Make progress on your plans seven times.",
            Personal,
            ConsecutivePractices,
            7,
            "calendar",
        ),
        // Goals and plans
        CatalogEntry::new(
            "ai_plan_complete",
            "Guided Journey",
            "Complete a plan created with the assistant.",
            GoalsPlans,
            AiPlanCompletion,
            1,
            "compass",
        ),
        CatalogEntry::new(
            "weekly_goals",
            "Week by Week",
            "Meet your weekly goals four times.",
            GoalsPlans,
            WeeklyGoals,
            4,
            "target",
        ),
        CatalogEntry::new(
            "personal_goal",
            "Goal Getter",
            "Reach a personal goal.",
            GoalsPlans,
            PersonalGoal,
            1,
            "trophy",
        ),
        // General
        CatalogEntry::new(
            "deep_reflection",
            "Deep Thinker",
            "Write five reflective diary entries.",
            General,
            DeepReflection,
            5,
            "lightbulb",
        ),
        CatalogEntry::new(
            "help_seeker",
            "Reaching Out",
            "Ask the assistant for help.",
            General,
            AiHelpSeeking,
            1,
            "lifebuoy",
        ),
    ]
}

fn validate_entries(entries: &[CatalogEntry]) -> Result<()> {
    let mut slugs = std::collections::HashSet::new();
    for entry in entries {
        if entry.target_value <= 0 {
            return Err(CoreError::ValidationError {
                field: "target_value".to_string(),
                message: format!(
                    "achievement '{}' has non-positive target {}",
                    entry.slug, entry.target_value
                ),
            });
        }
        if !slugs.insert(entry.slug.as_str()) {
            return Err(CoreError::ValidationError {
                field: "slug".to_string(),
                message: format!("duplicate achievement slug '{}'", entry.slug),
            });
        }
    }
    Ok(())
}

/// Read access to the catalog plus the administrative seeding operations.
#[derive(Clone)]
pub struct AchievementCatalog {
    persistence: Arc<dyn Persistence>,
}

impl AchievementCatalog {
    /// Create a catalog over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Seed the default catalog if the catalog is empty.
    ///
    /// Returns the number of definitions inserted (0 when skipped).
    pub async fn seed(&self) -> Result<u64> {
        self.seed_with(&default_catalog()).await
    }

    /// Seed the given definitions if the catalog is empty.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn seed_with(&self, entries: &[CatalogEntry]) -> Result<u64> {
        validate_entries(entries)?;

        let existing = self.persistence.count_achievements().await?;
        if existing > 0 {
            info!(existing, "Catalog already populated, skipping seed");
            return Ok(0);
        }

        // Inserts skip slugs that already exist, so a concurrent seed is harmless.
        let inserted = self.persistence.insert_achievements(entries).await?;
        info!(inserted, "Seeded achievement catalog");
        Ok(inserted)
    }

    /// Replace the whole catalog with the default definitions.
    ///
    /// Destructive: progress and unlock rows of the removed definitions are
    /// deleted with them.
    pub async fn reseed(&self) -> Result<u64> {
        self.reseed_with(&default_catalog()).await
    }

    /// Replace the whole catalog with the given definitions.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn reseed_with(&self, entries: &[CatalogEntry]) -> Result<u64> {
        validate_entries(entries)?;

        let inserted = self.persistence.replace_catalog(entries).await?;
        info!(inserted, "Reseeded achievement catalog");
        Ok(inserted)
    }

    /// Active definitions, ordered by category then name.
    pub async fn list_active(&self) -> Result<Vec<AchievementRecord>> {
        self.persistence.list_active_achievements().await
    }

    /// Active definitions counting the given metric.
    pub async fn definitions_for(&self, metric: MetricType) -> Result<Vec<AchievementRecord>> {
        self.persistence.list_achievements_for_metric(metric).await
    }

    /// Create a zeroed progress row for every active achievement.
    ///
    /// Idempotent: rows that already exist are left untouched. Returns the
    /// number of rows created.
    #[instrument(skip(self))]
    pub async fn initialize_profile(&self, profile_id: &str) -> Result<u64> {
        if !self.persistence.profile_exists(profile_id).await? {
            return Err(CoreError::ProfileNotFound {
                profile_id: profile_id.to_string(),
            });
        }

        let created = self
            .persistence
            .initialize_profile_progress(profile_id)
            .await?;
        debug!(created, "Initialized profile progress");
        Ok(created)
    }
}
