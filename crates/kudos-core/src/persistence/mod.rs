//! Persistence interfaces and backends for kudos-core.
//!
//! This module defines the persistence abstraction and backend implementations.
//! Both backends provide the two primitives the engine's correctness rests on:
//! a single-statement atomic increment and a unique-constrained insert for
//! unlock records. No application-level locking is layered on top.

pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::catalog::{AchievementCategory, CatalogEntry, MetricType};
use crate::error::CoreError;

/// Achievement definition record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AchievementRecord {
    /// Unique identifier for the achievement.
    pub achievement_id: String,
    /// Stable key, unique across the catalog.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Category (social, personal, goals_plans, general).
    pub category: String,
    /// Metric counted toward this achievement.
    pub metric_type: String,
    /// Counter value at which the achievement unlocks.
    pub target_value: i64,
    /// Front-end icon identifier.
    pub icon_key: Option<String>,
    /// Whether the definition currently receives progress.
    pub active: bool,
    /// When the definition was seeded.
    pub created_at: DateTime<Utc>,
}

impl AchievementRecord {
    /// Parsed category.
    pub fn category(&self) -> Result<AchievementCategory, CoreError> {
        self.category.parse()
    }

    /// Parsed metric type.
    pub fn metric(&self) -> Result<MetricType, CoreError> {
        self.metric_type.parse()
    }
}

/// Progress counter for one (profile, achievement) pair.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProgressRecord {
    /// Profile this progress belongs to.
    pub profile_id: String,
    /// Achievement this progress counts toward.
    pub achievement_id: String,
    /// Accumulated counter. May exceed the target.
    pub current_value: i64,
    /// Highest milestone percentage already notified (0, 10 or 50).
    pub last_notified_threshold: i32,
    /// When the row was first created.
    pub created_at: DateTime<Utc>,
    /// When the row was last changed.
    pub updated_at: DateTime<Utc>,
}

/// Permanent unlock record for one (profile, achievement) pair.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UnlockRecord {
    /// Profile that unlocked the achievement.
    pub profile_id: String,
    /// Achievement that was unlocked.
    pub achievement_id: String,
    /// Whether the front end still shows this as a new badge.
    pub has_new_badge: bool,
    /// When the achievement was unlocked.
    pub unlocked_at: DateTime<Utc>,
}

/// Unlock record joined with its achievement's display fields.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UnlockedAchievementRecord {
    /// Achievement that was unlocked.
    pub achievement_id: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Category (social, personal, goals_plans, general).
    pub category: String,
    /// Front-end icon identifier.
    pub icon_key: Option<String>,
    /// Whether the front end still shows this as a new badge.
    pub has_new_badge: bool,
    /// When the achievement was unlocked.
    pub unlocked_at: DateTime<Utc>,
}

/// Persistence interface used by the engine and query surface.
#[async_trait]
pub trait Persistence: Send + Sync {
    // ========================================================================
    // Profiles
    // ========================================================================

    /// Record a profile. Idempotent.
    async fn register_profile(&self, profile_id: &str) -> Result<(), CoreError>;

    /// Whether the profile exists.
    async fn profile_exists(&self, profile_id: &str) -> Result<bool, CoreError>;

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Number of definitions in the catalog, active or not.
    async fn count_achievements(&self) -> Result<i64, CoreError>;

    /// Insert definitions, skipping slugs that already exist.
    ///
    /// Returns the number of rows inserted.
    async fn insert_achievements(&self, entries: &[CatalogEntry]) -> Result<u64, CoreError>;

    /// Delete every definition (cascading to progress and unlocks) and insert
    /// `entries`, in one transaction.
    async fn replace_catalog(&self, entries: &[CatalogEntry]) -> Result<u64, CoreError>;

    /// Get a definition by ID.
    async fn get_achievement(
        &self,
        achievement_id: &str,
    ) -> Result<Option<AchievementRecord>, CoreError>;

    /// Active definitions ordered by category, then name.
    async fn list_active_achievements(&self) -> Result<Vec<AchievementRecord>, CoreError>;

    /// Active definitions counting `metric`.
    async fn list_achievements_for_metric(
        &self,
        metric: MetricType,
    ) -> Result<Vec<AchievementRecord>, CoreError>;

    // ========================================================================
    // Progress
    // ========================================================================

    /// Atomically add `amount` to the pair's counter, creating the row at 0
    /// first if absent.
    ///
    /// Returns `None` without writing anything when an unlock record already
    /// exists for the pair.
    async fn increment_progress(
        &self,
        profile_id: &str,
        achievement_id: &str,
        amount: i64,
    ) -> Result<Option<ProgressRecord>, CoreError>;

    /// Raise `last_notified_threshold` to `threshold` if it is currently lower.
    ///
    /// Returns true only for the caller whose update applied.
    async fn advance_notified_threshold(
        &self,
        profile_id: &str,
        achievement_id: &str,
        threshold: i32,
    ) -> Result<bool, CoreError>;

    /// Get the progress row for a pair.
    async fn get_progress(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<Option<ProgressRecord>, CoreError>;

    /// All progress rows for a profile.
    async fn list_progress(&self, profile_id: &str) -> Result<Vec<ProgressRecord>, CoreError>;

    /// Create a zeroed progress row for every active achievement the profile
    /// has no row for. Returns the number of rows created.
    async fn initialize_profile_progress(&self, profile_id: &str) -> Result<u64, CoreError>;

    // ========================================================================
    // Unlocks
    // ========================================================================

    /// Insert the unlock record unless one exists.
    ///
    /// Enforced by the table's primary key, so concurrent callers cannot both
    /// succeed. Returns `None` for every caller but the winner.
    async fn insert_unlock_if_absent(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<Option<UnlockRecord>, CoreError>;

    /// Get the unlock record for a pair.
    async fn get_unlock(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<Option<UnlockRecord>, CoreError>;

    /// Unlocks for a profile joined with achievement details, newest first.
    async fn list_unlocked(
        &self,
        profile_id: &str,
    ) -> Result<Vec<UnlockedAchievementRecord>, CoreError>;

    /// Number of unlocks the profile has not acknowledged yet.
    async fn count_new_badges(&self, profile_id: &str) -> Result<i64, CoreError>;

    /// Clear the new-badge flag. Returns false if no unlock record exists.
    async fn mark_badge_seen(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<bool, CoreError>;

    // ========================================================================
    // Health
    // ========================================================================

    /// Check database connectivity.
    async fn health_check_db(&self) -> Result<bool, CoreError>;
}

/// Connect to the database named by `database_url` and run migrations.
///
/// `postgres://` and `postgresql://` URLs select [`PostgresPersistence`];
/// `sqlite:` URLs select [`SqlitePersistence`].
pub async fn connect(database_url: &str) -> Result<Arc<dyn Persistence>, CoreError> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let persistence = PostgresPersistence::connect(database_url).await?;
        Ok(Arc::new(persistence))
    } else if let Some(path) = database_url.strip_prefix("sqlite:") {
        let path = path.trim_start_matches("//");
        let path = path.split('?').next().unwrap_or(path);
        let persistence = if path == ":memory:" {
            SqlitePersistence::in_memory().await?
        } else {
            SqlitePersistence::from_path(path).await?
        };
        Ok(Arc::new(persistence))
    } else {
        Err(CoreError::ValidationError {
            field: "database_url".to_string(),
            message: "expected a postgres:// or sqlite: URL".to_string(),
        })
    }
}
