//! SQLite-backed persistence implementation.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::catalog::{CatalogEntry, MetricType};
use crate::error::CoreError;

use super::{
    AchievementRecord, Persistence, ProgressRecord, UnlockRecord, UnlockedAchievementRecord,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The caller is responsible for running [`crate::migrations::SQLITE`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Enables WAL and a busy timeout so concurrent handlers wait for locks
    /// - Runs all migrations
    ///
    /// # Example
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/kudos.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::migrate(pool).await
    }

    /// Create a private in-memory database with migrations applied.
    ///
    /// Uses a single connection that is never recycled, since every SQLite
    /// in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to open in-memory SQLite: {}", e),
            })?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, CoreError> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn insert_entries(
    conn: &mut SqliteConnection,
    entries: &[CatalogEntry],
) -> Result<u64, CoreError> {
    let now = Utc::now();
    let mut inserted = 0;

    for entry in entries {
        let result = sqlx::query(
            r#"
            INSERT INTO achievements
                (achievement_id, slug, name, description, category, metric_type,
                 target_value, icon_key, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&entry.slug)
        .bind(&entry.name)
        .bind(&entry.description)
        .bind(entry.category.as_str())
        .bind(entry.metric.as_str())
        .bind(entry.target_value)
        .bind(entry.icon_key.as_deref())
        .bind(entry.active)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        inserted += result.rows_affected();
    }

    Ok(inserted)
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn register_profile(&self, profile_id: &str) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (profile_id, created_at)
            VALUES (?, ?)
            ON CONFLICT(profile_id) DO NOTHING
            "#,
        )
        .bind(profile_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn profile_exists(&self, profile_id: &str) -> Result<bool, CoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles WHERE profile_id = ?")
            .bind(profile_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0 > 0)
    }

    async fn count_achievements(&self) -> Result<i64, CoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM achievements")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    async fn insert_achievements(&self, entries: &[CatalogEntry]) -> Result<u64, CoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_entries(&mut tx, entries).await?;
        tx.commit().await?;

        Ok(inserted)
    }

    async fn replace_catalog(&self, entries: &[CatalogEntry]) -> Result<u64, CoreError> {
        let mut tx = self.pool.begin().await?;

        // Explicit deletes so the replace does not depend on PRAGMA foreign_keys.
        sqlx::query("DELETE FROM user_achievements")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_progress")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM achievements")
            .execute(&mut *tx)
            .await?;

        let inserted = insert_entries(&mut tx, entries).await?;
        tx.commit().await?;

        Ok(inserted)
    }

    async fn get_achievement(
        &self,
        achievement_id: &str,
    ) -> Result<Option<AchievementRecord>, CoreError> {
        let record = sqlx::query_as::<_, AchievementRecord>(
            r#"
            SELECT achievement_id, slug, name, description, category, metric_type,
                   target_value, icon_key, active, created_at
            FROM achievements
            WHERE achievement_id = ?
            "#,
        )
        .bind(achievement_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_active_achievements(&self) -> Result<Vec<AchievementRecord>, CoreError> {
        let records = sqlx::query_as::<_, AchievementRecord>(
            r#"
            SELECT achievement_id, slug, name, description, category, metric_type,
                   target_value, icon_key, active, created_at
            FROM achievements
            WHERE active = 1
            ORDER BY category ASC, name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_achievements_for_metric(
        &self,
        metric: MetricType,
    ) -> Result<Vec<AchievementRecord>, CoreError> {
        let records = sqlx::query_as::<_, AchievementRecord>(
            r#"
            SELECT achievement_id, slug, name, description, category, metric_type,
                   target_value, icon_key, active, created_at
            FROM achievements
            WHERE metric_type = ? AND active = 1
            ORDER BY target_value ASC, slug ASC
            "#,
        )
        .bind(metric.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn increment_progress(
        &self,
        profile_id: &str,
        achievement_id: &str,
        amount: i64,
    ) -> Result<Option<ProgressRecord>, CoreError> {
        // One statement: the NOT EXISTS guard freezes unlocked pairs, the
        // upsert makes the read-modify-write atomic under SQLite's write lock.
        let record = sqlx::query_as::<_, ProgressRecord>(
            r#"
            INSERT INTO user_progress
                (profile_id, achievement_id, current_value, last_notified_threshold,
                 created_at, updated_at)
            SELECT ?1, ?2, ?3, 0, ?4, ?4
            WHERE NOT EXISTS (
                SELECT 1 FROM user_achievements
                WHERE profile_id = ?1 AND achievement_id = ?2
            )
            ON CONFLICT(profile_id, achievement_id) DO UPDATE SET
                current_value = user_progress.current_value + excluded.current_value,
                updated_at = excluded.updated_at
            RETURNING profile_id, achievement_id, current_value, last_notified_threshold,
                      created_at, updated_at
            "#,
        )
        .bind(profile_id)
        .bind(achievement_id)
        .bind(amount)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn advance_notified_threshold(
        &self,
        profile_id: &str,
        achievement_id: &str,
        threshold: i32,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE user_progress
            SET last_notified_threshold = ?3, updated_at = ?4
            WHERE profile_id = ?1
              AND achievement_id = ?2
              AND last_notified_threshold < ?3
            "#,
        )
        .bind(profile_id)
        .bind(achievement_id)
        .bind(threshold)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_progress(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<Option<ProgressRecord>, CoreError> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            r#"
            SELECT profile_id, achievement_id, current_value, last_notified_threshold,
                   created_at, updated_at
            FROM user_progress
            WHERE profile_id = ? AND achievement_id = ?
            "#,
        )
        .bind(profile_id)
        .bind(achievement_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_progress(&self, profile_id: &str) -> Result<Vec<ProgressRecord>, CoreError> {
        let records = sqlx::query_as::<_, ProgressRecord>(
            r#"
            SELECT profile_id, achievement_id, current_value, last_notified_threshold,
                   created_at, updated_at
            FROM user_progress
            WHERE profile_id = ?
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn initialize_profile_progress(&self, profile_id: &str) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_progress
                (profile_id, achievement_id, current_value, last_notified_threshold,
                 created_at, updated_at)
            SELECT ?1, achievement_id, 0, 0, ?2, ?2
            FROM achievements
            WHERE active = 1
            ON CONFLICT(profile_id, achievement_id) DO NOTHING
            "#,
        )
        .bind(profile_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_unlock_if_absent(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<Option<UnlockRecord>, CoreError> {
        let record = sqlx::query_as::<_, UnlockRecord>(
            r#"
            INSERT INTO user_achievements (profile_id, achievement_id, has_new_badge, unlocked_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(profile_id, achievement_id) DO NOTHING
            RETURNING profile_id, achievement_id, has_new_badge, unlocked_at
            "#,
        )
        .bind(profile_id)
        .bind(achievement_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_unlock(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<Option<UnlockRecord>, CoreError> {
        let record = sqlx::query_as::<_, UnlockRecord>(
            r#"
            SELECT profile_id, achievement_id, has_new_badge, unlocked_at
            FROM user_achievements
            WHERE profile_id = ? AND achievement_id = ?
            "#,
        )
        .bind(profile_id)
        .bind(achievement_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_unlocked(
        &self,
        profile_id: &str,
    ) -> Result<Vec<UnlockedAchievementRecord>, CoreError> {
        let records = sqlx::query_as::<_, UnlockedAchievementRecord>(
            r#"
            SELECT ua.achievement_id, a.name, a.description, a.category, a.icon_key,
                   ua.has_new_badge, ua.unlocked_at
            FROM user_achievements ua
            JOIN achievements a ON a.achievement_id = ua.achievement_id
            WHERE ua.profile_id = ?
            ORDER BY ua.unlocked_at DESC
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn count_new_badges(&self, profile_id: &str) -> Result<i64, CoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM user_achievements
            WHERE profile_id = ? AND has_new_badge = 1
            "#,
        )
        .bind(profile_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn mark_badge_seen(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE user_achievements
            SET has_new_badge = 0
            WHERE profile_id = ? AND achievement_id = ?
            "#,
        )
        .bind(profile_id)
        .bind(achievement_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
