// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence operations for kudos-core.
//!
//! Provides all durable storage access functions for the catalog, progress
//! counters and unlock records.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::catalog::{CatalogEntry, MetricType};
use crate::error::CoreError;

use super::{
    AchievementRecord, Persistence, ProgressRecord, UnlockRecord, UnlockedAchievementRecord,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    ///
    /// The caller is responsible for running [`crate::migrations::POSTGRES`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and apply pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: e.to_string(),
            })?;

        crate::migrations::run_postgres(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Profile Operations
// ============================================================================

/// Record a profile, ignoring duplicates.
pub async fn register_profile(pool: &PgPool, profile_id: &str) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO profiles (profile_id, created_at)
        VALUES ($1, NOW())
        ON CONFLICT (profile_id) DO NOTHING
        "#,
    )
    .bind(profile_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Whether a profile exists.
pub async fn profile_exists(pool: &PgPool, profile_id: &str) -> Result<bool, CoreError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles WHERE profile_id = $1")
        .bind(profile_id)
        .fetch_one(pool)
        .await?;

    Ok(row.0 > 0)
}

// ============================================================================
// Catalog Operations
// ============================================================================

/// Count every catalog definition.
pub async fn count_achievements(pool: &PgPool) -> Result<i64, CoreError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM achievements")
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}

async fn insert_entries(
    conn: &mut PgConnection,
    entries: &[CatalogEntry],
) -> Result<u64, CoreError> {
    let mut inserted = 0;

    for entry in entries {
        let result = sqlx::query(
            r#"
            INSERT INTO achievements
                (achievement_id, slug, name, description, category, metric_type,
                 target_value, icon_key, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (slug) DO NOTHING
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
        .execute(&mut *conn)
        .await?;

        inserted += result.rows_affected();
    }

    Ok(inserted)
}

/// Insert catalog definitions, skipping slugs that already exist.
pub async fn insert_achievements(pool: &PgPool, entries: &[CatalogEntry]) -> Result<u64, CoreError> {
    let mut tx = pool.begin().await?;
    let inserted = insert_entries(&mut tx, entries).await?;
    tx.commit().await?;

    Ok(inserted)
}

/// Replace the whole catalog in one transaction.
///
/// Deleting definitions cascades to progress and unlock rows.
pub async fn replace_catalog(pool: &PgPool, entries: &[CatalogEntry]) -> Result<u64, CoreError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM achievements")
        .execute(&mut *tx)
        .await?;
    let inserted = insert_entries(&mut tx, entries).await?;

    tx.commit().await?;

    Ok(inserted)
}

/// Get a definition by ID.
pub async fn get_achievement(
    pool: &PgPool,
    achievement_id: &str,
) -> Result<Option<AchievementRecord>, CoreError> {
    let record = sqlx::query_as::<_, AchievementRecord>(
        r#"
        SELECT achievement_id, slug, name, description, category, metric_type,
               target_value, icon_key, active, created_at
        FROM achievements
        WHERE achievement_id = $1
        "#,
    )
    .bind(achievement_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Active definitions ordered for display.
pub async fn list_active_achievements(pool: &PgPool) -> Result<Vec<AchievementRecord>, CoreError> {
    let records = sqlx::query_as::<_, AchievementRecord>(
        r#"
        SELECT achievement_id, slug, name, description, category, metric_type,
               target_value, icon_key, active, created_at
        FROM achievements
        WHERE active
        ORDER BY category ASC, name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Active definitions counting one metric.
pub async fn list_achievements_for_metric(
    pool: &PgPool,
    metric: MetricType,
) -> Result<Vec<AchievementRecord>, CoreError> {
    let records = sqlx::query_as::<_, AchievementRecord>(
        r#"
        SELECT achievement_id, slug, name, description, category, metric_type,
               target_value, icon_key, active, created_at
        FROM achievements
        WHERE metric_type = $1 AND active
        ORDER BY target_value ASC, slug ASC
        "#,
    )
    .bind(metric.as_str())
    .fetch_all(pool)
    .await?;

    Ok(records)
}

// ============================================================================
// Progress Operations
// ============================================================================

/// Atomically add `amount` to a pair's counter.
///
/// Returns `None` when the pair is already unlocked.
pub async fn increment_progress(
    pool: &PgPool,
    profile_id: &str,
    achievement_id: &str,
    amount: i64,
) -> Result<Option<ProgressRecord>, CoreError> {
    let record = sqlx::query_as::<_, ProgressRecord>(
        r#"
        INSERT INTO user_progress
            (profile_id, achievement_id, current_value, last_notified_threshold,
             created_at, updated_at)
        SELECT $1, $2, $3, 0, NOW(), NOW()
        WHERE NOT EXISTS (
            SELECT 1 FROM user_achievements
            WHERE profile_id = $1 AND achievement_id = $2
        )
        ON CONFLICT (profile_id, achievement_id) DO UPDATE SET
            current_value = user_progress.current_value + EXCLUDED.current_value,
            updated_at = EXCLUDED.updated_at
        RETURNING profile_id, achievement_id, current_value, last_notified_threshold,
                  created_at, updated_at
        "#,
    )
    .bind(profile_id)
    .bind(achievement_id)
    .bind(amount)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Raise the notified threshold if it is currently lower.
pub async fn advance_notified_threshold(
    pool: &PgPool,
    profile_id: &str,
    achievement_id: &str,
    threshold: i32,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE user_progress
        SET last_notified_threshold = $3, updated_at = NOW()
        WHERE profile_id = $1
          AND achievement_id = $2
          AND last_notified_threshold < $3
        "#,
    )
    .bind(profile_id)
    .bind(achievement_id)
    .bind(threshold)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Get the progress row for a pair.
pub async fn get_progress(
    pool: &PgPool,
    profile_id: &str,
    achievement_id: &str,
) -> Result<Option<ProgressRecord>, CoreError> {
    let record = sqlx::query_as::<_, ProgressRecord>(
        r#"
        SELECT profile_id, achievement_id, current_value, last_notified_threshold,
               created_at, updated_at
        FROM user_progress
        WHERE profile_id = $1 AND achievement_id = $2
        "#,
    )
    .bind(profile_id)
    .bind(achievement_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// All progress rows for a profile.
pub async fn list_progress(pool: &PgPool, profile_id: &str) -> Result<Vec<ProgressRecord>, CoreError> {
    let records = sqlx::query_as::<_, ProgressRecord>(
        r#"
        SELECT profile_id, achievement_id, current_value, last_notified_threshold,
               created_at, updated_at
        FROM user_progress
        WHERE profile_id = $1
        "#,
    )
    .bind(profile_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Create zeroed rows for every active achievement the profile lacks.
pub async fn initialize_profile_progress(pool: &PgPool, profile_id: &str) -> Result<u64, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO user_progress
            (profile_id, achievement_id, current_value, last_notified_threshold,
             created_at, updated_at)
        SELECT $1, achievement_id, 0, 0, NOW(), NOW()
        FROM achievements
        WHERE active
        ON CONFLICT (profile_id, achievement_id) DO NOTHING
        "#,
    )
    .bind(profile_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// ============================================================================
// Unlock Operations
// ============================================================================

/// Insert an unlock record unless one exists; `None` means another writer won.
pub async fn insert_unlock_if_absent(
    pool: &PgPool,
    profile_id: &str,
    achievement_id: &str,
) -> Result<Option<UnlockRecord>, CoreError> {
    let record = sqlx::query_as::<_, UnlockRecord>(
        r#"
        INSERT INTO user_achievements (profile_id, achievement_id, has_new_badge, unlocked_at)
        VALUES ($1, $2, TRUE, NOW())
        ON CONFLICT (profile_id, achievement_id) DO NOTHING
        RETURNING profile_id, achievement_id, has_new_badge, unlocked_at
        "#,
    )
    .bind(profile_id)
    .bind(achievement_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Get the unlock record for a pair.
pub async fn get_unlock(
    pool: &PgPool,
    profile_id: &str,
    achievement_id: &str,
) -> Result<Option<UnlockRecord>, CoreError> {
    let record = sqlx::query_as::<_, UnlockRecord>(
        r#"
        SELECT profile_id, achievement_id, has_new_badge, unlocked_at
        FROM user_achievements
        WHERE profile_id = $1 AND achievement_id = $2
        "#,
    )
    .bind(profile_id)
    .bind(achievement_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Unlocks joined with achievement details, newest first.
pub async fn list_unlocked(
    pool: &PgPool,
    profile_id: &str,
) -> Result<Vec<UnlockedAchievementRecord>, CoreError> {
    let records = sqlx::query_as::<_, UnlockedAchievementRecord>(
        r#"
        SELECT ua.achievement_id, a.name, a.description, a.category, a.icon_key,
               ua.has_new_badge, ua.unlocked_at
        FROM user_achievements ua
        JOIN achievements a ON a.achievement_id = ua.achievement_id
        WHERE ua.profile_id = $1
        ORDER BY ua.unlocked_at DESC
        "#,
    )
    .bind(profile_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Count unacknowledged unlocks.
pub async fn count_new_badges(pool: &PgPool, profile_id: &str) -> Result<i64, CoreError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM user_achievements WHERE profile_id = $1 AND has_new_badge",
    )
    .bind(profile_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Clear the new-badge flag.
pub async fn mark_badge_seen(
    pool: &PgPool,
    profile_id: &str,
    achievement_id: &str,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE user_achievements
        SET has_new_badge = FALSE
        WHERE profile_id = $1 AND achievement_id = $2
        "#,
    )
    .bind(profile_id)
    .bind(achievement_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Check database connectivity.
pub async fn health_check(pool: &PgPool) -> Result<bool, CoreError> {
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;
    Ok(row.0 == 1)
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn register_profile(&self, profile_id: &str) -> Result<(), CoreError> {
        register_profile(&self.pool, profile_id).await
    }

    async fn profile_exists(&self, profile_id: &str) -> Result<bool, CoreError> {
        profile_exists(&self.pool, profile_id).await
    }

    async fn count_achievements(&self) -> Result<i64, CoreError> {
        count_achievements(&self.pool).await
    }

    async fn insert_achievements(&self, entries: &[CatalogEntry]) -> Result<u64, CoreError> {
        insert_achievements(&self.pool, entries).await
    }

    async fn replace_catalog(&self, entries: &[CatalogEntry]) -> Result<u64, CoreError> {
        replace_catalog(&self.pool, entries).await
    }

    async fn get_achievement(
        &self,
        achievement_id: &str,
    ) -> Result<Option<AchievementRecord>, CoreError> {
        get_achievement(&self.pool, achievement_id).await
    }

    async fn list_active_achievements(&self) -> Result<Vec<AchievementRecord>, CoreError> {
        list_active_achievements(&self.pool).await
    }

    async fn list_achievements_for_metric(
        &self,
        metric: MetricType,
    ) -> Result<Vec<AchievementRecord>, CoreError> {
        list_achievements_for_metric(&self.pool, metric).await
    }

    async fn increment_progress(
        &self,
        profile_id: &str,
        achievement_id: &str,
        amount: i64,
    ) -> Result<Option<ProgressRecord>, CoreError> {
        increment_progress(&self.pool, profile_id, achievement_id, amount).await
    }

    async fn advance_notified_threshold(
        &self,
        profile_id: &str,
        achievement_id: &str,
        threshold: i32,
    ) -> Result<bool, CoreError> {
        advance_notified_threshold(&self.pool, profile_id, achievement_id, threshold).await
    }

    async fn get_progress(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<Option<ProgressRecord>, CoreError> {
        get_progress(&self.pool, profile_id, achievement_id).await
    }

    async fn list_progress(&self, profile_id: &str) -> Result<Vec<ProgressRecord>, CoreError> {
        list_progress(&self.pool, profile_id).await
    }

    async fn initialize_profile_progress(&self, profile_id: &str) -> Result<u64, CoreError> {
        initialize_profile_progress(&self.pool, profile_id).await
    }

    async fn insert_unlock_if_absent(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<Option<UnlockRecord>, CoreError> {
        insert_unlock_if_absent(&self.pool, profile_id, achievement_id).await
    }

    async fn get_unlock(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<Option<UnlockRecord>, CoreError> {
        get_unlock(&self.pool, profile_id, achievement_id).await
    }

    async fn list_unlocked(
        &self,
        profile_id: &str,
    ) -> Result<Vec<UnlockedAchievementRecord>, CoreError> {
        list_unlocked(&self.pool, profile_id).await
    }

    async fn count_new_badges(&self, profile_id: &str) -> Result<i64, CoreError> {
        count_new_badges(&self.pool, profile_id).await
    }

    async fn mark_badge_seen(
        &self,
        profile_id: &str,
        achievement_id: &str,
    ) -> Result<bool, CoreError> {
        mark_badge_seen(&self.pool, profile_id, achievement_id).await
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        health_check(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AchievementCategory;

    // Helper to get a test database pool
    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        crate::migrations::run_postgres(&pool).await.ok()?;
        Some(pool)
    }

    // Helper to create a profile and one definition with a unique slug
    async fn create_fixture(pool: &PgPool, target_value: i64) -> (String, String) {
        let profile_id = format!("profile-{}", Uuid::new_v4());
        let slug = format!("test_{}", Uuid::new_v4().simple());
        register_profile(pool, &profile_id).await.unwrap();

        insert_achievements(
            pool,
            &[CatalogEntry {
                slug: slug.clone(),
                name: "Test".to_string(),
                description: "Test achievement".to_string(),
                category: AchievementCategory::General,
                metric: MetricType::DeepReflection,
                target_value,
                icon_key: None,
                active: true,
            }],
        )
        .await
        .unwrap();

        let (achievement_id,): (String,) =
            sqlx::query_as("SELECT achievement_id FROM achievements WHERE slug = $1")
                .bind(&slug)
                .fetch_one(pool)
                .await
                .unwrap();

        (profile_id, achievement_id)
    }

    // Helper to clean up test data
    async fn cleanup(pool: &PgPool, profile_id: &str, achievement_id: &str) {
        sqlx::query("DELETE FROM achievements WHERE achievement_id = $1")
            .bind(achievement_id)
            .execute(pool)
            .await
            .ok();
        sqlx::query("DELETE FROM profiles WHERE profile_id = $1")
            .bind(profile_id)
            .execute(pool)
            .await
            .ok();
    }

    #[tokio::test]
    async fn test_increment_and_freeze() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let (profile_id, achievement_id) = create_fixture(&pool, 3).await;

        let progress = increment_progress(&pool, &profile_id, &achievement_id, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.current_value, 2);

        let progress = increment_progress(&pool, &profile_id, &achievement_id, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.current_value, 4);

        assert!(
            insert_unlock_if_absent(&pool, &profile_id, &achievement_id)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            increment_progress(&pool, &profile_id, &achievement_id, 1)
                .await
                .unwrap()
                .is_none()
        );

        cleanup(&pool, &profile_id, &achievement_id).await;
    }

    #[tokio::test]
    async fn test_threshold_compare_and_swap() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let (profile_id, achievement_id) = create_fixture(&pool, 10).await;
        increment_progress(&pool, &profile_id, &achievement_id, 1)
            .await
            .unwrap();

        assert!(
            advance_notified_threshold(&pool, &profile_id, &achievement_id, 10)
                .await
                .unwrap()
        );
        assert!(
            !advance_notified_threshold(&pool, &profile_id, &achievement_id, 10)
                .await
                .unwrap()
        );

        cleanup(&pool, &profile_id, &achievement_id).await;
    }

    #[tokio::test]
    async fn test_concurrent_unlock_inserts_single_winner() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let (profile_id, achievement_id) = create_fixture(&pool, 1).await;

        let attempts = (0..8).map(|_| insert_unlock_if_absent(&pool, &profile_id, &achievement_id));
        let results = futures::future::join_all(attempts).await;

        let winners = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Some(_))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(count_new_badges(&pool, &profile_id).await.unwrap(), 1);

        cleanup(&pool, &profile_id, &achievement_id).await;
    }

    #[tokio::test]
    async fn test_health_check() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };

        assert!(health_check(&pool).await.unwrap());
    }
}
