// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for kudos-core.
//!
//! Provides a unified error type with stable machine-readable codes. Outcomes
//! that are expected under concurrency (an achievement already unlocked, a
//! threshold already notified) are never represented here.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// PostgreSQL SQLSTATEs and SQLite result codes that indicate lock contention
/// rather than a broken query. Each of them means the statement did not take
/// effect.
const TRANSIENT_DB_CODES: &[&str] = &[
    // PostgreSQL: serialization_failure, deadlock_detected, lock_not_available
    "40001", "40P01", "55P03",
    // SQLite: SQLITE_BUSY, SQLITE_LOCKED and their extended codes
    "5", "6", "261", "262", "517",
];

/// Core errors that can occur while processing events and queries.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// The referenced user profile does not exist.
    ProfileNotFound {
        /// The profile ID that was not found.
        profile_id: String,
    },

    /// The referenced achievement is not in the catalog.
    AchievementNotFound {
        /// The achievement ID that was not found.
        achievement_id: String,
    },

    /// An inbound event with a known tag carried a payload of the wrong shape.
    InvalidEvent {
        /// The event tag.
        event: String,
        /// Why the payload was rejected.
        details: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A lock, busy database or exhausted pool prevented the operation.
    /// Safe to retry.
    StorageContention {
        /// The operation that was contended.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ProfileNotFound { .. } => "PROFILE_NOT_FOUND",
            Self::AchievementNotFound { .. } => "ACHIEVEMENT_NOT_FOUND",
            Self::InvalidEvent { .. } => "INVALID_EVENT",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::StorageContention { .. } => "STORAGE_CONTENTION",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageContention { .. })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProfileNotFound { profile_id } => {
                write!(f, "Profile '{}' not found", profile_id)
            }
            Self::AchievementNotFound { achievement_id } => {
                write!(f, "Achievement '{}' not found", achievement_id)
            }
            Self::InvalidEvent { event, details } => {
                write!(f, "Invalid payload for event '{}': {}", event, details)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::StorageContention { operation, details } => {
                write!(f, "Storage contention during '{}': {}", operation, details)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        // An I/O error may arrive after the server committed, so it is not
        // safe to re-run a non-idempotent statement on it.
        let transient = match &err {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db_err) => db_err
                .code()
                .is_some_and(|code| TRANSIENT_DB_CODES.contains(&code.as_ref())),
            _ => false,
        };

        if transient {
            CoreError::StorageContention {
                operation: "query".to_string(),
                details: err.to_string(),
            }
        } else {
            CoreError::DatabaseError {
                operation: "query".to_string(),
                details: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
