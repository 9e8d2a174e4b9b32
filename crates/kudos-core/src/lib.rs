// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kudos Core - Achievement Progress Engine
//!
//! This crate turns domain events from the rest of the application (forum,
//! diary, planner, friendships, chat, AI consultant) into per-user progress
//! toward a catalog of achievements. It decides when a milestone notification
//! is due and unlocks each achievement exactly once, no matter how many
//! duplicate or concurrent events arrive.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Event Producers                                 │
//! │          (forum, diary, planner, friendships, chat, AI consultant)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ {"event": tag, "payload": {...}}
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 EngineRuntime (queue + bounded handlers)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌───────────────┐   MetricUpdate   ┌────────────────┐  UpdatedProgress
//! │ Event Router  │─────────────────▶│ Progress Ledger│──────────┬────────────┐
//! └───────────────┘                  └────────────────┘          │            │
//!                                            │                   ▼            ▼
//!                                            │         ┌──────────────┐ ┌──────────────┐
//!                                            │         │  Milestone   │ │    Unlock    │
//!                                            │         │  Notifier    │ │    Engine    │
//!                                            │         └──────┬───────┘ └──────┬───────┘
//!                                            ▼                │                │
//!                                 ┌────────────────────┐      ▼                ▼
//!                                 │ PostgreSQL/SQLite  │   EventSink (progress.notification,
//!                                 │ (atomic primitives)│              achievement.unlocked)
//!                                 └────────────────────┘
//! ```
//!
//! # Inbound Events
//!
//! | Tag | Payload | Metrics |
//! |-----|---------|---------|
//! | `forum.interaction` | `profileId`, `interactionType` | `forum_interactions` |
//! | `friendship.accepted` | `accepterId`, `requesterId` | `friend_connections` for both |
//! | `diary.entry.created` | `profileId`, `entryId`, `title`, `content` | `diary_entries`, `deep_reflection` |
//! | `plan.progress.updated` | `profileId`, `progressType` | `consecutive_practices` or plan completion |
//! | `plan.completed` | `profileId` | `plan_completion`, `ai_plan_completion` |
//! | `ai.consultation.used` | `profileId` | `ai_help_seeking` |
//! | `post.likes.milestone` | `postId`, `authorId`, `likesCount` | `popular_post` (10+ likes) |
//! | `chat.conversation.started` | `profileId`, `conversationType` | `new_conversation` |
//!
//! Unknown tags are logged and dropped.
//!
//! # Achievement State Machine
//!
//! ```text
//!                ┌─────────────┐
//!                │ NOT_STARTED │
//!                └──────┬──────┘
//!                       │ first increment
//!                       ▼
//!                ┌─────────────┐
//!                │ IN_PROGRESS │◀──┐ increment below target
//!                └──────┬──────┘───┘ (10% / 50% notifications)
//!                       │ current >= target, unlock insert wins
//!                       ▼
//!                ┌─────────────┐
//!                │  UNLOCKED   │ terminal, progress frozen
//!                └─────────────┘
//! ```
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | No lost increments | single-statement upsert `current_value = current_value + n` |
//! | Frozen after unlock | the upsert is guarded by `NOT EXISTS` on the unlock row |
//! | One notification per threshold | compare-and-swap on `last_notified_threshold` |
//! | At most one unlock | primary key on `(profile_id, achievement_id)` + `ON CONFLICT DO NOTHING` |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `KUDOS_DATABASE_URL` | Yes | - | `postgres://…` or `sqlite:…` connection string |
//! | `KUDOS_MAX_IN_FLIGHT` | No | `64` | Concurrent event handlers (`0` = unbounded) |
//! | `KUDOS_QUEUE_CAPACITY` | No | `1024` | Inbound event queue capacity |
//! | `KUDOS_RETRY_MAX_ATTEMPTS` | No | `3` | Retries for contended storage operations |
//! | `KUDOS_RETRY_BASE_DELAY_MS` | No | `50` | Base delay for exponential backoff |
//! | `KUDOS_SEED_CATALOG` | No | `true` | Seed the default catalog on startup |
//!
//! # Modules
//!
//! - [`catalog`]: Achievement definitions, seeding and profile initialization
//! - [`config`]: Configuration from environment variables
//! - [`engine`]: Router, ledger, notifier and unlock engine wired together
//! - [`error`]: Error types with machine-readable codes
//! - [`events`]: Outbound events and sinks
//! - [`ledger`]: Atomic progress increments
//! - [`migrations`]: Embedded SQL migrations
//! - [`notifier`]: Milestone threshold detection
//! - [`persistence`]: Storage trait with PostgreSQL and SQLite backends
//! - [`queries`]: Read and acknowledge operations for the API layer
//! - [`retry`]: Bounded exponential backoff for storage contention
//! - [`router`]: Inbound event decoding and routing
//! - [`runtime`]: Embeddable async runtime with graceful shutdown
//! - [`unlock`]: Exactly-once unlocks

#![deny(missing_docs)]

/// Achievement catalog: definitions, default seed, profile initialization.
pub mod catalog;

/// Configuration loaded from environment variables.
pub mod config;

/// The engine that processes events end to end.
pub mod engine;

/// Error types for core operations with machine-readable codes.
pub mod error;

/// Outbound events and the sinks that deliver them.
pub mod events;

/// Progress ledger with atomic per-pair increments.
pub mod ledger;

/// Database migrations for PostgreSQL and SQLite.
pub mod migrations;

/// Milestone threshold notifications.
pub mod notifier;

/// Persistence trait, record types and backends.
pub mod persistence;

/// Query surface for the API layer.
pub mod queries;

/// Retry with exponential backoff for transient storage errors.
pub mod retry;

/// Inbound event types and routing.
pub mod router;

/// Embeddable async runtime.
pub mod runtime;

/// Exactly-once unlocks and the per-pair state machine.
pub mod unlock;

#[cfg(test)]
mod test_support;

pub use engine::{AchievementEngine, ProcessReport};
pub use error::{CoreError, Result};
pub use router::{DomainEvent, EventEnvelope, MetricUpdate};
