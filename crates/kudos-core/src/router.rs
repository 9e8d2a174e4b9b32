// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Event Router: translates inbound domain events into metric updates.
//!
//! Routing is a pure mapping. The dispatch table is the `match` in
//! [`DomainEvent::from_envelope`] (wire tag to payload type) together with
//! [`route`] (event to metric updates). Unknown tags are dropped with a
//! warning; a known tag with a malformed payload is an
//! [`CoreError::InvalidEvent`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::catalog::MetricType;
use crate::error::{CoreError, Result};

/// Minimum body length, in characters, for a diary entry to count as a deep
/// reflection.
pub const DEEP_REFLECTION_MIN_CHARS: usize = 100;

/// Likes a post needs before its author is credited with `popular_post`.
pub const POPULAR_POST_MIN_LIKES: u64 = 10;

/// Wire tags of the inbound events.
pub mod tags {
    /// A comment, like or reply in the forum.
    pub const FORUM_INTERACTION: &str = "forum.interaction";
    /// A friendship request was accepted.
    pub const FRIENDSHIP_ACCEPTED: &str = "friendship.accepted";
    /// A diary entry was written.
    pub const DIARY_ENTRY_CREATED: &str = "diary.entry.created";
    /// A plan's progress moved forward or completed.
    pub const PLAN_PROGRESS_UPDATED: &str = "plan.progress.updated";
    /// A plan was completed.
    pub const PLAN_COMPLETED: &str = "plan.completed";
    /// The AI consultant was used.
    pub const AI_CONSULTATION_USED: &str = "ai.consultation.used";
    /// A post crossed a likes milestone.
    pub const POST_LIKES_MILESTONE: &str = "post.likes.milestone";
    /// A chat conversation was opened.
    pub const CHAT_CONVERSATION_STARTED: &str = "chat.conversation.started";

    /// Every tag the router understands.
    pub const ALL: [&str; 8] = [
        FORUM_INTERACTION,
        FRIENDSHIP_ACCEPTED,
        DIARY_ENTRY_CREATED,
        PLAN_PROGRESS_UPDATED,
        PLAN_COMPLETED,
        AI_CONSULTATION_USED,
        POST_LIKES_MILESTONE,
        CHAT_CONVERSATION_STARTED,
    ];
}

// ============================================================================
// Payloads
// ============================================================================

/// Kind of forum interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    /// Commented on a post.
    Comment,
    /// Liked a post.
    Like,
    /// Replied to a comment.
    Reply,
}

/// `forum.interaction`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForumInteraction {
    /// Acting profile.
    pub profile_id: String,
    /// What the profile did.
    pub interaction_type: InteractionType,
}

/// `friendship.accepted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendshipAccepted {
    /// Profile that accepted the request.
    pub accepter_id: String,
    /// Profile that sent the request.
    pub requester_id: String,
}

/// `diary.entry.created`
///
/// When `content` is present the router decides deep-reflection
/// qualification itself and `has_reflection` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryEntryCreated {
    /// Author profile.
    pub profile_id: String,
    /// The new entry.
    pub entry_id: String,
    /// Entry title, if any.
    #[serde(default)]
    pub title: Option<String>,
    /// Entry body.
    #[serde(default)]
    pub content: Option<String>,
    /// Producer-computed qualification, used only when `content` is absent.
    #[serde(default)]
    pub has_reflection: bool,
}

impl DiaryEntryCreated {
    /// Whether this entry counts toward `deep_reflection`.
    pub fn qualifies_as_deep_reflection(&self) -> bool {
        match &self.content {
            Some(content) => is_deep_reflection(self.title.as_deref(), content),
            None => self.has_reflection,
        }
    }
}

/// Direction of a plan progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanProgressType {
    /// A practice step was done.
    Increase,
    /// The plan was finished.
    Completion,
}

/// `plan.progress.updated`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProgressUpdated {
    /// Plan owner.
    pub profile_id: String,
    /// Increase or completion.
    pub progress_type: PlanProgressType,
}

/// Payload carrying only the acting profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAction {
    /// Acting profile.
    pub profile_id: String,
}

/// `post.likes.milestone`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostLikesMilestone {
    /// The liked post.
    pub post_id: String,
    /// Author of the post.
    pub author_id: String,
    /// Likes at the time of the event.
    pub likes_count: u64,
}

/// Kind of chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    /// Conversation with a friend.
    NewFriend,
    /// Conversation with the AI assistant.
    AiHelp,
}

/// `chat.conversation.started`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConversationStarted {
    /// Profile that opened the conversation.
    pub profile_id: String,
    /// Friend or AI.
    pub conversation_type: ConversationType,
}

// ============================================================================
// Events
// ============================================================================

/// The closed set of inbound domain events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// `forum.interaction`
    ForumInteraction(ForumInteraction),
    /// `friendship.accepted`
    FriendshipAccepted(FriendshipAccepted),
    /// `diary.entry.created`
    DiaryEntryCreated(DiaryEntryCreated),
    /// `plan.progress.updated`
    PlanProgressUpdated(PlanProgressUpdated),
    /// `plan.completed`
    PlanCompleted(ProfileAction),
    /// `ai.consultation.used`
    AiConsultationUsed(ProfileAction),
    /// `post.likes.milestone`
    PostLikesMilestone(PostLikesMilestone),
    /// `chat.conversation.started`
    ChatConversationStarted(ChatConversationStarted),
}

/// Wire form of an inbound event: a tag plus an untyped payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event tag, e.g. `forum.interaction`.
    pub event: String,
    /// Tag-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    /// Build an envelope from a tag and payload.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

fn parse_payload<T: DeserializeOwned>(envelope: &EventEnvelope) -> Result<T> {
    T::deserialize(&envelope.payload).map_err(|e| CoreError::InvalidEvent {
        event: envelope.event.clone(),
        details: e.to_string(),
    })
}

impl DomainEvent {
    /// Decode an envelope.
    ///
    /// Returns `Ok(None)` for tags the router does not know.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Option<Self>> {
        let event = match envelope.event.as_str() {
            tags::FORUM_INTERACTION => Self::ForumInteraction(parse_payload(envelope)?),
            tags::FRIENDSHIP_ACCEPTED => Self::FriendshipAccepted(parse_payload(envelope)?),
            tags::DIARY_ENTRY_CREATED => Self::DiaryEntryCreated(parse_payload(envelope)?),
            tags::PLAN_PROGRESS_UPDATED => Self::PlanProgressUpdated(parse_payload(envelope)?),
            tags::PLAN_COMPLETED => Self::PlanCompleted(parse_payload(envelope)?),
            tags::AI_CONSULTATION_USED => Self::AiConsultationUsed(parse_payload(envelope)?),
            tags::POST_LIKES_MILESTONE => Self::PostLikesMilestone(parse_payload(envelope)?),
            tags::CHAT_CONVERSATION_STARTED => {
                Self::ChatConversationStarted(parse_payload(envelope)?)
            }
            other => {
                warn!(event = other, "Dropping event with unknown tag");
                return Ok(None);
            }
        };

        Ok(Some(event))
    }

    /// Wire tag of this event.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ForumInteraction(_) => tags::FORUM_INTERACTION,
            Self::FriendshipAccepted(_) => tags::FRIENDSHIP_ACCEPTED,
            Self::DiaryEntryCreated(_) => tags::DIARY_ENTRY_CREATED,
            Self::PlanProgressUpdated(_) => tags::PLAN_PROGRESS_UPDATED,
            Self::PlanCompleted(_) => tags::PLAN_COMPLETED,
            Self::AiConsultationUsed(_) => tags::AI_CONSULTATION_USED,
            Self::PostLikesMilestone(_) => tags::POST_LIKES_MILESTONE,
            Self::ChatConversationStarted(_) => tags::CHAT_CONVERSATION_STARTED,
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

/// One increment to apply to every active achievement counting `metric`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricUpdate {
    /// Profile to credit.
    pub profile_id: String,
    /// Metric to increment.
    pub metric: MetricType,
    /// Increment, always positive.
    pub amount: i64,
    /// Context carried for logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl MetricUpdate {
    /// A single-step increment.
    pub fn one(profile_id: impl Into<String>, metric: MetricType) -> Self {
        Self {
            profile_id: profile_id.into(),
            metric,
            amount: 1,
            metadata: None,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Deep reflection: a non-blank title and a body of at least
/// [`DEEP_REFLECTION_MIN_CHARS`] characters.
pub fn is_deep_reflection(title: Option<&str>, content: &str) -> bool {
    let has_title = title.is_some_and(|t| !t.trim().is_empty());
    has_title && content.chars().count() >= DEEP_REFLECTION_MIN_CHARS
}

/// Map an event to the metric updates it produces.
pub fn route(event: &DomainEvent) -> Vec<MetricUpdate> {
    match event {
        DomainEvent::ForumInteraction(e) => vec![
            MetricUpdate::one(&e.profile_id, MetricType::ForumInteractions)
                .with_metadata(json!({ "interactionType": e.interaction_type })),
        ],

        DomainEvent::FriendshipAccepted(e) => {
            if e.accepter_id == e.requester_id {
                warn!(
                    profile_id = %e.accepter_id,
                    "Friendship accepted by its own requester, crediting once"
                );
                return vec![MetricUpdate::one(
                    &e.accepter_id,
                    MetricType::FriendConnections,
                )];
            }
            vec![
                MetricUpdate::one(&e.accepter_id, MetricType::FriendConnections)
                    .with_metadata(json!({ "friendId": e.requester_id })),
                MetricUpdate::one(&e.requester_id, MetricType::FriendConnections)
                    .with_metadata(json!({ "friendId": e.accepter_id })),
            ]
        }

        DomainEvent::DiaryEntryCreated(e) => {
            let metadata = json!({ "entryId": e.entry_id });
            let mut updates = vec![
                MetricUpdate::one(&e.profile_id, MetricType::DiaryEntries)
                    .with_metadata(metadata.clone()),
            ];
            if e.qualifies_as_deep_reflection() {
                updates.push(
                    MetricUpdate::one(&e.profile_id, MetricType::DeepReflection)
                        .with_metadata(metadata),
                );
            }
            updates
        }

        DomainEvent::PlanProgressUpdated(e) => match e.progress_type {
            PlanProgressType::Increase => vec![MetricUpdate::one(
                &e.profile_id,
                MetricType::ConsecutivePractices,
            )],
            PlanProgressType::Completion => plan_completion_updates(&e.profile_id),
        },

        DomainEvent::PlanCompleted(e) => plan_completion_updates(&e.profile_id),

        DomainEvent::AiConsultationUsed(e) => {
            vec![MetricUpdate::one(&e.profile_id, MetricType::AiHelpSeeking)]
        }

        DomainEvent::PostLikesMilestone(e) => {
            if e.likes_count < POPULAR_POST_MIN_LIKES {
                debug!(
                    post_id = %e.post_id,
                    likes_count = e.likes_count,
                    "Post below popularity threshold"
                );
                return Vec::new();
            }
            vec![
                MetricUpdate::one(&e.author_id, MetricType::PopularPost).with_metadata(json!({
                    "postId": e.post_id,
                    "likesCount": e.likes_count,
                })),
            ]
        }

        DomainEvent::ChatConversationStarted(e) => match e.conversation_type {
            ConversationType::NewFriend => {
                vec![MetricUpdate::one(&e.profile_id, MetricType::NewConversation)]
            }
            // Counted through ai.consultation.used.
            ConversationType::AiHelp => Vec::new(),
        },
    }
}

fn plan_completion_updates(profile_id: &str) -> Vec<MetricUpdate> {
    vec![
        MetricUpdate::one(profile_id, MetricType::PlanCompletion),
        MetricUpdate::one(profile_id, MetricType::AiPlanCompletion),
    ]
}
