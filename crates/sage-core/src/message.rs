use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::emotion::EmotionResult;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in a learning conversation. Immutable once written; the user
/// message is always persisted before its paired assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Emotion state inferred from this message (user messages) or active
    /// when it was generated (assistant messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion_snapshot: Option<EmotionResult>,
    /// Pre-computed embedding for semantic retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Provider that generated this message (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Message {
    /// Create a user message.
    pub fn user(session_id: Uuid, user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(session_id, user_id, Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(
        session_id: Uuid,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(session_id, user_id, Role::Assistant, content)
    }

    fn new(
        session_id: Uuid,
        user_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            user_id: user_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            emotion_snapshot: None,
            embedding: None,
            provider: None,
            latency_ms: None,
            token_count: None,
            cost: None,
        }
    }

    /// Estimate token count for this message.
    /// Uses a simple heuristic: ~4 chars per token for English text, plus a
    /// small overhead for role markers.
    pub fn estimate_tokens(&self) -> usize {
        ((self.content.len() + 16) / 4).max(1)
    }
}

/// A learning session. One session owns many messages; message timestamps
/// within a session are monotonic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    pub cumulative_cost: f64,
    pub cumulative_tokens: u64,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            created_at: now,
            last_activity: now,
            message_count: 0,
            cumulative_cost: 0.0,
            cumulative_tokens: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_scales_with_length() {
        let short = Message::user(Uuid::new_v4(), "u1", "hi");
        let long = Message::user(Uuid::new_v4(), "u1", "a".repeat(400));
        assert!(long.estimate_tokens() > short.estimate_tokens());
        assert!(short.estimate_tokens() >= 1);
    }

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }
}
