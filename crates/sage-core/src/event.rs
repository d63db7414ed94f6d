use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ability::AbilityEstimate;
use crate::emotion::EmotionResult;
use crate::error::ErrorCode;
use crate::provider::Category;

/// Why a generation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserCancelled,
    Timeout,
    Shutdown,
    Error,
}

/// One server→client event on a streaming request.
///
/// Every event carries the request's `message_id`, its `session_id` and a
/// server timestamp; the payload discriminates on `type`. For a given
/// `message_id` the protocol guarantees `stream_start` first, then
/// `emotion_update` / `context_info` in completion order, then
/// `content_chunk`s with strictly increasing `chunk_index`, then exactly one
/// terminal event (`stream_complete`, `stream_error` or
/// `generation_stopped`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub message_id: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: StreamPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    StreamStart {
        ai_message_id: Uuid,
        metadata: StreamStartMeta,
    },
    ContextInfo {
        recent_messages_used: usize,
        relevant_messages_used: usize,
    },
    EmotionUpdate {
        emotion: EmotionResult,
    },
    ContentChunk {
        content: String,
        chunk_index: u64,
        is_code: bool,
    },
    StreamComplete {
        ai_message_id: Uuid,
        full_content: String,
        metadata: StreamCompleteMeta,
    },
    StreamError {
        error: WireError,
        partial_content: String,
    },
    GenerationStopped {
        ai_message_id: Uuid,
        reason: StopReason,
        partial_content: String,
        metadata: StoppedMeta,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStartMeta {
    pub provider: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCompleteMeta {
    pub provider_used: String,
    pub response_time_ms: u64,
    pub tokens_used: u32,
    pub cost: f64,
    pub ability_updated: AbilityEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoppedMeta {
    pub tokens_used: u32,
    pub cost: f64,
    pub stopped_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

impl StreamEvent {
    pub fn new(message_id: Uuid, session_id: Uuid, payload: StreamPayload) -> Self {
        Self {
            message_id,
            session_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            StreamPayload::StreamComplete { .. }
                | StreamPayload::StreamError { .. }
                | StreamPayload::GenerationStopped { .. }
        )
    }
}

/// Client→server messages on the bidirectional stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ChatStream {
        message_id: Uuid,
        #[serde(default)]
        session_id: Option<Uuid>,
        user_id: String,
        message: String,
        #[serde(default)]
        context: Option<ChatContext>,
    },
    StopGeneration {
        message_id: Uuid,
        session_id: Uuid,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub enable_reasoning: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_tag_is_snake_case_type() {
        let ev = StreamEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            StreamPayload::ContentChunk {
                content: "hi".into(),
                chunk_index: 0,
                is_code: false,
            },
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "content_chunk");
        assert_eq!(json["chunk_index"], 0);
        assert!(json["message_id"].is_string());
    }

    #[test]
    fn terminal_detection() {
        let ev = StreamEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            StreamPayload::StreamError {
                error: WireError {
                    code: ErrorCode::InternalError,
                    message: "boom".into(),
                    recoverable: false,
                },
                partial_content: String::new(),
            },
        );
        assert!(ev.is_terminal());
    }

    #[test]
    fn client_message_parses_chat_stream() {
        let raw = serde_json::json!({
            "type": "chat_stream",
            "message_id": Uuid::new_v4(),
            "user_id": "u1",
            "message": "Explain photosynthesis",
            "context": {"subject": "biology"}
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMessage::ChatStream { user_id, context, .. } => {
                assert_eq!(user_id, "u1");
                assert_eq!(context.unwrap().subject.as_deref(), Some("biology"));
            }
            _ => panic!("wrong variant"),
        }
    }
}
