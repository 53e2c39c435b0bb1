use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in a conversation.
///
/// `streaming_complete` is deliberately tri-state: `None` for messages loaded
/// from history (never were streaming), `Some(false)` while the assistant is
/// still generating, `Some(true)` once the content is final.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Base64 encoded images, order-significant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(
        rename = "streamingComplete",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub streaming_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_cancelled: Option<bool>,
}

impl Message {
    pub fn user(content: String, images: Option<Vec<String>>) -> Self {
        Self {
            role: Role::User,
            content,
            id: Some(format!("user-{}", Uuid::new_v4())),
            model: None,
            session_id: None,
            images,
            streaming_complete: None,
            is_cancelled: None,
        }
    }

    /// A fresh in-flight assistant message with a provider-tagged temporary
    /// id. The id may be swapped for the server-issued one at finalize.
    pub fn assistant_streaming(model: &str, session_id: Option<&str>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            id: Some(format!("assistant-{}", Uuid::new_v4())),
            model: Some(model.to_string()),
            session_id: session_id.map(str::to_string),
            images: None,
            streaming_complete: Some(false),
            is_cancelled: None,
        }
    }

    pub fn error(content: String) -> Self {
        Self {
            role: Role::Assistant,
            content,
            id: Some(format!("error-{}", Uuid::new_v4())),
            model: None,
            session_id: None,
            images: None,
            streaming_complete: Some(true),
            is_cancelled: None,
        }
    }

    pub fn cancelled(content: String) -> Self {
        Self {
            role: Role::Assistant,
            content,
            id: Some(format!("cancelled-{}", Uuid::new_v4())),
            model: None,
            session_id: None,
            images: None,
            streaming_complete: Some(true),
            is_cancelled: Some(true),
        }
    }

    /// Only actively streaming messages are mutable targets.
    pub fn is_streaming(&self) -> bool {
        self.streaming_complete == Some(false)
    }
}

/// Server-side session summary as returned by the sessions/search endpoints.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ChatSession {
    pub session_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Deserialize, Clone, PartialEq, Debug)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize, Clone, PartialEq, Debug)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub created_at: String,
    #[serde(default)]
    pub session_count: u32,
    #[serde(default)]
    pub message_count: u32,
}

#[derive(Deserialize, Clone, PartialEq, Debug)]
pub struct UserFile {
    pub message_id: i64,
    pub session_id: String,
    pub filename: String,
    pub images: Vec<String>,
    pub created_at: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// A file attached to an outgoing message.
#[derive(Clone, PartialEq, Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub images: Vec<String>,
}

// API DTOs

#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub user_id: i64,
    pub message: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

#[derive(Deserialize, Debug)]
pub struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub session_model: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct SessionsResponse {
    #[serde(default)]
    pub sessions: Vec<ChatSession>,
}

#[derive(Deserialize, Debug)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<ChatSession>,
}

#[derive(Deserialize, Debug)]
pub struct ModelsResponse {
    #[serde(default)]
    pub models: Vec<Model>,
}

#[derive(Deserialize, Debug)]
pub struct UsersResponse {
    #[serde(default)]
    pub users: Vec<UserInfo>,
}

#[derive(Deserialize, Debug)]
pub struct FilesResponse {
    #[serde(default)]
    pub files: Vec<UserFile>,
}

// Debate DTOs

#[derive(Deserialize, Clone, PartialEq, Debug)]
pub struct DebateSession {
    pub id: i64,
    pub title: String,
    pub topic: String,
    pub status: String,
    #[serde(default)]
    pub participants: Vec<DebateParticipant>,
    #[serde(default)]
    pub config: Option<DebateConfig>,
}

#[derive(Deserialize, Clone, PartialEq, Debug)]
pub struct DebateParticipant {
    pub id: i64,
    pub model_name: String,
    #[serde(default)]
    pub position: Option<String>,
    pub participant_order: u32,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct DebateConfig {
    #[serde(default)]
    pub max_rounds: Option<u32>,
}

#[derive(Deserialize, Clone, PartialEq, Debug)]
pub struct DebateMessage {
    /// `None` for the temporary local message shown while a turn streams.
    #[serde(default)]
    pub id: Option<i64>,
    pub debate_session_id: i64,
    pub participant_id: i64,
    pub content: String,
    pub round_number: u32,
    pub turn_number: u32,
    #[serde(default)]
    pub message_type: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct DebateMessagesResponse {
    #[serde(default)]
    pub messages: Vec<DebateMessage>,
}

#[derive(Serialize, Debug)]
pub struct DebateCreateRequest {
    pub topic: String,
    /// Model names, one per participant, in speaking order.
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
}

#[derive(Serialize, Debug)]
pub struct DebateTurnRequest {
    pub debate_session_id: i64,
    pub participant_id: i64,
    pub round_number: u32,
    pub turn_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderator_prompt: Option<String>,
}
