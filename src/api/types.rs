use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Conversation, ConversationSummary, Message, MessageRole, PageCursor};

/// One turn of the outbound context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for OutboundMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            timestamp: message.timestamp,
        }
    }
}

/// Chat completion request. `message` alone is the legacy single-turn
/// shape; with context-awareness enabled `messages` carries the selected
/// window plus the new message, sorted by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub messages: Option<Vec<OutboundMessage>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub has_websearch: Option<bool>,
    #[serde(default)]
    pub annotations: Option<serde_json::Value>,
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Inline generated-image payloads, when `contentType` is an image.
    #[serde(default)]
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMessagesRequest {
    pub messages: Vec<Message>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveMessagesResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncPushRequest {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPushResponse {
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    #[serde(default)]
    pub sync_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<PageCursor>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListConversationsResponse {
    pub conversations: Vec<ConversationSummary>,
    pub meta: ListMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearAllResponse {
    pub success: bool,
    #[serde(default)]
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateTitleRequest {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTitleResponse {
    pub session: ConversationSummary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<ConversationSummary>,
    #[serde(default)]
    pub total_matches: u64,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
}

/// One anonymous telemetry event. The session hash is computed
/// client-side, so the raw session id never leaves the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRequest {
    pub session_hash: String,
    pub events: Vec<TelemetryEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistImagesRequest {
    pub session_id: String,
    pub message_id: String,
    /// Inline payloads to upload.
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistedImage {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistImagesResponse {
    pub images: Vec<PersistedImage>,
}

/// Error body shape the server uses for non-2xx responses. Parsed
/// leniently so transport-level failures still classify.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub retry_after: Option<u64>,
    #[serde(default)]
    pub upstream_code: Option<String>,
    #[serde(default)]
    pub upstream_message: Option<String>,
}
