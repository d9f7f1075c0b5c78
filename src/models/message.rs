use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Error taxonomy for failed sends.
///
/// `Network` and `Unknown` are client-classified; every other code is
/// server-supplied and passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    Network,
    Unknown,
    Server(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::Network => "network_error",
            ErrorCode::Unknown => "unknown_error",
            ErrorCode::Server(code) => code,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "network_error" => ErrorCode::Network,
            "unknown_error" => ErrorCode::Unknown,
            _ => ErrorCode::Server(code),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

/// Failure detail attached to a user message whose paired request failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendFailure {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub upstream_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub upstream_message: Option<String>,
    /// Cleared when the user dismisses the error banner; a dismissed
    /// failure must never be retried automatically.
    pub retry_available: bool,
}

/// Delivery status of a message, reconciled on server response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DeliveryState {
    /// Optimistically inserted, awaiting the server round trip.
    Pending,
    Confirmed,
    Failed(SendFailure),
}

impl Default for DeliveryState {
    fn default() -> Self {
        DeliveryState::Confirmed
    }
}

/// A generated image attached to an assistant message.
///
/// `data` holds the inline payload and is only ever kept in memory; the
/// local cache stores the durable `url` reference instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
}

impl GeneratedImage {
    pub fn inline(data: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data: Some(data),
            url: None,
        }
    }

    /// True while the image only exists as an in-memory payload.
    pub fn is_transient(&self) -> bool {
        self.data.is_some() && self.url.is_none()
    }

    /// Drop the inline payload, keeping the durable reference if any.
    pub fn strip_inline_data(&mut self) {
        self.data = None;
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub original_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_tokens: Option<u32>,
    /// Server correlation id of the request this message triggered.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub delivery: DeliveryState,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub attachment_ids: Vec<String>,
    /// Web-search citation annotations, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub annotations: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub images: Vec<GeneratedImage>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            model: None,
            original_model: None,
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            request_id: None,
            delivery: DeliveryState::Confirmed,
            attachment_ids: Vec::new(),
            annotations: None,
            reasoning: None,
            images: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.original_model = Some(model.clone());
        self.model = Some(model);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.delivery, DeliveryState::Failed(_))
    }

    pub fn failure(&self) -> Option<&SendFailure> {
        match &self.delivery {
            DeliveryState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn failure_mut(&mut self) -> Option<&mut SendFailure> {
        match &mut self.delivery {
            DeliveryState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// True when any attached image still holds an in-memory payload.
    pub fn has_transient_images(&self) -> bool {
        self.images.iter().any(GeneratedImage::is_transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        let codes = [
            ErrorCode::Network,
            ErrorCode::Unknown,
            ErrorCode::Server("rate_limit_exceeded".to_string()),
        ];

        for code in codes {
            let json = serde_json::to_string(&code).unwrap();
            let back: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(code, back);
        }

        let parsed: ErrorCode = serde_json::from_str("\"network_error\"").unwrap();
        assert_eq!(parsed, ErrorCode::Network);
    }

    #[test]
    fn test_delivery_defaults_to_confirmed() {
        // Messages loaded from the server carry no delivery field.
        let json = r#"{
            "id": "m1",
            "role": "user",
            "content": "hello",
            "timestamp": "2026-01-01T00:00:00Z"
        }"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn test_transient_image_detection() {
        let mut message = Message::assistant("here you go");
        message.images.push(GeneratedImage::inline("aGVsbG8=".to_string()));
        assert!(message.has_transient_images());

        message.images[0].url = Some("https://cdn.example/img/1".to_string());
        message.images[0].strip_inline_data();
        assert!(!message.has_transient_images());
        assert_eq!(
            message.images[0].url.as_deref(),
            Some("https://cdn.example/img/1")
        );
    }
}
