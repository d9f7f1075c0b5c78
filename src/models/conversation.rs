use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{Message, MessageRole};

/// Placeholder title until the first successful exchange derives one.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Preview length cached on the conversation for list rendering.
const PREVIEW_CHARS: usize = 80;

/// Inline image payload budget. Oldest payloads are dropped first once a
/// message or conversation exceeds its cap; this bounds memory only, the
/// durable `url` references are untouched.
pub const MAX_INLINE_IMAGES_PER_MESSAGE: usize = 4;
pub const MAX_INLINE_IMAGES_PER_CONVERSATION: usize = 12;

/// Summary-level view of a conversation, as returned by the paginated
/// listing and search endpoints (no message bodies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_message_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// A single conversation and its derived summary fields.
///
/// The derived fields (`message_count`, `total_tokens`, `last_model`,
/// `last_message_preview`, `last_message_at`) are always a pure function
/// of `messages`; every mutator recomputes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// True while the title is auto-derived rather than user-set.
    #[serde(default)]
    pub title_is_auto: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_message_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Create a new empty conversation with the placeholder title.
    pub fn new(owner_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            title_is_auto: false,
            owner_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            message_count: 0,
            total_tokens: 0,
            last_model: None,
            last_message_preview: None,
            last_message_at: None,
        }
    }

    /// Build a message-less conversation from a server summary.
    pub fn from_summary(summary: &ConversationSummary) -> Self {
        Self {
            id: summary.id.clone(),
            title: summary.title.clone(),
            title_is_auto: false,
            owner_id: summary.owner_id.clone(),
            messages: Vec::new(),
            created_at: summary.created_at,
            updated_at: summary.updated_at,
            message_count: summary.message_count,
            total_tokens: summary.total_tokens,
            last_model: summary.last_model.clone(),
            last_message_preview: summary.last_message_preview.clone(),
            last_message_at: summary.last_message_at,
        }
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.message_count,
            total_tokens: self.total_tokens,
            last_model: self.last_model.clone(),
            last_message_preview: self.last_message_preview.clone(),
            last_message_at: self.last_message_at,
        }
    }

    /// Append a message and refresh derived fields.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn find_message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Mutate a message in place, then refresh derived fields.
    /// Returns false when the id is unknown.
    pub fn amend_message(&mut self, id: &str, amend: impl FnOnce(&mut Message)) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        amend(message);
        self.touch();
        true
    }

    /// Most recent failed user message, if any.
    pub fn last_failed_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_user() && m.is_failed())
    }

    pub fn set_title(&mut self, title: String, auto: bool) {
        self.title = title;
        self.title_is_auto = auto;
        self.updated_at = Utc::now();
    }

    /// Merge a server summary without clobbering local message bodies.
    ///
    /// Last-write-wins on summary fields; the derived fields are only
    /// adopted from the summary when no local messages are cached,
    /// otherwise they stay the pure recomputation of local state.
    pub fn merge_summary(&mut self, summary: &ConversationSummary) {
        if summary.updated_at >= self.updated_at {
            // A rename elsewhere ends the auto-title phase; an unchanged
            // title keeps it.
            if summary.title != self.title {
                self.title = summary.title.clone();
                self.title_is_auto = false;
            }
            // Summaries are not required to carry the owner tag; never
            // un-own a conversation over a missing field.
            if summary.owner_id.is_some() {
                self.owner_id = summary.owner_id.clone();
            }
            self.updated_at = summary.updated_at;
            if self.messages.is_empty() {
                self.message_count = summary.message_count;
                self.total_tokens = summary.total_tokens;
                self.last_model = summary.last_model.clone();
                self.last_message_preview = summary.last_message_preview.clone();
                self.last_message_at = summary.last_message_at;
            }
        }
        if !self.messages.is_empty() {
            self.recompute_derived();
        }
    }

    /// Additively merge server messages: append any not already present by
    /// id, then restore chronological order. Never discards an in-flight
    /// optimistic message the server has not echoed yet.
    pub fn merge_messages(&mut self, incoming: Vec<Message>) {
        for message in incoming {
            if self.find_message(&message.id).is_none() {
                self.messages.push(message);
            }
        }
        self.sort_messages();
        self.recompute_derived();
    }

    /// Chronological order by timestamp, id as the tiebreaker.
    pub fn sort_messages(&mut self) {
        self.messages
            .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
    }

    /// Recompute every derived field from `messages`.
    pub fn recompute_derived(&mut self) {
        self.message_count = self.messages.len();
        self.total_tokens = self
            .messages
            .iter()
            .filter_map(|m| m.total_tokens)
            .map(u64::from)
            .sum();
        self.last_model = self
            .messages
            .iter()
            .rev()
            .find_map(|m| m.model.clone());
        self.last_message_preview = self.messages.last().map(|m| preview_of(&m.content));
        self.last_message_at = self.messages.last().map(|m| m.timestamp);
    }

    /// Enforce the inline image payload budget, dropping oldest payloads
    /// first. Durable url references survive.
    pub fn enforce_image_budget(&mut self) {
        for message in &mut self.messages {
            let inline: Vec<usize> = message
                .images
                .iter()
                .enumerate()
                .filter(|(_, img)| img.data.is_some())
                .map(|(i, _)| i)
                .collect();
            if inline.len() > MAX_INLINE_IMAGES_PER_MESSAGE {
                let excess = inline.len() - MAX_INLINE_IMAGES_PER_MESSAGE;
                for &i in inline.iter().take(excess) {
                    message.images[i].strip_inline_data();
                }
            }
        }

        let total_inline: usize = self
            .messages
            .iter()
            .map(|m| m.images.iter().filter(|img| img.data.is_some()).count())
            .sum();
        if total_inline > MAX_INLINE_IMAGES_PER_CONVERSATION {
            let mut to_drop = total_inline - MAX_INLINE_IMAGES_PER_CONVERSATION;
            'outer: for message in &mut self.messages {
                for image in &mut message.images {
                    if to_drop == 0 {
                        break 'outer;
                    }
                    if image.data.is_some() {
                        image.strip_inline_data();
                        to_drop -= 1;
                    }
                }
            }
        }
    }

    /// Strip every inline image payload; used before writing the local
    /// cache, which never stores inline image data.
    pub fn strip_inline_images(&mut self) {
        for message in &mut self.messages {
            for image in &mut message.images {
                image.strip_inline_data();
            }
        }
    }

    /// First user message, the source for auto-titling.
    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == MessageRole::User)
    }

    /// Activity timestamp used for list ordering.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.updated_at)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.recompute_derived();
    }
}

fn preview_of(content: &str) -> String {
    let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::GeneratedImage;

    fn conversation_with(messages: Vec<Message>) -> Conversation {
        let mut conversation = Conversation::new(None);
        for message in messages {
            conversation.push_message(message);
        }
        conversation
    }

    #[test]
    fn test_derived_fields_match_pure_recomputation() {
        let mut user = Message::user("hello there").with_model("model-x");
        user.total_tokens = Some(10);
        let mut assistant = Message::assistant("hi!").with_model("model-y");
        assistant.total_tokens = Some(7);

        let mut conversation = conversation_with(vec![user, assistant]);

        let before = conversation.clone();
        conversation.recompute_derived();
        assert_eq!(before, conversation);

        assert_eq!(conversation.message_count, 2);
        assert_eq!(conversation.total_tokens, 17);
        assert_eq!(conversation.last_model.as_deref(), Some("model-y"));
        assert_eq!(conversation.last_message_preview.as_deref(), Some("hi!"));
    }

    #[test]
    fn test_merge_summary_keeps_local_messages() {
        let mut conversation =
            conversation_with(vec![Message::user("hello"), Message::assistant("hi")]);

        let summary = ConversationSummary {
            id: conversation.id.clone(),
            title: "Renamed on another device".to_string(),
            owner_id: Some("user-1".to_string()),
            created_at: conversation.created_at,
            updated_at: Utc::now() + chrono::Duration::seconds(60),
            message_count: 0,
            total_tokens: 0,
            last_model: None,
            last_message_preview: None,
            last_message_at: None,
        };

        conversation.merge_summary(&summary);

        assert_eq!(conversation.title, "Renamed on another device");
        // local message bodies survive a stripped summary
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.message_count, 2);
    }

    #[test]
    fn test_merge_summary_keeps_local_owner_when_summary_has_none() {
        let mut conversation = Conversation::new(Some("user-1".to_string()));
        let summary = ConversationSummary {
            owner_id: None,
            updated_at: conversation.updated_at + chrono::Duration::seconds(60),
            ..conversation.summary()
        };

        conversation.merge_summary(&summary);
        assert_eq!(conversation.owner_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_merge_summary_keeps_auto_flag_for_unchanged_title() {
        let mut conversation = Conversation::new(None);
        conversation.set_title("Hello".to_string(), true);

        let unchanged = ConversationSummary {
            updated_at: conversation.updated_at + chrono::Duration::seconds(60),
            ..conversation.summary()
        };
        conversation.merge_summary(&unchanged);
        assert!(conversation.title_is_auto);

        let renamed = ConversationSummary {
            title: "Renamed".to_string(),
            updated_at: conversation.updated_at + chrono::Duration::seconds(120),
            ..conversation.summary()
        };
        conversation.merge_summary(&renamed);
        assert_eq!(conversation.title, "Renamed");
        assert!(!conversation.title_is_auto);
    }

    #[test]
    fn test_merge_summary_ignores_stale_update() {
        let mut conversation = conversation_with(vec![Message::user("hello")]);
        let stale = ConversationSummary {
            title: "Old title".to_string(),
            updated_at: conversation.updated_at - chrono::Duration::hours(1),
            ..conversation.summary()
        };

        conversation.merge_summary(&stale);
        assert_ne!(conversation.title, "Old title");
    }

    #[test]
    fn test_merge_messages_is_additive_and_sorted() {
        let t0 = Utc::now();
        let local = Message::user("local optimistic").with_timestamp(t0 + chrono::Duration::seconds(30));
        let local_id = local.id.clone();
        let mut conversation = conversation_with(vec![local]);

        let older = Message::user("from server").with_timestamp(t0);
        let duplicate = Message {
            content: "server echo of local".to_string(),
            ..conversation.messages[0].clone()
        };

        conversation.merge_messages(vec![older, duplicate]);

        assert_eq!(conversation.messages.len(), 2);
        // duplicate by id was dropped, local body kept
        let kept = conversation.find_message(&local_id).unwrap();
        assert_eq!(kept.content, "local optimistic");
        // chronological order restored
        assert_eq!(conversation.messages[0].content, "from server");
    }

    #[test]
    fn test_image_budget_truncates_oldest_first() {
        let mut conversation = Conversation::new(None);
        for _ in 0..4 {
            let mut message = Message::assistant("image reply");
            for _ in 0..4 {
                message.images.push(GeneratedImage::inline("data".to_string()));
            }
            conversation.push_message(message);
        }
        // 16 inline payloads, budget is 12
        conversation.enforce_image_budget();

        let inline_per_message: Vec<usize> = conversation
            .messages
            .iter()
            .map(|m| m.images.iter().filter(|i| i.data.is_some()).count())
            .collect();
        assert_eq!(inline_per_message.iter().sum::<usize>(), 12);
        // the oldest message lost all payloads first
        assert_eq!(inline_per_message[0], 0);
        assert_eq!(inline_per_message[3], 4);
        // image entries themselves survive
        assert!(conversation.messages.iter().all(|m| m.images.len() == 4));
    }
}
