use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::conversation::{Conversation, ConversationSummary};
use super::message::ErrorCode;

/// Bump when the cached layout changes; a mismatched cache is discarded
/// rather than migrated.
pub const CACHE_VERSION: u32 = 3;

/// Who the store currently belongs to. Anonymous sessions keep a local
/// ephemeral id used (hashed) for privacy-preserving telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous { session_id: String },
    Authenticated { user_id: String },
}

impl Identity {
    pub fn anonymous() -> Self {
        Identity::Anonymous {
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Identity::Anonymous { .. } => None,
            Identity::Authenticated { user_id } => Some(user_id),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous { .. })
    }
}

/// The single versioned record written to local storage. Inline image
/// payloads are stripped before it is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedState {
    pub version: u32,
    pub conversations: Vec<Conversation>,
    pub active_id: Option<String>,
}

/// Opaque pagination cursor: last-activity timestamp in unix millis plus
/// the conversation id as tiebreaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub ts: i64,
    pub id: String,
}

/// Session-only error banner scoped to one conversation. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBanner {
    pub message_id: String,
    pub code: ErrorCode,
    pub message: String,
    pub retry_after: Option<u64>,
}

/// In-memory store for all conversations plus the transient UI state
/// around them: selection, in-flight flags, banners, pagination and the
/// server-search overlay.
///
/// All mutation goes through these synchronous reducer-style methods; the
/// store itself is wrapped in a mutex by the services layer.
pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
    active_id: Option<String>,
    identity: Identity,
    banners: HashMap<String, ErrorBanner>,
    send_in_flight: bool,
    is_syncing: bool,
    sync_in_progress: bool,
    loading_messages: HashSet<String>,
    has_more: bool,
    next_cursor: Option<PageCursor>,
    search_results: Option<Vec<ConversationSummary>>,
    last_error: Option<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: HashMap::new(),
            active_id: None,
            identity: Identity::anonymous(),
            banners: HashMap::new(),
            send_in_flight: false,
            is_syncing: false,
            sync_in_progress: false,
            loading_messages: HashSet::new(),
            has_more: false,
            next_cursor: None,
            search_results: None,
            last_error: None,
        }
    }

    // --- identity ---

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = identity;
    }

    /// Re-tag conversations created while anonymous with the new owner.
    /// Returns the ids that were adopted.
    pub fn adopt_anonymous_conversations(&mut self, owner_id: &str) -> Vec<String> {
        let mut adopted = Vec::new();
        for conversation in self.conversations.values_mut() {
            if conversation.owner_id.is_none() {
                conversation.owner_id = Some(owner_id.to_string());
                adopted.push(conversation.id.clone());
            }
        }
        adopted
    }

    // --- conversations ---

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.get_mut(id)
    }

    pub fn upsert(&mut self, conversation: Conversation) {
        let id = conversation.id.clone();
        self.conversations.insert(id.clone(), conversation);
        if self.active_id.is_none() {
            self.active_id = Some(id);
        }
    }

    /// Remove a conversation; the active selection falls back to the most
    /// recently active remaining conversation.
    pub fn remove(&mut self, id: &str) -> Option<Conversation> {
        let removed = self.conversations.remove(id);
        self.banners.remove(id);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self
                .visible_conversations()
                .first()
                .map(|c| c.id.clone());
        }
        removed
    }

    pub fn set_active(&mut self, id: &str) -> bool {
        if self.conversations.contains_key(id) {
            self.active_id = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_id.as_ref().and_then(|id| self.conversations.get(id))
    }

    /// Active conversation, creating an empty one for the current identity
    /// on first use.
    pub fn ensure_active_conversation(&mut self) -> &mut Conversation {
        if self
            .active_id
            .as_ref()
            .is_none_or(|id| !self.conversations.contains_key(id))
        {
            let owner = self.identity.owner_id().map(str::to_string);
            let conversation = Conversation::new(owner);
            self.active_id = Some(conversation.id.clone());
            self.conversations
                .insert(conversation.id.clone(), conversation);
        }
        let id = self.active_id.clone().expect("active id set above");
        self.conversations.get_mut(&id).expect("inserted above")
    }

    /// Conversations matching the current identity, most recent first.
    pub fn visible_conversations(&self) -> Vec<&Conversation> {
        let owner = self.identity.owner_id();
        let mut visible: Vec<&Conversation> = self
            .conversations
            .values()
            .filter(|c| c.owner_id.as_deref() == owner)
            .collect();
        visible.sort_by_key(|c| std::cmp::Reverse(c.last_activity()));
        visible
    }

    /// Owned conversations eligible for a sync push.
    pub fn owned_conversations(&self) -> Vec<Conversation> {
        let Some(owner) = self.identity.owner_id() else {
            return Vec::new();
        };
        self.conversations
            .values()
            .filter(|c| c.owner_id.as_deref() == Some(owner))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.conversations.len()
    }

    /// Merge a page of summaries. Existing conversations keep their local
    /// message bodies; unknown ids are inserted summary-only. The pull is
    /// scoped to the caller, so a summary without an owner tag is
    /// attributed to the active identity. Returns how many ids were new.
    pub fn merge_page(&mut self, page: Vec<ConversationSummary>) -> usize {
        let owner = self.identity.owner_id().map(str::to_string);
        let mut added = 0;
        for summary in page {
            match self.conversations.get_mut(&summary.id) {
                Some(existing) => existing.merge_summary(&summary),
                None => {
                    let mut conversation = Conversation::from_summary(&summary);
                    if conversation.owner_id.is_none() {
                        conversation.owner_id = owner.clone();
                    }
                    self.conversations
                        .insert(summary.id.clone(), conversation);
                    added += 1;
                }
            }
        }
        added
    }

    // --- banners ---

    pub fn set_banner(&mut self, conversation_id: &str, banner: ErrorBanner) {
        self.banners.insert(conversation_id.to_string(), banner);
    }

    pub fn banner(&self, conversation_id: &str) -> Option<&ErrorBanner> {
        self.banners.get(conversation_id)
    }

    pub fn clear_banner(&mut self, conversation_id: &str) {
        self.banners.remove(conversation_id);
    }

    /// Explicit user dismissal: removes the banner and marks the failed
    /// message so it can no longer be retried automatically.
    pub fn dismiss_banner(&mut self, conversation_id: &str) -> bool {
        let Some(banner) = self.banners.remove(conversation_id) else {
            return false;
        };
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.amend_message(&banner.message_id, |message| {
                if let Some(failure) = message.failure_mut() {
                    failure.retry_available = false;
                }
            });
        }
        true
    }

    // --- in-flight guards ---

    /// Claim the single send slot. False means a send is already running
    /// and the caller must no-op.
    pub fn begin_send(&mut self) -> bool {
        if self.send_in_flight {
            debug!("send already in flight, ignoring");
            return false;
        }
        self.send_in_flight = true;
        true
    }

    pub fn end_send(&mut self) {
        self.send_in_flight = false;
    }

    pub fn is_sending(&self) -> bool {
        self.send_in_flight
    }

    pub fn begin_sync(&mut self) {
        self.is_syncing = true;
        self.sync_in_progress = true;
    }

    pub fn end_sync(&mut self) {
        self.is_syncing = false;
        self.sync_in_progress = false;
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing
    }

    /// Claim the message-load slot for one conversation. False means a
    /// load for this id is already running.
    pub fn begin_message_load(&mut self, conversation_id: &str) -> bool {
        self.loading_messages.insert(conversation_id.to_string())
    }

    pub fn end_message_load(&mut self, conversation_id: &str) {
        self.loading_messages.remove(conversation_id);
    }

    // --- pagination ---

    pub fn set_page_state(&mut self, has_more: bool, next_cursor: Option<PageCursor>) {
        self.has_more = has_more;
        self.next_cursor = next_cursor;
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn next_cursor(&self) -> Option<PageCursor> {
        self.next_cursor.clone()
    }

    // --- search overlay ---

    pub fn set_search_results(&mut self, results: Vec<ConversationSummary>) {
        self.search_results = Some(results);
    }

    /// Drop the overlay; the prior conversation list is still in place, so
    /// no re-fetch is needed.
    pub fn clear_search_results(&mut self) {
        self.search_results = None;
    }

    pub fn search_results(&self) -> Option<&[ConversationSummary]> {
        self.search_results.as_deref()
    }

    // --- recoverable store-level error ---

    pub fn set_last_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn take_last_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    // --- local cache ---

    /// Build the versioned cache record, with inline image payloads
    /// stripped. Transient state (banners, flags, search overlay) is not
    /// part of the snapshot.
    pub fn snapshot(&self) -> CachedState {
        let mut conversations: Vec<Conversation> =
            self.conversations.values().cloned().collect();
        for conversation in &mut conversations {
            conversation.strip_inline_images();
        }
        conversations.sort_by_key(|c| std::cmp::Reverse(c.last_activity()));
        CachedState {
            version: CACHE_VERSION,
            conversations,
            active_id: self.active_id.clone(),
        }
    }

    /// Replace store contents from a cache record. A version mismatch
    /// invalidates the cache and leaves the store empty.
    pub fn hydrate(&mut self, state: CachedState) -> bool {
        if state.version != CACHE_VERSION {
            debug!(
                found = state.version,
                expected = CACHE_VERSION,
                "discarding cache with mismatched version"
            );
            return false;
        }
        self.conversations = state
            .conversations
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        self.active_id = state
            .active_id
            .filter(|id| self.conversations.contains_key(id));
        true
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{DeliveryState, GeneratedImage, Message, SendFailure};

    fn failed_user_message() -> Message {
        let mut message = Message::user("did not make it");
        message.delivery = DeliveryState::Failed(SendFailure {
            code: ErrorCode::Network,
            message: "connection reset".to_string(),
            retry_after: None,
            upstream_code: None,
            upstream_message: None,
            retry_available: true,
        });
        message
    }

    #[test]
    fn test_ensure_active_creates_one_conversation() {
        let mut store = ConversationStore::new();
        let id = store.ensure_active_conversation().id.clone();
        let again = store.ensure_active_conversation().id.clone();
        assert_eq!(id, again);
        assert_eq!(store.count(), 1);
        assert_eq!(store.active_id(), Some(id.as_str()));
    }

    #[test]
    fn test_identity_filtering() {
        let mut store = ConversationStore::new();
        store.upsert(Conversation::new(None));
        store.upsert(Conversation::new(Some("user-1".to_string())));

        assert_eq!(store.visible_conversations().len(), 1);

        store.set_identity(Identity::Authenticated {
            user_id: "user-1".to_string(),
        });
        let visible = store.visible_conversations();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].owner_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_adopt_anonymous_conversations() {
        let mut store = ConversationStore::new();
        store.upsert(Conversation::new(None));
        store.upsert(Conversation::new(Some("someone-else".to_string())));

        let adopted = store.adopt_anonymous_conversations("user-1");
        assert_eq!(adopted.len(), 1);

        store.set_identity(Identity::Authenticated {
            user_id: "user-1".to_string(),
        });
        assert_eq!(store.visible_conversations().len(), 1);
    }

    #[test]
    fn test_merge_page_attributes_untagged_summaries_to_identity() {
        let mut store = ConversationStore::new();
        store.set_identity(Identity::Authenticated {
            user_id: "user-1".to_string(),
        });

        let mut summary = Conversation::new(None).summary();
        summary.owner_id = None;
        assert_eq!(store.merge_page(vec![summary]), 1);

        // the pull is caller-scoped, so the row belongs to the caller
        assert_eq!(store.visible_conversations().len(), 1);
        assert_eq!(store.owned_conversations().len(), 1);
    }

    #[test]
    fn test_dismiss_banner_disables_retry() {
        let mut store = ConversationStore::new();
        let mut conversation = Conversation::new(None);
        let message = failed_user_message();
        let message_id = message.id.clone();
        conversation.push_message(message);
        let conversation_id = conversation.id.clone();
        store.upsert(conversation);
        store.set_banner(
            &conversation_id,
            ErrorBanner {
                message_id: message_id.clone(),
                code: ErrorCode::Network,
                message: "connection reset".to_string(),
                retry_after: None,
            },
        );

        assert!(store.dismiss_banner(&conversation_id));
        assert!(store.banner(&conversation_id).is_none());

        let message = store.get(&conversation_id).unwrap().find_message(&message_id).unwrap();
        assert!(!message.failure().unwrap().retry_available);
    }

    #[test]
    fn test_send_guard_is_single_flight() {
        let mut store = ConversationStore::new();
        assert!(store.begin_send());
        assert!(!store.begin_send());
        store.end_send();
        assert!(store.begin_send());
    }

    #[test]
    fn test_message_load_dedup() {
        let mut store = ConversationStore::new();
        assert!(store.begin_message_load("c1"));
        assert!(!store.begin_message_load("c1"));
        assert!(store.begin_message_load("c2"));
        store.end_message_load("c1");
        assert!(store.begin_message_load("c1"));
    }

    #[test]
    fn test_snapshot_strips_inline_images() {
        let mut store = ConversationStore::new();
        let mut conversation = Conversation::new(None);
        let mut message = Message::assistant("with image");
        message.images.push(GeneratedImage {
            id: "img-1".to_string(),
            data: Some("base64payload".to_string()),
            url: Some("https://cdn.example/img-1".to_string()),
        });
        conversation.push_message(message);
        store.upsert(conversation);

        let snapshot = store.snapshot();
        let image = &snapshot.conversations[0].messages[0].images[0];
        assert!(image.data.is_none());
        assert_eq!(image.url.as_deref(), Some("https://cdn.example/img-1"));

        // the live store still has the payload
        let live = store.visible_conversations()[0];
        assert!(live.messages[0].images[0].data.is_some());
    }

    #[test]
    fn test_hydrate_rejects_version_mismatch() {
        let mut store = ConversationStore::new();
        let state = CachedState {
            version: CACHE_VERSION - 1,
            conversations: vec![Conversation::new(None)],
            active_id: None,
        };
        assert!(!store.hydrate(state));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_hydrate_round_trip() {
        let mut store = ConversationStore::new();
        let conversation = Conversation::new(None);
        let id = conversation.id.clone();
        store.upsert(conversation);

        let snapshot = store.snapshot();
        let mut restored = ConversationStore::new();
        assert!(restored.hydrate(snapshot));
        assert_eq!(restored.count(), 1);
        assert_eq!(restored.active_id(), Some(id.as_str()));
    }
}
