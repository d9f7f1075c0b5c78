use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::background::BackgroundQueue;
use crate::api::{ApiClient, ApiError, SyncPushRequest, UpdateTitleRequest};
use crate::models::{ConversationStore, Identity};
use crate::repositories::CacheRepository;

/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// What a sync push did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { pushed: usize },
    NothingToSync,
    /// Another full sync holds the gate; this call was a no-op.
    AlreadyRunning,
}

/// Reconciles the local store with the server: paginated summary pulls,
/// lazy/incremental message loads, single-flighted batch pushes, and
/// write-behind persistence of the local cache.
pub struct SyncService {
    store: Arc<Mutex<ConversationStore>>,
    api: Arc<ApiClient>,
    cache: Arc<dyn CacheRepository>,
    queue: BackgroundQueue,
    /// Process-wide gate: two overlapping full syncs are never allowed.
    sync_gate: Arc<tokio::sync::Mutex<()>>,
}

impl SyncService {
    pub fn new(
        store: Arc<Mutex<ConversationStore>>,
        api: Arc<ApiClient>,
        cache: Arc<dyn CacheRepository>,
        queue: BackgroundQueue,
    ) -> Self {
        Self {
            store,
            api,
            cache,
            queue,
            sync_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Hydrate the store from the local cache on startup. A missing or
    /// version-mismatched cache leaves the store empty.
    pub async fn hydrate_from_cache(&self) -> anyhow::Result<bool> {
        let Some(state) = self.cache.load().await? else {
            return Ok(false);
        };
        let hydrated = self.store.lock().hydrate(state);
        if !hydrated {
            // Stale layout; drop it so the next save starts clean.
            self.cache.clear().await?;
        }
        Ok(hydrated)
    }

    /// Fetch the first page of conversation summaries and merge it in.
    /// Returns how many previously unknown conversations arrived.
    pub async fn load_initial(&self, limit: u32) -> Result<usize, ApiError> {
        self.load_page(limit, false).await
    }

    /// Fetch the next page using the stored cursor. A call without a
    /// pending cursor (or with `has_more == false`) is a no-op.
    pub async fn load_more(&self, limit: u32) -> Result<usize, ApiError> {
        if !self.store.lock().has_more() {
            return Ok(0);
        }
        self.load_page(limit, true).await
    }

    async fn load_page(&self, limit: u32, use_cursor: bool) -> Result<usize, ApiError> {
        let cursor = if use_cursor {
            self.store.lock().next_cursor()
        } else {
            None
        };

        let page = match self.api.list_conversations(limit, cursor.as_ref()).await {
            Ok(page) => page,
            Err(error) => {
                self.store.lock().set_last_error(error.to_string());
                return Err(error);
            }
        };

        let added = {
            let mut store = self.store.lock();
            let added = store.merge_page(page.conversations);
            store.set_page_state(page.meta.has_more, page.meta.next_cursor);
            added
        };
        debug!(added, cursor = ?cursor, "merged conversation page");
        self.persist_cache();
        Ok(added)
    }

    /// Load a conversation's messages: full on first open, incremental
    /// (`since_ts`) afterwards. Duplicate concurrent loads for the same
    /// conversation are deduplicated; returns false when one was already
    /// running or the conversation is unknown.
    pub async fn load_messages(&self, conversation_id: &str) -> Result<bool, ApiError> {
        let since = {
            let mut store = self.store.lock();
            let Some(conversation) = store.get(conversation_id) else {
                return Ok(false);
            };
            let since = (!conversation.messages.is_empty())
                .then(|| conversation.last_message_at)
                .flatten();
            if !store.begin_message_load(conversation_id) {
                debug!(conversation_id, "message load already in flight");
                return Ok(false);
            }
            since
        };

        let result = self.api.load_messages(conversation_id, since).await;

        let mut store = self.store.lock();
        store.end_message_load(conversation_id);
        match result {
            Ok(response) => {
                if let Some(conversation) = store.get_mut(conversation_id) {
                    conversation.merge_messages(response.messages);
                }
                drop(store);
                self.persist_cache();
                Ok(true)
            }
            Err(error) => {
                store.set_last_error(error.to_string());
                Err(error)
            }
        }
    }

    /// Push every locally known owned conversation in one batch call.
    /// Single-flighted: a call while another push runs is a no-op.
    pub async fn sync_all(&self) -> Result<SyncOutcome, ApiError> {
        let Ok(_gate) = self.sync_gate.try_lock() else {
            debug!("sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let conversations = {
            let mut store = self.store.lock();
            let conversations = store.owned_conversations();
            if conversations.is_empty() {
                return Ok(SyncOutcome::NothingToSync);
            }
            store.begin_sync();
            conversations
        };
        let pushed = conversations.len();

        let result = self
            .api
            .push_sync(&SyncPushRequest { conversations })
            .await;

        let mut store = self.store.lock();
        store.end_sync();
        match result {
            Ok(response) => {
                drop(store);
                info!(pushed, sync_time = ?response.sync_time, "sync push completed");
                self.persist_cache();
                Ok(SyncOutcome::Completed { pushed })
            }
            Err(error) => {
                store.set_last_error(error.to_string());
                Err(error)
            }
        }
    }

    /// Sign-in migration: adopt conversations created while anonymous,
    /// switch the identity, then push through the normal sync path.
    pub async fn adopt_and_sync(&self, user_id: &str) -> Result<SyncOutcome, ApiError> {
        let adopted = {
            let mut store = self.store.lock();
            let adopted = store.adopt_anonymous_conversations(user_id);
            store.set_identity(Identity::Authenticated {
                user_id: user_id.to_string(),
            });
            adopted
        };
        info!(count = adopted.len(), "adopted anonymous conversations");
        self.sync_all().await
    }

    /// Remove a conversation locally and, when it is owned, on the
    /// server. Local removal stands even if the server call fails.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        let owned = {
            let mut store = self.store.lock();
            match store.remove(conversation_id) {
                Some(conversation) => conversation.owner_id.is_some(),
                None => return Ok(()),
            }
        };
        self.persist_cache();
        if owned {
            if let Err(error) = self.api.delete_conversation(conversation_id).await {
                self.store.lock().set_last_error(error.to_string());
                return Err(error);
            }
        }
        Ok(())
    }

    /// Remove every conversation belonging to the active identity. Owned
    /// conversations are cleared server-side first.
    pub async fn clear_all(&self) -> Result<u64, ApiError> {
        let owner = self
            .store
            .lock()
            .identity()
            .owner_id()
            .map(str::to_string);

        let mut deleted = 0;
        if owner.is_some() {
            match self.api.clear_all_conversations().await {
                Ok(response) => deleted = response.deleted_count,
                Err(error) => {
                    self.store.lock().set_last_error(error.to_string());
                    return Err(error);
                }
            }
        }

        {
            let mut store = self.store.lock();
            let ids: Vec<String> = store
                .visible_conversations()
                .iter()
                .map(|c| c.id.clone())
                .collect();
            for id in &ids {
                store.remove(id);
            }
            if owner.is_none() {
                deleted = ids.len() as u64;
            }
        }
        self.persist_cache();
        Ok(deleted)
    }

    /// Explicit rename; clears the auto-title flag and updates the server
    /// for owned conversations.
    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<(), ApiError> {
        let owned = {
            let mut store = self.store.lock();
            let Some(conversation) = store.get_mut(conversation_id) else {
                return Ok(());
            };
            conversation.set_title(title.to_string(), false);
            conversation.owner_id.is_some()
        };
        self.persist_cache();
        if owned {
            let request = UpdateTitleRequest {
                id: conversation_id.to_string(),
                title: title.to_string(),
            };
            if let Err(error) = self.api.update_title(&request).await {
                self.store.lock().set_last_error(error.to_string());
                return Err(error);
            }
        }
        Ok(())
    }

    /// Write-behind persistence of the current snapshot; best-effort.
    pub fn persist_cache(&self) {
        let snapshot = self.store.lock().snapshot();
        let cache = self.cache.clone();
        self.queue.enqueue("persist-cache", async move {
            cache.save(snapshot).await?;
            Ok(())
        });
    }
}
