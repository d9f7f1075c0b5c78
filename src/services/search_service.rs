use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::api::{ApiClient, ApiError};
use crate::models::{ConversationStore, ConversationSummary};

/// Where a local match was found; lower ranks sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    Title,
    Preview,
    Content,
}

/// Dual-mode search over conversations: a client-side substring filter
/// over the cached store, or a server full-text query whose results
/// overlay the conversation list until cleared.
pub struct SearchService {
    store: Arc<Mutex<ConversationStore>>,
    api: Arc<ApiClient>,
}

impl SearchService {
    pub fn new(store: Arc<Mutex<ConversationStore>>, api: Arc<ApiClient>) -> Self {
        Self { store, api }
    }

    /// Case-insensitive substring search over title, cached preview and
    /// any already-loaded message content. Title matches rank above
    /// preview matches, which rank above content matches; ties break by
    /// recency.
    pub fn search_local(&self, query: &str) -> Vec<ConversationSummary> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let store = self.store.lock();
        let mut hits: Vec<(MatchRank, ConversationSummary)> = store
            .visible_conversations()
            .into_iter()
            .filter_map(|conversation| {
                let rank = if conversation.title.to_lowercase().contains(&needle) {
                    MatchRank::Title
                } else if conversation
                    .last_message_preview
                    .as_ref()
                    .is_some_and(|p| p.to_lowercase().contains(&needle))
                {
                    MatchRank::Preview
                } else if conversation
                    .messages
                    .iter()
                    .any(|m| m.content.to_lowercase().contains(&needle))
                {
                    MatchRank::Content
                } else {
                    return None;
                };
                Some((rank, conversation.summary()))
            })
            .collect();

        hits.sort_by(|(rank_a, a), (rank_b, b)| {
            rank_a
                .cmp(rank_b)
                .then(b.updated_at.cmp(&a.updated_at))
        });
        hits.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Delegate to the server full-text query and install the results as
    /// the store's search overlay. Returns the number of hits.
    pub async fn search_server(&self, query: &str, limit: u32) -> Result<usize, ApiError> {
        let response = self.api.search(query, limit).await?;
        debug!(
            hits = response.results.len(),
            total = response.total_matches,
            elapsed_ms = ?response.execution_time_ms,
            "server search completed"
        );
        let count = response.results.len();
        self.store.lock().set_search_results(response.results);
        Ok(count)
    }

    /// Drop the overlay; the prior conversation list reappears without a
    /// re-fetch.
    pub fn clear(&self) {
        self.store.lock().clear_search_results();
    }
}
