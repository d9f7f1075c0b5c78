use std::sync::Arc;

use parking_lot::Mutex;

use super::cache_repository::{BoxFuture, CacheRepository};
use super::error::RepositoryResult;
use crate::models::CachedState;

/// In-memory cache repository
/// Useful for testing and development
#[derive(Clone, Default)]
pub struct InMemoryCacheRepository {
    state: Arc<Mutex<Option<CachedState>>>,
}

impl InMemoryCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheRepository for InMemoryCacheRepository {
    fn load(&self) -> BoxFuture<'static, RepositoryResult<Option<CachedState>>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(state.lock().clone()) })
    }

    fn save(&self, new_state: CachedState) -> BoxFuture<'static, RepositoryResult<()>> {
        let state = self.state.clone();
        Box::pin(async move {
            *state.lock() = Some(new_state);
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'static, RepositoryResult<()>> {
        let state = self.state.clone();
        Box::pin(async move {
            *state.lock() = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CACHE_VERSION;

    #[tokio::test]
    async fn test_save_and_load() {
        let repo = InMemoryCacheRepository::new();
        assert!(repo.load().await.unwrap().is_none());

        repo.save(CachedState {
            version: CACHE_VERSION,
            conversations: Vec::new(),
            active_id: None,
        })
        .await
        .unwrap();

        let loaded = repo.load().await.unwrap().unwrap();
        assert_eq!(loaded.version, CACHE_VERSION);

        repo.clear().await.unwrap();
        assert!(repo.load().await.unwrap().is_none());
    }
}
