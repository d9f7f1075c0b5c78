use std::future::Future;
use std::pin::Pin;

use super::error::RepositoryResult;
use crate::models::CachedState;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Repository trait for the local write-behind cache.
///
/// The engine persists a single versioned record: the conversation list
/// (inline image payloads stripped) plus the selected conversation id.
pub trait CacheRepository: Send + Sync + 'static {
    /// Load the cache record, `None` when no cache exists yet.
    fn load(&self) -> BoxFuture<'static, RepositoryResult<Option<CachedState>>>;

    /// Replace the cache record.
    fn save(&self, state: CachedState) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Remove the cache record entirely.
    fn clear(&self) -> BoxFuture<'static, RepositoryResult<()>>;
}
