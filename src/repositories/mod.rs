pub mod cache_repository;
pub mod error;
pub mod in_memory_repository;
pub mod json_cache_repository;

pub use cache_repository::{BoxFuture, CacheRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use in_memory_repository::InMemoryCacheRepository;
pub use json_cache_repository::JsonCacheRepository;
