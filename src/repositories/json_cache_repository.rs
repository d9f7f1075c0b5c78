use std::path::PathBuf;

use super::cache_repository::{BoxFuture, CacheRepository};
use super::error::{RepositoryError, RepositoryResult};
use crate::models::CachedState;

/// JSON file-based cache repository.
/// Stores the single cache record at ~/.config/parley/cache.json
pub struct JsonCacheRepository {
    cache_path: PathBuf,
}

impl JsonCacheRepository {
    pub fn new() -> RepositoryResult<Self> {
        let cache_path = dirs::config_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Could not determine config directory".to_string(),
            })?
            .join("parley")
            .join("cache.json");

        Ok(Self { cache_path })
    }

    /// Use an explicit path (tests, alternate profiles).
    pub fn with_path(cache_path: PathBuf) -> Self {
        Self { cache_path }
    }
}

impl CacheRepository for JsonCacheRepository {
    fn load(&self) -> BoxFuture<'static, RepositoryResult<Option<CachedState>>> {
        let path = self.cache_path.clone();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                if !path.exists() {
                    return Ok(None);
                }
                let content = std::fs::read_to_string(&path)?;
                let state: CachedState = serde_json::from_str(&content)?;
                Ok(Some(state))
            })
            .await?
        })
    }

    fn save(&self, state: CachedState) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.cache_path.clone();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }

                let json = serde_json::to_string_pretty(&state)?;

                // Write atomically (temp file, then rename)
                let temp_path = path.with_extension("json.tmp");
                std::fs::write(&temp_path, json)?;
                std::fs::rename(&temp_path, &path)?;

                Ok(())
            })
            .await?
        })
    }

    fn clear(&self) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.cache_path.clone();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
                Ok(())
            })
            .await?
        })
    }
}
