//! Cache module
//!
//! Byte-oriented backends behind a typed service. Values are encoded with
//! MessagePack (named fields, so decoded structs tolerate field reordering).
//! The only backend is an in-memory strict LRU.

mod backend;
mod error;
mod key;
mod lru;
mod memory;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use key::CacheKey;
pub use lru::LruCache;

use memory::InMemoryCache;

/// Typed access to a cache backend
pub struct CacheService {
    name: &'static str,
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("name", &self.name)
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl CacheService {
    /// In-memory cache bounded to `max_entries` (`<= 0` means unbounded)
    pub fn in_memory(name: &'static str, max_entries: i64) -> Self {
        tracing::debug!(cache = name, max_entries, "Initializing in-memory cache");
        Self::with_backend(name, Arc::new(InMemoryCache::new(max_entries)))
    }

    pub fn with_backend(name: &'static str, backend: Arc<dyn CacheBackend>) -> Self {
        Self { name, backend }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    // =========================================================================
    // Typed API (serde)
    // =========================================================================

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.backend.get(key).await? {
            Some(bytes) => {
                let value = rmp_serde::from_slice(&bytes)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let bytes = rmp_serde::to_vec_named(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.backend.set(key, bytes).await
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.delete(key).await
    }

    /// Delete a key, logging instead of propagating failures
    pub async fn invalidate_key(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            tracing::warn!(cache = self.name, key = %key, error = %e, "Cache invalidation failed");
        }
    }

    /// Delete every key under `prefix`, logging instead of propagating failures
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        match self.backend.delete_prefix(prefix).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(
                    cache = self.name,
                    prefix = %prefix,
                    error = %e,
                    "Cache invalidation failed"
                );
                0
            }
        }
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.backend.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
    struct Obj {
        id: String,
        val: serde_json::Value,
    }

    #[tokio::test]
    async fn test_typed_get_set() {
        let service = CacheService::in_memory("test", 10);
        let obj = Obj {
            id: "o1".to_string(),
            val: serde_json::json!({"nested": [1, "two", null]}),
        };

        service.set("k", &obj).await.unwrap();
        let fetched: Option<Obj> = service.get("k").await.unwrap();
        assert_eq!(fetched, Some(obj));
        assert_eq!(service.len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_an_error() {
        let service = CacheService::in_memory("test", 10);
        service.set("k", &"just a string").await.unwrap();
        assert!(matches!(
            service.get::<Obj>("k").await,
            Err(CacheError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let service = CacheService::in_memory("test", 0);
        service.set("v1:a:1", &1).await.unwrap();
        service.set("v1:a:2", &2).await.unwrap();
        service.set("v1:b:1", &3).await.unwrap();

        assert_eq!(service.invalidate_prefix("v1:a:").await, 2);
        assert_eq!(service.get::<i32>("v1:b:1").await.unwrap(), Some(3));
        service.invalidate_key("v1:b:1").await;
        assert!(service.is_empty());
    }

    struct FailingBackend;

    #[async_trait]
    impl CacheBackend for FailingBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Operation("down".into()))
        }
        async fn set(&self, _key: &str, _value: Vec<u8>) -> Result<(), CacheError> {
            Err(CacheError::Operation("down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Operation("down".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
            Err(CacheError::Operation("down".into()))
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Err(CacheError::Operation("down".into()))
        }
        fn len(&self) -> usize {
            0
        }
        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_invalidation_swallows_backend_errors() {
        let service = CacheService::with_backend("test", Arc::new(FailingBackend));
        service.invalidate_key("k").await;
        assert_eq!(service.invalidate_prefix("k").await, 0);
        assert!(service.get::<i32>("k").await.is_err());
    }
}
