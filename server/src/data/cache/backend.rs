//! Cache backend trait definition

use async_trait::async_trait;

use super::error::CacheError;

/// Byte-oriented cache backend
///
/// Values are opaque; typing and encoding happen in `CacheService`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    /// Returns `true` if the key was present
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Drop every key starting with `prefix`; returns how many were dropped
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
