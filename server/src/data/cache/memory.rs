//! In-memory cache backend over a strict LRU

use async_trait::async_trait;

use super::backend::CacheBackend;
use super::error::CacheError;
use super::lru::LruCache;

pub struct InMemoryCache {
    entries: LruCache<String, Vec<u8>>,
}

impl InMemoryCache {
    /// `max_entries <= 0` keeps everything
    pub fn new(max_entries: i64) -> Self {
        Self {
            entries: LruCache::new(max_entries),
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.entries.put(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        Ok(self.entries.retain(|k, _| !k.starts_with(prefix)) as u64)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = InMemoryCache::new(10);
        cache.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = InMemoryCache::new(10);
        cache.set("k", b"v".to_vec()).await.unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let cache = InMemoryCache::new(10);
        cache.set("v1:obj:a:1", vec![1]).await.unwrap();
        cache.set("v1:obj:a:2", vec![2]).await.unwrap();
        cache.set("v1:obj:b:1", vec![3]).await.unwrap();

        assert_eq!(cache.delete_prefix("v1:obj:a:").await.unwrap(), 2);
        assert_eq!(cache.len(), 1);
        cache.clear().await.unwrap();
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_bounded() {
        let cache = InMemoryCache::new(2);
        for i in 0..5 {
            cache.set(&format!("k{}", i), vec![i]).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("k4").await.unwrap(), Some(vec![4]));
    }
}
