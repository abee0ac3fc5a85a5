//! Type-safe cache key builder with versioning

use serde::Serialize;

use super::error::CacheError;
use crate::core::constants::CACHE_KEY_VERSION;
use crate::utils::crypto::{sha256_b64url, sha256_b64url_parts};
use crate::utils::json::canonical_json;

/// Type-safe cache key builder
///
/// All keys are prefixed with a version (e.g., "v1:") to allow
/// invalidating all cached data on schema changes. User-supplied components
/// are hashed, so separators inside ids never collide.
pub struct CacheKey;

impl CacheKey {
    fn scope(parts: &[&str]) -> String {
        sha256_b64url_parts(parts)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Prefix shared by every cached read of one object
    pub fn obj_read_prefix(project_id: &str, object_id: &str) -> String {
        format!(
            "{}:obj_read:{}:",
            CACHE_KEY_VERSION,
            Self::scope(&[project_id, object_id])
        )
    }

    /// Read of one concrete digest
    pub fn obj_read(
        project_id: &str,
        object_id: &str,
        digest: &str,
        metadata_only: bool,
    ) -> String {
        format!(
            "{}{}:{}",
            Self::obj_read_prefix(project_id, object_id),
            digest,
            if metadata_only { "meta" } else { "full" }
        )
    }

    // =========================================================================
    // Refs
    // =========================================================================

    /// Prefix shared by every cached ref into one object
    pub fn ref_prefix(project_id: &str, object_id: &str) -> String {
        format!(
            "{}:ref:{}:",
            CACHE_KEY_VERSION,
            Self::scope(&[project_id, object_id])
        )
    }

    pub fn ref_read(project_id: &str, object_id: &str, uri: &str) -> String {
        format!(
            "{}{}",
            Self::ref_prefix(project_id, object_id),
            sha256_b64url(uri)
        )
    }

    // =========================================================================
    // Tables and files
    // =========================================================================

    /// `v1:<method>:<sha256 of the canonical JSON request>`
    pub fn request<T: Serialize>(method: &str, req: &T) -> Result<String, CacheError> {
        let value =
            serde_json::to_value(req).map_err(|e| CacheError::Serialization(e.to_string()))?;
        Ok(format!(
            "{}:{}:{}",
            CACHE_KEY_VERSION,
            method,
            sha256_b64url(canonical_json(&value))
        ))
    }

    pub fn file_content(project_id: &str, digest: &str) -> String {
        format!(
            "{}:file_content:{}:{}",
            CACHE_KEY_VERSION,
            Self::scope(&[project_id]),
            digest
        )
    }

    /// Write-dedup key for `file_create`; `content_digest` is the SHA-256 of the bytes
    pub fn file_create(project_id: &str, name: &str, content_digest: &str) -> String {
        format!(
            "{}:file_create:{}",
            CACHE_KEY_VERSION,
            Self::scope(&[project_id, name, content_digest])
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_obj_keys_share_object_prefix() {
        let prefix = CacheKey::obj_read_prefix("e/p", "model");
        assert!(prefix.starts_with("v1:obj_read:"));
        assert!(CacheKey::obj_read("e/p", "model", "d1", false).starts_with(&prefix));
        assert!(!CacheKey::obj_read("e/p", "model2", "d1", false).starts_with(&prefix));
        assert_ne!(
            CacheKey::obj_read("e/p", "model", "d1", true),
            CacheKey::obj_read("e/p", "model", "d1", false)
        );
    }

    #[test]
    fn test_components_do_not_collide() {
        assert_ne!(
            CacheKey::obj_read_prefix("e/p:a", "b"),
            CacheKey::obj_read_prefix("e/p", "a:b")
        );
    }

    #[test]
    fn test_request_key_ignores_key_order() {
        let a = CacheKey::request("table_query", &json!({"digest": "t", "limit": 5})).unwrap();
        let b = CacheKey::request("table_query", &json!({"limit": 5, "digest": "t"})).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("v1:table_query:"));
        let c = CacheKey::request("table_query", &json!({"limit": 6, "digest": "t"})).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_ref_and_file_keys() {
        let uri = "weave:///e/p/object/model:abc";
        let prefix = CacheKey::ref_prefix("e/p", "model");
        assert!(CacheKey::ref_read("e/p", "model", uri).starts_with(&prefix));
        assert!(CacheKey::file_content("e/p", "ff").ends_with(":ff"));
        assert_ne!(
            CacheKey::file_create("e/p", "a.txt", "ff"),
            CacheKey::file_create("e/p", "b.txt", "ff")
        );
    }
}
