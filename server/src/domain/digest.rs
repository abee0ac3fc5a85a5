//! Content digests
//!
//! Objects and table rows are named by the SHA-256 of their canonical JSON
//! (sorted keys, compact), URL-safe base64 without padding. A table is named
//! by the length-prefixed hash of its ordered row digests, so the same rows in
//! a different order give a different table.

use serde_json::Value as JsonValue;

use crate::utils::crypto::{sha256_b64url, sha256_b64url_parts};
use crate::utils::json::canonical_json;

/// Digest of an object value or table row
pub fn value_digest(value: &JsonValue) -> String {
    sha256_b64url(canonical_json(value))
}

/// Digest of a table from its ordered row digests
pub fn table_digest<S: AsRef<str>>(row_digests: &[S]) -> String {
    sha256_b64url_parts(row_digests.iter().map(|d| d.as_ref().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_digest_ignores_key_order() {
        let a = json!({"b": [1, 2], "a": {"y": 1, "x": 2}});
        let b = json!({"a": {"x": 2, "y": 1}, "b": [1, 2]});
        assert_eq!(value_digest(&a), value_digest(&b));
        assert_ne!(value_digest(&a), value_digest(&json!({"a": 1})));
        assert_eq!(value_digest(&a).len(), 43);
    }

    #[test]
    fn test_table_digest_is_order_sensitive() {
        let rows = [json!({"v": 1}), json!({"v": 2})];
        let forward: Vec<String> = rows.iter().map(value_digest).collect();
        let mut backward = forward.clone();
        backward.reverse();

        assert_eq!(table_digest(&forward), table_digest(&forward.clone()));
        assert_ne!(table_digest(&forward), table_digest(&backward));
        assert_ne!(table_digest(&forward), table_digest::<String>(&[]));
    }
}
