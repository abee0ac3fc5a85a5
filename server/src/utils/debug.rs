//! Debug-mode capture of raw inbound events as JSON lines

use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Serializes appends so concurrent connections never interleave lines
static APPEND_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

#[derive(Serialize)]
struct DebugLine<'a, T: Serialize> {
    timestamp: String,
    project_id: &'a str,
    data: &'a T,
}

/// Append one `{timestamp, project_id, data}` line to `file_path`
///
/// Failures are logged and swallowed; capture never fails the event itself.
pub async fn append_debug_line<T: Serialize>(file_path: &Path, project_id: &str, data: &T) {
    let line = DebugLine {
        timestamp: Utc::now().to_rfc3339(),
        project_id,
        data,
    };
    let mut bytes = match serde_json::to_vec(&line) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize debug line");
            return;
        }
    };
    bytes.push(b'\n');

    let _guard = APPEND_LOCK.lock().await;
    let result = async {
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(error = %e, path = %file_path.display(), "Failed to write debug line");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lines_are_appended() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("debug").join("events.jsonl");

        append_debug_line(&path, "e/p", &json!({"n": 1})).await;
        append_debug_line(&path, "e/q", &json!({"n": 2})).await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["project_id"], "e/p");
        assert_eq!(lines[0]["data"], json!({"n": 1}));
        assert_eq!(lines[1]["project_id"], "e/q");
        assert!(lines[1]["timestamp"].is_string());
    }
}
