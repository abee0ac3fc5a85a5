//! File metadata; content lives in the file storage backend

use duckdb::Connection;

use crate::data::error::DataError;

/// Record file metadata; returns false when the digest was already known
pub fn insert_file(
    conn: &Connection,
    project_id: &str,
    digest: &str,
    name: &str,
    size_bytes: u64,
) -> Result<bool, DataError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO files (project_id, digest, name, size_bytes) VALUES (?, ?, ?, ?)",
        duckdb::params![project_id, digest, name, size_bytes as i64],
    )?;
    Ok(inserted > 0)
}

/// (file count, total bytes) for a project
pub fn files_usage(conn: &Connection, project_id: &str) -> Result<(u64, u64), DataError> {
    let (count, bytes): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0)::BIGINT FROM files WHERE project_id = ?",
        duckdb::params![project_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((count.max(0) as u64, bytes.max(0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::duckdb::migrations::run_migrations;

    #[test]
    fn test_file_metadata() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        assert!(insert_file(&conn, "e/p", "abc", "a.txt", 5).unwrap());
        assert!(!insert_file(&conn, "e/p", "abc", "b.txt", 5).unwrap());
        assert!(insert_file(&conn, "e/p", "def", "c.bin", 7).unwrap());

        assert_eq!(files_usage(&conn, "e/other").unwrap(), (0, 0));
        assert_eq!(files_usage(&conn, "e/p").unwrap(), (2, 12));
        assert_eq!(files_usage(&conn, "e/none").unwrap(), (0, 0));
    }
}
