//! Schema bootstrap and incremental migrations
//!
//! A fresh database gets the full `SCHEMA` at `SCHEMA_VERSION`. Existing
//! databases step through `MIGRATIONS` one version at a time; each step runs
//! in its own transaction and bumps `schema_version`.

use duckdb::Connection;

use super::error::DuckdbError;
use super::in_transaction;
use super::schema::{SCHEMA, SCHEMA_VERSION};
use crate::utils::crypto::sha256_hex;

/// An incremental schema change from `version - 1` to `version`
struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

/// Steps past the initial schema; empty until the layout changes
const MIGRATIONS: &[Migration] = &[];

/// Initialize database schema or run pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DuckdbError> {
    let initialized: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM information_schema.tables WHERE table_name = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false);

    if !initialized {
        return bootstrap(conn);
    }

    let current: i32 = conn
        .query_row(
            "SELECT version FROM schema_version WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current > SCHEMA_VERSION {
        return Err(DuckdbError::MigrationFailed {
            version: current,
            name: "version_check".to_string(),
            error: format!(
                "database schema version {} is newer than this binary ({}); upgrade stitch",
                current, SCHEMA_VERSION
            ),
        });
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        let migration = MIGRATIONS
            .iter()
            .find(|m| m.version == version)
            .ok_or_else(|| DuckdbError::MigrationFailed {
                version,
                name: "unknown".to_string(),
                error: format!("no migration registered for version {}", version),
            })?;
        apply(conn, migration)?;
    }

    tracing::debug!(version = SCHEMA_VERSION, "DuckDB schema up to date");
    Ok(())
}

fn bootstrap(conn: &Connection) -> Result<(), DuckdbError> {
    let start = std::time::Instant::now();
    in_transaction(conn, |conn| -> Result<(), DuckdbError> {
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT INTO schema_version (id, version, applied_at, description) VALUES (1, ?, ?, 'Initial schema')",
            duckdb::params![SCHEMA_VERSION, now_nanos()],
        )?;
        Ok(())
    })?;
    tracing::debug!(
        version = SCHEMA_VERSION,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Applied initial DuckDB schema"
    );
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DuckdbError> {
    let start = std::time::Instant::now();
    in_transaction(conn, |conn| -> Result<(), DuckdbError> {
        conn.execute_batch(migration.sql)
            .map_err(|e| DuckdbError::MigrationFailed {
                version: migration.version,
                name: migration.name.to_string(),
                error: e.to_string(),
            })?;
        conn.execute(
            "UPDATE schema_version SET version = ?, applied_at = ?, description = ? WHERE id = 1",
            duckdb::params![migration.version, now_nanos(), migration.name],
        )?;
        Ok(())
    })?;
    tracing::debug!(
        version = migration.version,
        name = migration.name,
        checksum = &sha256_hex(migration.sql)[..8],
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Applied DuckDB migration"
    );
    Ok(())
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
