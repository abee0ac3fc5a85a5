//! DuckDB schema definitions
//!
//! Call events are append-only rows in `call_parts`; reconciliation into one
//! logical call happens at read time (layout 0) or is materialized into
//! `calls_complete` after each write (layout 1). Objects, table rows and
//! files are content-addressed.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL
pub const SCHEMA: &str = r#"
-- Infrastructure: Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description VARCHAR
);

-- ═══════════════════════════════════════════════════════════════════════════════
-- Call fragments: one row per start/end/update/delete event
-- `seq` orders fragments of the same call regardless of wall-clock skew
-- ═══════════════════════════════════════════════════════════════════════════════
CREATE SEQUENCE IF NOT EXISTS call_parts_seq START 1;

CREATE TABLE IF NOT EXISTS call_parts (
    seq                 BIGINT NOT NULL DEFAULT nextval('call_parts_seq'),
    part_kind           VARCHAR NOT NULL,   -- start | end | update | delete
    project_id          VARCHAR NOT NULL,
    id                  VARCHAR NOT NULL,

    -- start fields
    trace_id            VARCHAR,
    parent_id           VARCHAR,
    thread_id           VARCHAR,
    turn_id             VARCHAR,
    op_name             VARCHAR,
    display_name        VARCHAR,            -- also carried by update
    started_at          TIMESTAMP,
    attributes_dump     VARCHAR,
    inputs_dump         VARCHAR,
    wb_run_id           VARCHAR,

    -- end fields
    ended_at            TIMESTAMP,
    output_dump         VARCHAR,
    exception           VARCHAR,
    summary_dump        VARCHAR,

    -- common
    wb_user_id          VARCHAR,
    deleted_at          TIMESTAMP,          -- set by delete
    created_at          TIMESTAMP NOT NULL DEFAULT current_timestamp
);

CREATE INDEX IF NOT EXISTS idx_call_parts_call ON call_parts (project_id, id);

-- ═══════════════════════════════════════════════════════════════════════════════
-- Precomputed calls: one reconciled row per call (including tombstoned ones)
-- ═══════════════════════════════════════════════════════════════════════════════
CREATE TABLE IF NOT EXISTS calls_complete (
    project_id          VARCHAR NOT NULL,
    id                  VARCHAR NOT NULL,
    trace_id            VARCHAR NOT NULL,
    parent_id           VARCHAR,
    thread_id           VARCHAR,
    turn_id             VARCHAR,
    op_name             VARCHAR NOT NULL,
    display_name        VARCHAR,
    started_at          TIMESTAMP NOT NULL,
    ended_at            TIMESTAMP,
    attributes_dump     VARCHAR,
    inputs_dump         VARCHAR,
    output_dump         VARCHAR,
    exception           VARCHAR,
    summary_dump        VARCHAR,
    wb_user_id          VARCHAR,
    wb_run_id           VARCHAR,
    deleted_at          TIMESTAMP
);

-- ═══════════════════════════════════════════════════════════════════════════════
-- Object versions: immutable values under a mutable object_id
-- version_index is assigned at insert and never renumbered
-- ═══════════════════════════════════════════════════════════════════════════════
CREATE TABLE IF NOT EXISTS object_versions (
    project_id          VARCHAR NOT NULL,
    object_id           VARCHAR NOT NULL,
    digest              VARCHAR NOT NULL,
    version_index       BIGINT NOT NULL,
    kind                VARCHAR NOT NULL,   -- object | op
    base_object_class   VARCHAR,
    val_dump            VARCHAR,            -- NULL for a JSON null value
    wb_user_id          VARCHAR,
    created_at          TIMESTAMP NOT NULL,
    deleted_at          TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_object_versions_object ON object_versions (project_id, object_id);

-- ═══════════════════════════════════════════════════════════════════════════════
-- Tables: content-addressed rows shared across tables
-- ═══════════════════════════════════════════════════════════════════════════════
CREATE TABLE IF NOT EXISTS table_rows (
    project_id          VARCHAR NOT NULL,
    digest              VARCHAR NOT NULL,
    val_dump            VARCHAR,            -- NULL for a JSON null row
    created_at          TIMESTAMP NOT NULL DEFAULT current_timestamp,
    PRIMARY KEY (project_id, digest)
);

CREATE TABLE IF NOT EXISTS tables (
    project_id          VARCHAR NOT NULL,
    digest              VARCHAR NOT NULL,
    row_digests_dump    VARCHAR NOT NULL,   -- JSON array, table order
    row_count           BIGINT NOT NULL,
    created_at          TIMESTAMP NOT NULL DEFAULT current_timestamp,
    PRIMARY KEY (project_id, digest)
);

-- ═══════════════════════════════════════════════════════════════════════════════
-- Feedback attached to calls and objects by ref
-- ═══════════════════════════════════════════════════════════════════════════════
CREATE TABLE IF NOT EXISTS feedback (
    id                  VARCHAR PRIMARY KEY,
    project_id          VARCHAR NOT NULL,
    weave_ref           VARCHAR NOT NULL,
    feedback_type       VARCHAR NOT NULL,
    payload_dump        VARCHAR,
    creator             VARCHAR,
    wb_user_id          VARCHAR,
    runnable_ref        VARCHAR,
    call_ref            VARCHAR,
    trigger_ref         VARCHAR,
    created_at          TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_ref ON feedback (project_id, weave_ref);

-- ═══════════════════════════════════════════════════════════════════════════════
-- File metadata (bytes live in the file store)
-- ═══════════════════════════════════════════════════════════════════════════════
CREATE TABLE IF NOT EXISTS files (
    project_id          VARCHAR NOT NULL,
    digest              VARCHAR NOT NULL,   -- SHA-256 hex of content
    name                VARCHAR NOT NULL,
    size_bytes          BIGINT NOT NULL,
    created_at          TIMESTAMP NOT NULL DEFAULT current_timestamp,
    PRIMARY KEY (project_id, digest)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use duckdb::Connection;

    #[test]
    fn test_schema_applies_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name IN \
                 ('call_parts', 'calls_complete', 'object_versions', 'table_rows', 'tables', 'feedback', 'files')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn test_call_parts_seq_increments() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute_batch(
            "INSERT INTO call_parts (part_kind, project_id, id) VALUES ('end', 'e/p', 'a');
             INSERT INTO call_parts (part_kind, project_id, id) VALUES ('start', 'e/p', 'a');",
        )
        .unwrap();
        let kinds: Vec<String> = conn
            .prepare("SELECT part_kind FROM call_parts ORDER BY seq")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(kinds, vec!["end", "start"]);
    }
}
