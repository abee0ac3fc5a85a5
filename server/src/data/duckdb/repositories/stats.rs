//! Stats repository for project-level aggregations

use duckdb::Connection;

use super::{calls, files, objects, tables};
use crate::data::duckdb::filters::CallsLayout;
use crate::data::error::DataError;
use crate::data::types::ProjectStatsRes;

/// Entity counts for a project
///
/// Calls are counted from the layout the project reads from; everything
/// else is layout independent.
pub fn get_project_stats(
    conn: &Connection,
    layout: CallsLayout,
    project_id: &str,
) -> Result<ProjectStatsRes, DataError> {
    let calls_count = calls::count_project_calls(conn, layout, project_id)?;
    let objects_count = objects::count_objects(conn, project_id)?;
    let tables_count = tables::count_tables(conn, project_id)?;
    let (files_count, files_size_bytes) = files::files_usage(conn, project_id)?;

    Ok(ProjectStatsRes {
        calls_count,
        objects_count,
        tables_count,
        files_count,
        files_size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::duckdb::migrations::run_migrations;

    #[test]
    fn test_empty_project_stats() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for layout in [CallsLayout::Merged, CallsLayout::Complete] {
            assert_eq!(
                get_project_stats(&conn, layout, "e/p").unwrap(),
                ProjectStatsRes::default()
            );
        }
    }

    #[test]
    fn test_counts_tables_and_files() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        tables::insert_table(&conn, "e/p", "t1", &["r1".to_string()]).unwrap();
        files::insert_file(&conn, "e/p", "d1", "a.txt", 3).unwrap();

        let stats = get_project_stats(&conn, CallsLayout::Merged, "e/p").unwrap();
        assert_eq!(stats.tables_count, 1);
        assert_eq!(stats.files_count, 1);
        assert_eq!(stats.files_size_bytes, 3);
        assert_eq!(stats.calls_count, 0);
    }
}
