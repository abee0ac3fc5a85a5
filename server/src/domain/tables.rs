//! Content-addressed tables
//!
//! A table is an ordered list of row digests; rows are stored once per
//! project. Updates never mutate a table, they produce a new digest from the
//! base digest and an ordered list of operations.

use std::cmp::Ordering;

use futures::{StreamExt, TryStreamExt, stream};
use serde_json::Value as JsonValue;

use super::digest::{table_digest, value_digest};
use super::service::TraceService;
use crate::core::config::TablesConfig;
use crate::core::constants::TABLE_STREAM_PAGE_SIZE;
use crate::data::duckdb::repositories::tables as tables_repository;
use crate::data::error::DataError;
use crate::data::traits::{RowStream, TraceServer};
use crate::data::types::{
    SortBy, SortDirection, TableCreateFromDigestsReq, TableCreateReq, TableCreateRes,
    TableQueryReq, TableRowSchema, TableSchemaForInsert, TableUpdateReq, TableUpdateRes,
    TableUpdateSpec,
};
use crate::utils::json::{compare_json, get_path};

/// Result of applying update operations to a table's row digests
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUpdates {
    pub row_digests: Vec<String>,
    /// Rows introduced by append/insert as (digest, value), in update order
    pub new_rows: Vec<(String, JsonValue)>,
}

/// Apply `updates` in order to `base`
pub fn apply_updates(
    base: Vec<String>,
    updates: &[TableUpdateSpec],
) -> Result<AppliedUpdates, DataError> {
    let mut row_digests = base;
    let mut new_rows = Vec::new();
    for (position, update) in updates.iter().enumerate() {
        match update {
            TableUpdateSpec::Append { row } => {
                let digest = value_digest(row);
                row_digests.push(digest.clone());
                new_rows.push((digest, row.clone()));
            }
            TableUpdateSpec::Pop { index } => {
                if *index >= row_digests.len() {
                    return Err(DataError::validation(format!(
                        "update {}: pop index {} out of range for {} rows",
                        position,
                        index,
                        row_digests.len()
                    )));
                }
                row_digests.remove(*index);
            }
            TableUpdateSpec::Insert { index, row } => {
                if *index > row_digests.len() {
                    return Err(DataError::validation(format!(
                        "update {}: insert index {} out of range for {} rows",
                        position,
                        index,
                        row_digests.len()
                    )));
                }
                let digest = value_digest(row);
                row_digests.insert(*index, digest.clone());
                new_rows.push((digest, row.clone()));
            }
        }
    }
    Ok(AppliedUpdates {
        row_digests,
        new_rows,
    })
}

/// Positions selected by a row-digest filter, in filter order
///
/// A digest that occurs several times in the table selects every occurrence.
fn select_positions(row_digests: &[String], filter: Option<&[String]>) -> Vec<usize> {
    match filter {
        None => (0..row_digests.len()).collect(),
        Some(wanted) => wanted
            .iter()
            .flat_map(|digest| {
                row_digests
                    .iter()
                    .enumerate()
                    .filter(move |(_, d)| *d == digest)
                    .map(|(i, _)| i)
            })
            .collect(),
    }
}

fn compare_rows(a: &JsonValue, b: &JsonValue, keys: &[(Vec<&str>, SortDirection)]) -> Ordering {
    for (path, direction) in keys {
        let left = get_path(a, path).unwrap_or(&JsonValue::Null);
        let right = get_path(b, path).unwrap_or(&JsonValue::Null);
        let ord = compare_json(left, right);
        let ord = match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn sort_rows(rows: &mut [TableRowSchema], sort_by: &[SortBy]) {
    let keys: Vec<(Vec<&str>, SortDirection)> = sort_by
        .iter()
        .map(|s| (s.field.split('.').collect(), s.direction))
        .collect();
    // Stable, so equal keys keep table order
    rows.sort_by(|a, b| compare_rows(&a.val, &b.val, &keys));
}

fn page<T>(items: Vec<T>, offset: Option<u64>, limit: Option<u64>) -> Vec<T> {
    let skip = offset.unwrap_or(0) as usize;
    let take = limit.map_or(usize::MAX, |l| l as usize);
    items.into_iter().skip(skip).take(take).collect()
}

/// Group rows into chunks of at most `target_bytes` serialized JSON
///
/// A row larger than the target gets a chunk of its own.
pub fn split_into_chunks(rows: Vec<JsonValue>, target_bytes: usize) -> Vec<Vec<JsonValue>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0usize;
    for row in rows {
        let size = row.to_string().len();
        if !current.is_empty() && current_bytes + size > target_bytes {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(row);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Upload a large row set through `server` in concurrent chunks
///
/// Row sets that fit in one chunk go out as a single `table_create`.
pub async fn create_table_chunked(
    server: &dyn TraceServer,
    project_id: &str,
    rows: Vec<JsonValue>,
    config: &TablesConfig,
) -> Result<TableCreateRes, DataError> {
    let chunks = split_into_chunks(rows, config.chunk_target_bytes);
    if chunks.len() <= 1 {
        return server
            .table_create(TableCreateReq {
                table: TableSchemaForInsert {
                    project_id: project_id.to_string(),
                    rows: chunks.into_iter().flatten().collect(),
                },
            })
            .await;
    }
    upload_chunks(server, project_id, chunks, config.max_concurrency).await
}

/// Create each chunk as its own table, then assemble them in order
///
/// At most `max_concurrency` chunk requests are in flight. The first failed
/// chunk aborts the upload.
pub async fn upload_chunks(
    server: &dyn TraceServer,
    project_id: &str,
    chunks: Vec<Vec<JsonValue>>,
    max_concurrency: usize,
) -> Result<TableCreateRes, DataError> {
    let chunk_count = chunks.len();
    tracing::debug!(project_id, chunks = chunk_count, "Uploading table in chunks");

    let mut created: Vec<(usize, TableCreateRes)> = stream::iter(chunks.into_iter().enumerate())
        .map(|(index, chunk)| async move {
            let res = server
                .table_create(TableCreateReq {
                    table: TableSchemaForInsert {
                        project_id: project_id.to_string(),
                        rows: chunk,
                    },
                })
                .await?;
            Ok::<_, DataError>((index, res))
        })
        .buffer_unordered(max_concurrency.max(1))
        .try_collect()
        .await?;
    created.sort_by_key(|(index, _)| *index);

    let row_digests: Vec<String> = created
        .into_iter()
        .flat_map(|(_, res)| res.row_digests)
        .collect();
    let digest = server
        .table_create_from_digests(TableCreateFromDigestsReq {
            project_id: project_id.to_string(),
            row_digests: row_digests.clone(),
        })
        .await?
        .digest;
    Ok(TableCreateRes {
        digest,
        row_digests,
    })
}

impl TraceService {
    pub(crate) async fn create_table(
        &self,
        project_id: String,
        rows: Vec<JsonValue>,
    ) -> Result<TableCreateRes, DataError> {
        let entries: Vec<(String, JsonValue)> =
            rows.into_iter().map(|row| (value_digest(&row), row)).collect();
        let row_digests: Vec<String> = entries.iter().map(|(d, _)| d.clone()).collect();
        let digest = table_digest(&row_digests);

        let (table, digests) = (digest.clone(), row_digests.clone());
        self.duckdb
            .with_conn(move |conn| {
                tables_repository::insert_rows(conn, &project_id, &entries)?;
                tables_repository::insert_table(conn, &project_id, &table, &digests)
            })
            .await?;
        tracing::debug!(digest = %digest, rows = row_digests.len(), "Created table");
        Ok(TableCreateRes {
            digest,
            row_digests,
        })
    }

    pub(crate) async fn create_table_from_digests(
        &self,
        project_id: String,
        row_digests: Vec<String>,
    ) -> Result<String, DataError> {
        let digest = table_digest(&row_digests);
        let table = digest.clone();
        self.duckdb
            .with_conn(move |conn| {
                let stored = tables_repository::load_rows(conn, &project_id, &row_digests)?;
                if let Some(missing) = row_digests.iter().find(|d| !stored.contains_key(*d)) {
                    return Err(DataError::not_found(format!("table row {}", missing)));
                }
                tables_repository::insert_table(conn, &project_id, &table, &row_digests)
            })
            .await?;
        Ok(digest)
    }

    pub(crate) async fn update_table(&self, req: TableUpdateReq) -> Result<TableUpdateRes, DataError> {
        self.duckdb
            .with_conn(move |conn| {
                let base =
                    tables_repository::table_row_digests(conn, &req.project_id, &req.base_digest)?
                        .ok_or_else(|| {
                            DataError::not_found(format!("table {}", req.base_digest))
                        })?;
                let applied = apply_updates(base, &req.updates)?;
                let digest = table_digest(&applied.row_digests);
                tables_repository::insert_rows(conn, &req.project_id, &applied.new_rows)?;
                tables_repository::insert_table(conn, &req.project_id, &digest, &applied.row_digests)?;
                Ok(TableUpdateRes {
                    digest,
                    updated_row_digests: applied.new_rows.into_iter().map(|(d, _)| d).collect(),
                })
            })
            .await
    }

    pub(crate) async fn query_table(
        &self,
        req: TableQueryReq,
    ) -> Result<Vec<TableRowSchema>, DataError> {
        self.duckdb
            .with_conn(move |conn| {
                let row_digests =
                    tables_repository::table_row_digests(conn, &req.project_id, &req.digest)?
                        .ok_or_else(|| DataError::not_found(format!("table {}", req.digest)))?;
                let filter = req.filter.as_ref().and_then(|f| f.row_digests.as_deref());
                let mut positions = select_positions(&row_digests, filter);

                let sort_by = req.sort_by.as_deref().filter(|s| !s.is_empty());
                // Without a sort only the requested page needs loading
                if sort_by.is_none() {
                    positions = page(positions, req.offset, req.limit);
                }

                let needed: Vec<String> =
                    positions.iter().map(|&i| row_digests[i].clone()).collect();
                let values = tables_repository::load_rows(conn, &req.project_id, &needed)?;

                let mut rows = Vec::with_capacity(positions.len());
                for i in positions {
                    let digest = row_digests[i].clone();
                    let val = match values.get(&digest) {
                        Some(val) => val.clone(),
                        None => return Err(DataError::not_found(format!("table row {}", digest))),
                    };
                    rows.push(TableRowSchema {
                        digest,
                        val,
                        original_index: i as u64,
                    });
                }

                match sort_by {
                    Some(sort_by) => {
                        sort_rows(&mut rows, sort_by);
                        Ok(page(rows, req.offset, req.limit))
                    }
                    None => Ok(rows),
                }
            })
            .await
    }

    pub(crate) async fn stream_table(
        &self,
        req: TableQueryReq,
    ) -> Result<RowStream<TableRowSchema>, DataError> {
        let this = self.clone();
        let stream = async_stream::stream! {
            let mut offset = req.offset.unwrap_or(0);
            let mut remaining = req.limit;
            loop {
                let page_size = remaining.map_or(TABLE_STREAM_PAGE_SIZE, |r| r.min(TABLE_STREAM_PAGE_SIZE));
                if page_size == 0 {
                    break;
                }
                let page_req = TableQueryReq {
                    limit: Some(page_size),
                    offset: Some(offset),
                    ..req.clone()
                };
                let rows = match this.query_table(page_req).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                let fetched = rows.len() as u64;
                for row in rows {
                    yield Ok(row);
                }
                if fetched < page_size {
                    break;
                }
                offset += fetched;
                remaining = remaining.map(|r| r - fetched);
            }
        };
        Ok(Box::pin(stream))
    }

    pub(crate) async fn count_table_rows(
        &self,
        project_id: String,
        digest: String,
    ) -> Result<u64, DataError> {
        self.duckdb
            .with_conn(move |conn| {
                tables_repository::table_row_count(conn, &project_id, &digest)?
                    .ok_or_else(|| DataError::not_found(format!("table {}", digest)))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{TableQueryStatsReq, TableRowFilter};
    use crate::domain::service::test_support::test_env;
    use serde_json::json;

    const P: &str = "e/p";

    fn create_req(rows: Vec<JsonValue>) -> TableCreateReq {
        TableCreateReq {
            table: TableSchemaForInsert {
                project_id: P.into(),
                rows,
            },
        }
    }

    fn vals(rows: &[TableRowSchema]) -> Vec<JsonValue> {
        rows.iter().map(|r| r.val.clone()).collect()
    }

    #[test]
    fn test_apply_updates_in_order() {
        let base = vec!["a".to_string(), "b".to_string()];
        let updates = vec![
            TableUpdateSpec::Append { row: json!({"n": 3}) },
            TableUpdateSpec::Pop { index: 0 },
            TableUpdateSpec::Insert {
                index: 1,
                row: json!({"n": 4}),
            },
        ];
        let applied = apply_updates(base.clone(), &updates).unwrap();
        let d3 = value_digest(&json!({"n": 3}));
        let d4 = value_digest(&json!({"n": 4}));
        assert_eq!(applied.row_digests, vec!["b".to_string(), d4.clone(), d3.clone()]);
        assert_eq!(
            applied.new_rows.iter().map(|(d, _)| d.clone()).collect::<Vec<_>>(),
            vec![d3, d4]
        );
        assert_eq!(apply_updates(base, &updates).unwrap(), applied);
    }

    #[test]
    fn test_apply_updates_rejects_bad_index() {
        let base = vec!["a".to_string()];
        assert!(matches!(
            apply_updates(base.clone(), &[TableUpdateSpec::Pop { index: 1 }]),
            Err(DataError::Validation(_))
        ));
        assert!(matches!(
            apply_updates(
                base,
                &[TableUpdateSpec::Insert {
                    index: 2,
                    row: json!(1)
                }]
            ),
            Err(DataError::Validation(_))
        ));
    }

    #[test]
    fn test_split_into_chunks_respects_target() {
        let rows: Vec<JsonValue> = (0..10).map(|i| json!({"i": i})).collect();
        let size = rows[0].to_string().len();
        let chunks = split_into_chunks(rows.clone(), size * 3);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), rows);

        let huge = vec![json!("x".repeat(100)), json!(1)];
        assert_eq!(split_into_chunks(huge, 10).len(), 2);
        assert!(split_into_chunks(Vec::new(), 10).is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order_and_digests() {
        let env = test_env().await;
        let s = &env.service;
        let rows = vec![json!({"v": 3}), json!({"v": 1}), json!({"v": 2}), json!({"v": 1})];
        let created = s.table_create(create_req(rows.clone())).await.unwrap();
        assert_eq!(created.row_digests.len(), 4);
        assert_eq!(created.row_digests[1], created.row_digests[3]);

        let queried = s
            .table_query(TableQueryReq::new(P, &created.digest))
            .await
            .unwrap()
            .rows;
        assert_eq!(vals(&queried), rows);
        let digests: Vec<String> = queried.iter().map(|r| r.digest.clone()).collect();
        assert_eq!(digests, created.row_digests);
        let indexes: Vec<u64> = queried.iter().map(|r| r.original_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);

        let count = s
            .table_query_stats(TableQueryStatsReq {
                project_id: P.into(),
                digest: created.digest.clone(),
            })
            .await
            .unwrap()
            .count;
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_unsorted_order_is_insertion_order() {
        let env = test_env().await;
        let s = &env.service;
        let rows = vec![json!({"v": 2}), json!({"v": 3}), json!({"v": 1})];
        let digest = s.table_create(create_req(rows.clone())).await.unwrap().digest;

        let unsorted = s.table_query(TableQueryReq::new(P, &digest)).await.unwrap().rows;
        let sorted = s
            .table_query(TableQueryReq {
                sort_by: Some(vec![SortBy::asc("v")]),
                ..TableQueryReq::new(P, &digest)
            })
            .await
            .unwrap()
            .rows;
        assert_eq!(vals(&unsorted), rows);
        assert_eq!(vals(&sorted), vec![json!({"v": 1}), json!({"v": 2}), json!({"v": 3})]);
        assert_ne!(vals(&unsorted), vals(&sorted));
        assert_eq!(sorted[0].original_index, 2);
    }

    #[tokio::test]
    async fn test_nested_composite_sort_and_paging() {
        let env = test_env().await;
        let s = &env.service;
        let rows = vec![
            json!({"n": {"a": 1}, "b": "x"}),
            json!({"n": {"a": 2}, "b": "y"}),
            json!({"n": {"a": 1}, "b": "z"}),
            json!({"n": {"a": 2}, "b": "w"}),
        ];
        let digest = s.table_create(create_req(rows)).await.unwrap().digest;
        let sorted = s
            .table_query(TableQueryReq {
                sort_by: Some(vec![SortBy::desc("n.a"), SortBy::asc("b")]),
                offset: Some(1),
                limit: Some(2),
                ..TableQueryReq::new(P, &digest)
            })
            .await
            .unwrap()
            .rows;
        let bs: Vec<&str> = sorted.iter().filter_map(|r| r.val["b"].as_str()).collect();
        assert_eq!(bs, vec!["y", "x"]);
    }

    #[tokio::test]
    async fn test_digest_filter_keeps_filter_order() {
        let env = test_env().await;
        let s = &env.service;
        let created = s
            .table_create(create_req(vec![json!("a"), json!("b"), json!("c"), json!("a")]))
            .await
            .unwrap();
        let d = &created.row_digests;
        let rows = s
            .table_query(TableQueryReq {
                filter: Some(TableRowFilter {
                    row_digests: Some(vec![d[2].clone(), d[0].clone()]),
                }),
                ..TableQueryReq::new(P, &created.digest)
            })
            .await
            .unwrap()
            .rows;
        assert_eq!(vals(&rows), vec![json!("c"), json!("a"), json!("a")]);
        let indexes: Vec<u64> = rows.iter().map(|r| r.original_index).collect();
        assert_eq!(indexes, vec![2, 0, 3]);
    }

    #[tokio::test]
    async fn test_update_is_deterministic() {
        let env = test_env().await;
        let s = &env.service;
        let base = s
            .table_create(create_req(vec![json!(1), json!(2)]))
            .await
            .unwrap()
            .digest;
        let req = TableUpdateReq {
            project_id: P.into(),
            base_digest: base.clone(),
            updates: vec![
                TableUpdateSpec::Pop { index: 0 },
                TableUpdateSpec::Append { row: json!(3) },
            ],
        };
        let first = s.table_update(req.clone()).await.unwrap();
        let second = s.table_update(req).await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first.digest, base);

        let rows = s.table_query(TableQueryReq::new(P, &first.digest)).await.unwrap().rows;
        assert_eq!(vals(&rows), vec![json!(2), json!(3)]);

        let missing = s
            .table_update(TableUpdateReq {
                project_id: P.into(),
                base_digest: "nope".into(),
                updates: vec![],
            })
            .await;
        assert!(matches!(missing, Err(DataError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_from_digests_requires_stored_rows() {
        let env = test_env().await;
        let s = &env.service;
        let created = s.table_create(create_req(vec![json!(1), json!(2)])).await.unwrap();
        let mut reversed = created.row_digests.clone();
        reversed.reverse();
        let digest = s
            .table_create_from_digests(TableCreateFromDigestsReq {
                project_id: P.into(),
                row_digests: reversed,
            })
            .await
            .unwrap()
            .digest;
        let rows = s.table_query(TableQueryReq::new(P, &digest)).await.unwrap().rows;
        assert_eq!(vals(&rows), vec![json!(2), json!(1)]);

        let err = s
            .table_create_from_digests(TableCreateFromDigestsReq {
                project_id: P.into(),
                row_digests: vec!["missing".into()],
            })
            .await;
        assert!(matches!(err, Err(DataError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_chunked_upload_matches_single_create() {
        let env = test_env().await;
        let s = &env.service;
        let rows: Vec<JsonValue> = (0..1200)
            .map(|i| json!({"i": i, "label": format!("row-{}", (i * 7919) % 1200)}))
            .collect();
        let config = TablesConfig {
            chunk_target_bytes: 4096,
            max_concurrency: 4,
        };
        assert!(split_into_chunks(rows.clone(), config.chunk_target_bytes).len() >= 2);

        let chunked = create_table_chunked(s, P, rows.clone(), &config).await.unwrap();
        let single = s.table_create(create_req(rows)).await.unwrap();
        assert_eq!(chunked.row_digests, single.row_digests);
        assert_eq!(chunked.digest, single.digest);
    }

    #[tokio::test]
    async fn test_stream_pages_through_rows() {
        let env = test_env().await;
        let s = &env.service;
        let total = TABLE_STREAM_PAGE_SIZE + 25;
        let rows: Vec<JsonValue> = (0..total).map(|i| json!({"i": i})).collect();
        let digest = s.table_create(create_req(rows)).await.unwrap().digest;

        let streamed: Vec<TableRowSchema> = s
            .table_query_stream(TableQueryReq::new(P, &digest))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(streamed.len() as u64, total);
        assert!(
            streamed
                .iter()
                .enumerate()
                .all(|(i, r)| r.original_index == i as u64)
        );

        let missing: Vec<Result<TableRowSchema, DataError>> = s
            .table_query_stream(TableQueryReq::new(P, "nope"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(missing.len(), 1);
        assert!(matches!(missing[0], Err(DataError::NotFound(_))));
    }
}
