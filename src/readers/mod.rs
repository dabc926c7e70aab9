pub mod mysql;
pub mod postgres;
pub mod sqlserver;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::error::CodeGenError;
use crate::models::{ForeignKey, Table};
use crate::pool::{ConnectionPool, PoolableConnection};

/// Tables per detail batch; each batch owns one pooled connection.
pub const DETAIL_BATCH_SIZE: usize = 10;

/// Marker appended to the comment of single-column FKs covered by a
/// non-primary unique index.
pub const ONE_TO_ONE_HINT: &str = " [One-to-One Relationship]";

/// The uniform contract every dialect reader implements.
#[async_trait]
pub trait SchemaReader: Send + Sync + std::fmt::Debug {
    /// Enumerates the user tables of the target schema and reads columns,
    /// indexes and foreign keys for each, in parallel batches.
    async fn read_tables(&self) -> Result<Vec<Table>, CodeGenError>;
}

/// Selects the dialect reader for a provider name (case-insensitive).
pub fn create_reader(
    provider_name: &str,
    connection_string: &str,
) -> Result<Box<dyn SchemaReader>, CodeGenError> {
    match provider_name.to_ascii_lowercase().as_str() {
        "microsoft.data.sqlclient" => Ok(Box::new(sqlserver::SqlServerSchemaReader::new(
            connection_string,
        ))),
        "mysql.data.mysqlclient" => {
            Ok(Box::new(mysql::MySqlSchemaReader::new(connection_string)))
        }
        "npgsql" => Ok(Box::new(postgres::PostgresSchemaReader::new(
            connection_string,
        ))),
        _ => Err(CodeGenError::UnsupportedProvider(provider_name.to_string())),
    }
}

/// `(schema, table, comment)` row from the enumerate phase.
#[derive(Debug, Clone)]
pub struct TableStub {
    pub schema_name: String,
    pub table_name: String,
    pub comment: Option<String>,
}

/// Foreign-key results memoized across repeated `read_tables` calls. Keyed by
/// connection-string identity plus qualified table name.
pub(crate) type FkCache = Arc<RwLock<HashMap<String, Vec<ForeignKey>>>>;

pub(crate) fn new_fk_cache() -> FkCache {
    Arc::new(RwLock::new(HashMap::new()))
}

pub(crate) fn fk_cache_key(connection_string: &str, schema: &str, table: &str) -> String {
    format!("{}|{}.{}", connection_string, schema, table)
}

/// Per-table detail work a dialect reader performs on one live connection:
/// columns, then indexes, then foreign keys.
#[async_trait]
pub(crate) trait TableDetailReader<C: PoolableConnection>: Send + Sync {
    async fn read_table(&self, conn: &mut C, stub: &TableStub) -> Result<Table, CodeGenError>;
}

/// Shared batch driver: partitions the stubs into fixed-size batches, runs
/// the batches in parallel (bounded by the pool ceiling) with one dedicated
/// connection each, and merges the per-batch slices deterministically.
/// Invariant-violating tables are logged and skipped; the first fatal error
/// fails the call with the pool drained.
pub(crate) async fn read_tables_in_batches<C, R>(
    reader: &R,
    pool: &ConnectionPool<C>,
    connection_string: &str,
    stubs: Vec<TableStub>,
) -> Result<Vec<Table>, CodeGenError>
where
    C: PoolableConnection,
    R: TableDetailReader<C>,
{
    if stubs.is_empty() {
        return Ok(Vec::new());
    }

    let batches: Vec<(usize, Vec<TableStub>)> = stubs
        .chunks(DETAIL_BATCH_SIZE)
        .map(|chunk| chunk.to_vec())
        .enumerate()
        .collect();
    log::info!(
        "Reading {} tables in {} batches",
        stubs.len(),
        batches.len()
    );

    let mut stream = futures::stream::iter(batches.into_iter().map(|(batch_index, batch)| {
        async move {
            let mut conn = pool.acquire(connection_string).await?;
            let mut tables = Vec::with_capacity(batch.len());
            for stub in &batch {
                match reader.read_table(&mut conn, stub).await {
                    Ok(mut table) => {
                        if let Err(e) = table.validate() {
                            log::warn!("Skipping table '{}': {}", stub.table_name, e);
                            continue;
                        }
                        apply_one_to_one_hints(&mut table);
                        tables.push(table);
                    }
                    Err(e) if !e.is_fatal() => {
                        log::warn!("Skipping table '{}': {}", stub.table_name, e);
                    }
                    Err(e) => {
                        pool.release(connection_string, conn).await;
                        return Err(e);
                    }
                }
            }
            pool.release(connection_string, conn).await;
            Ok((batch_index, tables))
        }
    }))
    .buffer_unordered(pool.max());

    let mut collected: Vec<(usize, Vec<Table>)> = Vec::new();
    while let Some(result) = stream.next().await {
        match result {
            Ok(slice) => collected.push(slice),
            Err(e) => {
                drop(stream);
                pool.clear().await;
                return Err(e);
            }
        }
    }
    drop(stream);

    collected.sort_by_key(|(batch_index, _)| *batch_index);
    Ok(collected
        .into_iter()
        .flat_map(|(_, tables)| tables)
        .collect())
}

/// One catalog row of an index listing, already normalized to engine-neutral
/// values. Engines without included columns or per-column direction report
/// `false` for those flags.
#[derive(Debug, Clone)]
pub(crate) struct IndexRow {
    pub index_name: String,
    pub column_name: String,
    pub is_unique: bool,
    pub is_primary_key: bool,
    pub is_disabled: bool,
    pub index_type: String,
    pub key_ordinal: u32,
    pub is_descending: bool,
    pub is_included: bool,
}

/// Groups index rows by index name, preserving the order in which indexes
/// first appear; each group's columns are sorted by key ordinal with included
/// columns trailing.
pub(crate) fn group_indexes(rows: Vec<IndexRow>) -> Vec<crate::models::Index> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, crate::models::Index> = HashMap::new();
    for row in rows {
        let entry = grouped.entry(row.index_name.clone()).or_insert_with(|| {
            order.push(row.index_name.clone());
            crate::models::Index {
                name: row.index_name.clone(),
                is_unique: row.is_unique,
                is_primary_key: row.is_primary_key,
                is_disabled: row.is_disabled,
                index_type: row.index_type.clone(),
                columns: Vec::new(),
            }
        });
        entry.columns.push(crate::models::IndexColumn {
            column_name: row.column_name,
            key_ordinal: row.key_ordinal,
            is_descending: row.is_descending,
            is_included: row.is_included,
        });
    }
    let mut indexes: Vec<crate::models::Index> = order
        .into_iter()
        .filter_map(|name| grouped.remove(&name))
        .collect();
    for index in &mut indexes {
        index
            .columns
            .sort_by_key(|c| (c.is_included, c.key_ordinal));
    }
    indexes
}

/// One catalog row of a foreign-key listing with rules already normalized.
#[derive(Debug, Clone)]
pub(crate) struct FkRow {
    pub constraint_name: String,
    pub referenced_table: String,
    pub fk_column: String,
    pub pk_column: String,
    pub delete_rule: crate::models::ReferentialRule,
    pub update_rule: crate::models::ReferentialRule,
    pub is_enabled: bool,
    pub comment: Option<String>,
}

/// Groups FK rows by constraint name, preserving constraint order and the
/// column-pair order within each constraint. Invariant violations surface as
/// schema errors (the offending table gets skipped upstream).
pub(crate) fn group_foreign_keys(rows: Vec<FkRow>) -> Result<Vec<ForeignKey>, CodeGenError> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<FkRow>> = HashMap::new();
    for row in rows {
        grouped
            .entry(row.constraint_name.clone())
            .or_insert_with(|| {
                order.push(row.constraint_name.clone());
                Vec::new()
            })
            .push(row);
    }
    let mut keys = Vec::with_capacity(order.len());
    for name in order {
        let rows = grouped.remove(&name).unwrap_or_default();
        let first = match rows.first() {
            Some(first) => first.clone(),
            None => continue,
        };
        let pairs = rows
            .into_iter()
            .map(|r| crate::models::ColumnPair {
                foreign_key_column: r.fk_column,
                primary_key_column: r.pk_column,
            })
            .collect();
        let mut fk = ForeignKey::new(
            name,
            first.referenced_table,
            pairs,
            first.delete_rule,
            first.update_rule,
            first.is_enabled,
        )?;
        fk.comment = first.comment;
        keys.push(fk);
    }
    Ok(keys)
}

/// Post-processing phase: a single-column FK whose column is covered by a
/// non-primary unique index of width 1 gets the one-to-one marker appended
/// to its comment.
pub(crate) fn apply_one_to_one_hints(table: &mut Table) {
    let unique_singles: Vec<String> = table
        .indexes
        .iter()
        .filter(|idx| idx.is_unique && !idx.is_primary_key)
        .filter(|idx| idx.key_column_names().len() == 1)
        .map(|idx| idx.key_column_names()[0].to_string())
        .collect();
    if unique_singles.is_empty() {
        return;
    }
    for fk in &mut table.foreign_keys {
        if fk.is_composite_key() {
            continue;
        }
        if unique_singles.iter().any(|c| c == fk.foreign_key_column()) {
            let mut comment = fk.comment.take().unwrap_or_default();
            comment.push_str(ONE_TO_ONE_HINT);
            fk.comment = Some(comment.trim_start().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, ColumnPair, Index, IndexColumn, ReferentialRule};

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let err = create_reader("UnsupportedProvider", "server=x").unwrap_err();
        match err {
            CodeGenError::UnsupportedProvider(token) => {
                assert_eq!(token, "UnsupportedProvider")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_factory_is_case_insensitive() {
        assert!(create_reader("NPGSQL", "postgres://u:p@localhost/db").is_ok());
        assert!(create_reader("MySql.Data.MySqlClient", "mysql://u:p@localhost/db").is_ok());
        assert!(create_reader("Microsoft.Data.SqlClient", "Server=.;Database=db").is_ok());
    }

    fn table_with_unique_fk() -> Table {
        let mut table = Table::new("dbo", "UserProfile");
        table.columns.push(Column::new("UserId", "int", "int"));
        table.indexes.push(Index {
            name: "UX_UserProfile_UserId".into(),
            is_unique: true,
            is_primary_key: false,
            is_disabled: false,
            index_type: "NONCLUSTERED".into(),
            columns: vec![IndexColumn {
                column_name: "UserId".into(),
                key_ordinal: 1,
                is_descending: false,
                is_included: false,
            }],
        });
        table.foreign_keys.push(
            ForeignKey::new(
                "FK_UserProfile_User",
                "User",
                vec![ColumnPair {
                    foreign_key_column: "UserId".into(),
                    primary_key_column: "Id".into(),
                }],
                ReferentialRule::Cascade,
                ReferentialRule::NoAction,
                true,
            )
            .unwrap(),
        );
        table
    }

    #[test]
    fn test_one_to_one_hint_appended() {
        let mut table = table_with_unique_fk();
        apply_one_to_one_hints(&mut table);
        let comment = table.foreign_keys[0].comment.as_deref().unwrap();
        assert!(comment.contains("[One-to-One Relationship]"));
    }

    #[test]
    fn test_one_to_one_hint_preserves_existing_comment() {
        let mut table = table_with_unique_fk();
        table.foreign_keys[0].comment = Some("user link".into());
        apply_one_to_one_hints(&mut table);
        assert_eq!(
            table.foreign_keys[0].comment.as_deref(),
            Some("user link [One-to-One Relationship]")
        );
    }

    #[test]
    fn test_group_indexes_preserves_first_seen_order_and_sorts_ordinals() {
        let mk = |name: &str, col: &str, ordinal: u32, included: bool| IndexRow {
            index_name: name.into(),
            column_name: col.into(),
            is_unique: false,
            is_primary_key: false,
            is_disabled: false,
            index_type: "BTREE".into(),
            key_ordinal: ordinal,
            is_descending: false,
            is_included: included,
        };
        let rows = vec![
            mk("IX_B", "Two", 2, false),
            mk("IX_B", "Payload", 0, true),
            mk("IX_A", "Solo", 1, false),
            mk("IX_B", "One", 1, false),
        ];
        let indexes = group_indexes(rows);
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "IX_B");
        assert_eq!(
            indexes[0]
                .columns
                .iter()
                .map(|c| c.column_name.as_str())
                .collect::<Vec<_>>(),
            vec!["One", "Two", "Payload"]
        );
        assert_eq!(indexes[1].name, "IX_A");
    }

    #[test]
    fn test_group_foreign_keys_builds_composite_pairs_in_order() {
        let mk = |constraint: &str, fk: &str, pk: &str| FkRow {
            constraint_name: constraint.into(),
            referenced_table: "Order".into(),
            fk_column: fk.into(),
            pk_column: pk.into(),
            delete_rule: ReferentialRule::Cascade,
            update_rule: ReferentialRule::NoAction,
            is_enabled: true,
            comment: None,
        };
        let rows = vec![
            mk("FK_Detail_Order", "OrderId", "Id"),
            mk("FK_Detail_Order", "OrderVersion", "Version"),
            mk("FK_Detail_Product", "ProductId", "Id"),
        ];
        let keys = group_foreign_keys(rows).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].is_composite_key());
        assert_eq!(keys[0].foreign_key_column(), "OrderId");
        assert_eq!(keys[0].column_pairs[1].foreign_key_column, "OrderVersion");
        assert_eq!(keys[1].name, "FK_Detail_Product");
        assert!(!keys[1].is_composite_key());
    }

    #[test]
    fn test_group_foreign_keys_rejects_duplicate_composite_column() {
        let mk = |fk: &str| FkRow {
            constraint_name: "FK_Dup".into(),
            referenced_table: "Order".into(),
            fk_column: fk.into(),
            pk_column: fk.into(),
            delete_rule: ReferentialRule::NoAction,
            update_rule: ReferentialRule::NoAction,
            is_enabled: true,
            comment: None,
        };
        let err = group_foreign_keys(vec![mk("OrderId"), mk("OrderId")]).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_one_to_one_hint_skips_composite_keys() {
        let mut table = table_with_unique_fk();
        table.foreign_keys[0] = ForeignKey::new(
            "FK_Composite",
            "User",
            vec![
                ColumnPair {
                    foreign_key_column: "UserId".into(),
                    primary_key_column: "Id".into(),
                },
                ColumnPair {
                    foreign_key_column: "TenantId".into(),
                    primary_key_column: "Tenant".into(),
                },
            ],
            ReferentialRule::NoAction,
            ReferentialRule::NoAction,
            true,
        )
        .unwrap();
        apply_one_to_one_hints(&mut table);
        assert!(table.foreign_keys[0].comment.is_none());
    }
}
