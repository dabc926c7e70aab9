use std::sync::Arc;

use async_trait::async_trait;
use tiberius::{Client, Config, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::error::CodeGenError;
use crate::models::{Column, GeneratedKind, Table};
use crate::pool::{ConnectionPool, PoolableConnection};
use crate::readers::types::{canonical_sqlserver_type, normalize_rule};
use crate::readers::{
    fk_cache_key, group_foreign_keys, group_indexes, new_fk_cache, read_tables_in_batches,
    FkCache, FkRow, IndexRow, SchemaReader, TableDetailReader, TableStub,
};

pub const DEFAULT_SCHEMA: &str = "dbo";

const MARS_KEY: &str = "MultipleActiveResultSets";

/// Per-table introspection interleaves result iterations on one logical
/// connection, which SQL Server only allows with MARS enabled. Returns the
/// (possibly rewritten) connection string and whether a rewrite happened.
pub(crate) fn ensure_mars(connection_string: &str) -> (String, bool) {
    for part in connection_string.split(';') {
        if let Some((key, value)) = part.split_once('=') {
            if key.trim().eq_ignore_ascii_case(MARS_KEY) {
                if value.trim().eq_ignore_ascii_case("true") {
                    return (connection_string.to_string(), false);
                }
                let rewritten = connection_string
                    .split(';')
                    .map(|p| match p.split_once('=') {
                        Some((k, _)) if k.trim().eq_ignore_ascii_case(MARS_KEY) => {
                            format!("{}=True", k.trim())
                        }
                        _ => p.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(";");
                return (rewritten, true);
            }
        }
    }
    let mut rewritten = connection_string.trim_end().trim_end_matches(';').to_string();
    rewritten.push_str(";MultipleActiveResultSets=True");
    (rewritten, true)
}

/// A live TDS connection; tiberius over a tokio TCP stream.
pub struct SqlServerConnection {
    client: Client<Compat<TcpStream>>,
}

#[async_trait]
impl PoolableConnection for SqlServerConnection {
    async fn open(connection_string: &str) -> Result<Self, CodeGenError> {
        let config = Config::from_ado_string(connection_string)?;
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            CodeGenError::connectivity(format!("TCP connection to SQL Server failed: {e}"))
        })?;
        tcp.set_nodelay(true)
            .map_err(|e| CodeGenError::connectivity(format!("failed to set TCP_NODELAY: {e}")))?;
        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(SqlServerConnection { client })
    }

    async fn dispose(self) -> Result<(), CodeGenError> {
        self.client.close().await.map_err(Into::into)
    }
}

fn row_str(row: &Row, idx: usize) -> String {
    row.get::<&str, _>(idx).unwrap_or_default().to_string()
}

fn row_str_opt(row: &Row, idx: usize) -> Option<String> {
    row.get::<&str, _>(idx).map(str::to_string)
}

fn row_bool(row: &Row, idx: usize) -> bool {
    row.get::<bool, _>(idx).unwrap_or(false)
}

fn row_i32(row: &Row, idx: usize) -> i32 {
    row.get::<i32, _>(idx).unwrap_or(0)
}

/// Schema reader for SQL Server, driven by the sys.* catalog views.
pub struct SqlServerSchemaReader {
    connection_string: String,
    schema: String,
    pool: Arc<ConnectionPool<SqlServerConnection>>,
    fk_cache: FkCache,
}

impl std::fmt::Debug for SqlServerSchemaReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerSchemaReader")
            .finish_non_exhaustive()
    }
}

impl SqlServerSchemaReader {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self::with_schema(connection_string, DEFAULT_SCHEMA)
    }

    pub fn with_schema(
        connection_string: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        let (connection_string, rewritten) = ensure_mars(&connection_string.into());
        if rewritten {
            log::warn!(
                "Connection string did not enable MultipleActiveResultSets; it has been rewritten to turn the flag on"
            );
        }
        SqlServerSchemaReader {
            connection_string,
            schema: schema.into(),
            pool: Arc::new(ConnectionPool::with_default_size()),
            fk_cache: new_fk_cache(),
        }
    }

    fn qualified(&self, table_name: &str) -> String {
        format!("[{}].[{}]", self.schema, table_name)
    }

    async fn enumerate_tables(
        &self,
        conn: &mut SqlServerConnection,
    ) -> Result<Vec<TableStub>, CodeGenError> {
        let mut query = Query::new(
            r#"
            SELECT s.name AS schema_name, t.name AS table_name,
                   CAST(ep.value AS NVARCHAR(4000)) AS table_comment
            FROM sys.tables t
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            LEFT JOIN sys.extended_properties ep
                ON ep.major_id = t.object_id AND ep.minor_id = 0
                AND ep.class = 1 AND ep.name = 'MS_Description'
            WHERE s.name = @P1 AND t.is_ms_shipped = 0
            ORDER BY t.name
            "#,
        );
        query.bind(self.schema.as_str());
        let rows = query
            .query(&mut conn.client)
            .await?
            .into_first_result()
            .await?;

        Ok(rows
            .iter()
            .map(|r| TableStub {
                schema_name: row_str(r, 0),
                table_name: row_str(r, 1),
                comment: row_str_opt(r, 2),
            })
            .collect())
    }

    async fn read_columns(
        &self,
        conn: &mut SqlServerConnection,
        table_name: &str,
    ) -> Result<Vec<Column>, CodeGenError> {
        let mut query = Query::new(
            r#"
            SELECT c.name AS column_name,
                   ty.name AS type_name,
                   c.is_nullable,
                   CAST(c.max_length AS INT) AS max_length,
                   CAST(c.precision AS INT) AS precision,
                   CAST(c.scale AS INT) AS scale,
                   c.is_identity,
                   c.is_computed,
                   cc.definition AS computed_definition,
                   CAST(ISNULL(cc.is_persisted, 0) AS BIT) AS is_persisted,
                   c.collation_name,
                   dc.definition AS default_definition,
                   CAST(ep.value AS NVARCHAR(4000)) AS column_comment,
                   CAST(CASE WHEN EXISTS (
                       SELECT 1 FROM sys.indexes i
                       JOIN sys.index_columns ic
                           ON ic.object_id = i.object_id AND ic.index_id = i.index_id
                       WHERE i.object_id = c.object_id
                         AND i.is_primary_key = 1
                         AND ic.column_id = c.column_id
                   ) THEN 1 ELSE 0 END AS BIT) AS is_primary_key
            FROM sys.columns c
            JOIN sys.types ty ON ty.user_type_id = c.user_type_id
            LEFT JOIN sys.computed_columns cc
                ON cc.object_id = c.object_id AND cc.column_id = c.column_id
            LEFT JOIN sys.default_constraints dc ON dc.object_id = c.default_object_id
            LEFT JOIN sys.extended_properties ep
                ON ep.major_id = c.object_id AND ep.minor_id = c.column_id
                AND ep.class = 1 AND ep.name = 'MS_Description'
            WHERE c.object_id = OBJECT_ID(@P1)
            ORDER BY c.column_id
            "#,
        );
        query.bind(self.qualified(table_name));
        let rows = query
            .query(&mut conn.client)
            .await?
            .into_first_result()
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for r in &rows {
            let vendor_type = row_str(r, 1);
            let data_type = canonical_sqlserver_type(&vendor_type);
            let lowered = vendor_type.to_ascii_lowercase();

            let mut column = Column::new(row_str(r, 0), data_type, vendor_type);
            column.is_nullable = row_bool(r, 2);
            column.is_identity = row_bool(r, 6);
            column.is_computed = row_bool(r, 7);
            column.computed_expression = row_str_opt(r, 8);
            column.is_row_version = matches!(lowered.as_str(), "timestamp" | "rowversion");
            column.collation = row_str_opt(r, 10);
            column.default_value = row_str_opt(r, 11);
            column.comment = row_str_opt(r, 12);
            column.is_primary_key = row_bool(r, 13);

            if column.is_computed {
                column.generated_kind = Some(if row_bool(r, 9) {
                    GeneratedKind::Stored
                } else {
                    GeneratedKind::Computed
                });
            }

            match column.data_type.as_str() {
                "string" | "byte[]" => {
                    let raw_length = row_i32(r, 3);
                    // nchar/nvarchar report bytes; two per character
                    column.max_length = Some(if raw_length > 0 && lowered.starts_with('n') {
                        i64::from(raw_length) / 2
                    } else {
                        i64::from(raw_length)
                    });
                }
                "decimal" => {
                    column.precision = Some(row_i32(r, 4) as u32);
                    column.scale = Some(row_i32(r, 5) as u32);
                }
                _ => {}
            }
            columns.push(column);
        }
        Ok(columns)
    }

    async fn read_indexes(
        &self,
        conn: &mut SqlServerConnection,
        table_name: &str,
    ) -> Result<Vec<IndexRow>, CodeGenError> {
        let mut query = Query::new(
            r#"
            SELECT i.name AS index_name,
                   col.name AS column_name,
                   i.is_unique,
                   i.is_primary_key,
                   i.is_disabled,
                   i.type_desc,
                   CAST(ic.key_ordinal AS INT) AS key_ordinal,
                   ic.is_descending_key,
                   ic.is_included_column
            FROM sys.indexes i
            JOIN sys.index_columns ic
                ON ic.object_id = i.object_id AND ic.index_id = i.index_id
            JOIN sys.columns col
                ON col.object_id = ic.object_id AND col.column_id = ic.column_id
            WHERE i.object_id = OBJECT_ID(@P1) AND i.type > 0 AND i.name IS NOT NULL
            ORDER BY i.index_id, ic.is_included_column, ic.key_ordinal
            "#,
        );
        query.bind(self.qualified(table_name));
        let rows = query
            .query(&mut conn.client)
            .await?
            .into_first_result()
            .await?;

        Ok(rows
            .iter()
            .map(|r| IndexRow {
                index_name: row_str(r, 0),
                column_name: row_str(r, 1),
                is_unique: row_bool(r, 2),
                is_primary_key: row_bool(r, 3),
                is_disabled: row_bool(r, 4),
                index_type: row_str(r, 5),
                key_ordinal: row_i32(r, 6) as u32,
                is_descending: row_bool(r, 7),
                is_included: row_bool(r, 8),
            })
            .collect())
    }

    async fn read_foreign_keys(
        &self,
        conn: &mut SqlServerConnection,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<crate::models::ForeignKey>, CodeGenError> {
        let cache_key = fk_cache_key(&self.connection_string, schema_name, table_name);
        {
            let cache = self.fk_cache.read().await;
            if let Some(cached) = cache.get(&cache_key) {
                log::debug!("SQL Server: FK cache hit for {}", table_name);
                return Ok(cached.clone());
            }
        }

        let mut query = Query::new(
            r#"
            SELECT fk.name AS constraint_name,
                   rt.name AS referenced_table,
                   pc.name AS fk_column,
                   rc.name AS pk_column,
                   fk.delete_referential_action_desc,
                   fk.update_referential_action_desc,
                   fk.is_disabled,
                   CAST(ep.value AS NVARCHAR(4000)) AS constraint_comment
            FROM sys.foreign_keys fk
            JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
            JOIN sys.tables rt ON rt.object_id = fk.referenced_object_id
            JOIN sys.columns pc
                ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
            JOIN sys.columns rc
                ON rc.object_id = fkc.referenced_object_id
                AND rc.column_id = fkc.referenced_column_id
            LEFT JOIN sys.extended_properties ep
                ON ep.major_id = fk.object_id AND ep.minor_id = 0
                AND ep.class = 1 AND ep.name = 'MS_Description'
            WHERE fk.parent_object_id = OBJECT_ID(@P1)
            ORDER BY fk.name, fkc.constraint_column_id
            "#,
        );
        query.bind(self.qualified(table_name));
        let rows = query
            .query(&mut conn.client)
            .await?
            .into_first_result()
            .await?;

        let fk_rows: Vec<FkRow> = rows
            .iter()
            .map(|r| FkRow {
                constraint_name: row_str(r, 0),
                referenced_table: row_str(r, 1),
                fk_column: row_str(r, 2),
                pk_column: row_str(r, 3),
                delete_rule: normalize_rule(&row_str(r, 4)),
                update_rule: normalize_rule(&row_str(r, 5)),
                is_enabled: !row_bool(r, 6),
                comment: row_str_opt(r, 7),
            })
            .collect();
        let keys = group_foreign_keys(fk_rows)?;

        let mut cache = self.fk_cache.write().await;
        cache.insert(cache_key, keys.clone());
        Ok(keys)
    }
}

#[async_trait]
impl TableDetailReader<SqlServerConnection> for SqlServerSchemaReader {
    async fn read_table(
        &self,
        conn: &mut SqlServerConnection,
        stub: &TableStub,
    ) -> Result<Table, CodeGenError> {
        let mut table = Table::new(stub.schema_name.clone(), stub.table_name.clone());
        table.comment = stub.comment.clone();
        table.columns = self.read_columns(conn, &stub.table_name).await?;
        table.indexes = group_indexes(self.read_indexes(conn, &stub.table_name).await?);
        table.foreign_keys = self
            .read_foreign_keys(conn, &stub.schema_name, &stub.table_name)
            .await?;
        Ok(table)
    }
}

#[async_trait]
impl SchemaReader for SqlServerSchemaReader {
    async fn read_tables(&self) -> Result<Vec<Table>, CodeGenError> {
        let mut conn = self.pool.acquire(&self.connection_string).await?;
        let stubs = match self.enumerate_tables(&mut conn).await {
            Ok(stubs) => {
                self.pool.release(&self.connection_string, conn).await;
                stubs
            }
            Err(e) => {
                self.pool.release(&self.connection_string, conn).await;
                self.pool.clear().await;
                return Err(e);
            }
        };
        log::info!(
            "SQL Server: found {} tables in schema '{}'",
            stubs.len(),
            self.schema
        );
        read_tables_in_batches(self, &self.pool, &self.connection_string, stubs).await
    }
}
