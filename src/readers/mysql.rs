use std::sync::Arc;

use async_trait::async_trait;
use sqlx::mysql::MySqlRow;
use sqlx::{Connection, MySqlConnection, Row};

use crate::error::CodeGenError;
use crate::models::{Column, GeneratedKind, Table};
use crate::pool::{ConnectionPool, PoolableConnection};
use crate::readers::types::{canonical_mysql_type, normalize_rule};
use crate::readers::{
    fk_cache_key, group_foreign_keys, group_indexes, new_fk_cache, read_tables_in_batches,
    FkCache, FkRow, IndexRow, SchemaReader, TableDetailReader, TableStub,
};

#[async_trait]
impl PoolableConnection for MySqlConnection {
    async fn open(connection_string: &str) -> Result<Self, CodeGenError> {
        MySqlConnection::connect(connection_string)
            .await
            .map_err(|e| {
                log::error!("Failed to open MySQL connection: {}", e);
                e.into()
            })
    }

    async fn dispose(self) -> Result<(), CodeGenError> {
        self.close().await.map_err(Into::into)
    }
}

/// Read a string from a MySQL row by index.
/// MySQL 8 information_schema returns VARBINARY/BLOB instead of VARCHAR,
/// so try_get::<String> fails silently. This falls back to reading raw bytes.
fn mysql_row_str(row: &MySqlRow, idx: usize) -> String {
    row.try_get::<String, _>(idx).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(idx)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    })
}

/// Optional string variant of mysql_row_str.
fn mysql_row_str_opt(row: &MySqlRow, idx: usize) -> Option<String> {
    match row.try_get::<Option<String>, _>(idx) {
        Ok(val) => val,
        Err(_) => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()),
    }
}

/// Integer columns of information_schema vary between signed and unsigned
/// across server versions; accept either.
fn mysql_row_int(row: &MySqlRow, idx: usize) -> Option<i64> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map(|x| x as i64);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(i64::from);
    }
    None
}

/// Schema reader for MySQL / MariaDB, driven entirely by information_schema
/// against the current database.
pub struct MySqlSchemaReader {
    connection_string: String,
    pool: Arc<ConnectionPool<MySqlConnection>>,
    fk_cache: FkCache,
}

impl std::fmt::Debug for MySqlSchemaReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlSchemaReader").finish_non_exhaustive()
    }
}

impl MySqlSchemaReader {
    pub fn new(connection_string: impl Into<String>) -> Self {
        MySqlSchemaReader {
            connection_string: connection_string.into(),
            pool: Arc::new(ConnectionPool::with_default_size()),
            fk_cache: new_fk_cache(),
        }
    }

    async fn enumerate_tables(
        &self,
        conn: &mut MySqlConnection,
    ) -> Result<Vec<TableStub>, CodeGenError> {
        let rows = sqlx::query(
            r#"
            SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_COMMENT
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .iter()
            .map(|r| TableStub {
                schema_name: mysql_row_str(r, 0),
                table_name: mysql_row_str(r, 1),
                comment: mysql_row_str_opt(r, 2).filter(|c| !c.is_empty()),
            })
            .collect())
    }

    async fn read_columns(
        &self,
        conn: &mut MySqlConnection,
        table_name: &str,
    ) -> Result<Vec<Column>, CodeGenError> {
        let rows = sqlx::query(
            r#"
            SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, IS_NULLABLE, EXTRA, COLUMN_DEFAULT,
                   CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE,
                   COLLATION_NAME, COLUMN_COMMENT, GENERATION_EXPRESSION
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for r in &rows {
            let name = mysql_row_str(r, 0);
            let vendor_type = mysql_row_str(r, 1);
            let column_type = mysql_row_str(r, 2);
            let extra = mysql_row_str(r, 4);
            let is_auto_increment = extra.contains("auto_increment");

            let default_value = if is_auto_increment {
                None
            } else {
                match mysql_row_str_opt(r, 5) {
                    Some(val) if !val.is_empty() && !val.eq_ignore_ascii_case("null") => Some(val),
                    _ => None,
                }
            };

            let generated_kind = if extra.contains("STORED") {
                Some(GeneratedKind::Stored)
            } else if extra.contains("VIRTUAL") {
                Some(GeneratedKind::Virtual)
            } else {
                None
            };

            let mut column = Column::new(
                name,
                canonical_mysql_type(&vendor_type, &column_type),
                vendor_type,
            );
            column.is_nullable = mysql_row_str(r, 3) == "YES";
            column.is_identity = is_auto_increment;
            column.is_computed = generated_kind.is_some();
            column.computed_expression =
                mysql_row_str_opt(r, 11).filter(|expr| !expr.is_empty());
            column.default_value = default_value;
            column.generated_kind = generated_kind;
            column.collation = mysql_row_str_opt(r, 9).filter(|c| !c.is_empty());
            column.comment = mysql_row_str_opt(r, 10).filter(|c| !c.is_empty());
            if column.data_type == "string" {
                column.max_length = mysql_row_int(r, 6);
            }
            if column.data_type == "decimal" {
                column.precision = mysql_row_int(r, 7).map(|p| p as u32);
                column.scale = mysql_row_int(r, 8).map(|s| s as u32);
            }
            columns.push(column);
        }
        Ok(columns)
    }

    /// Primary-key membership comes from a follow-up query; MySQL names the
    /// PK constraint 'PRIMARY' unconditionally.
    async fn read_primary_key_columns(
        &self,
        conn: &mut MySqlConnection,
        table_name: &str,
    ) -> Result<Vec<String>, CodeGenError> {
        let rows = sqlx::query(
            r#"
            SELECT COLUMN_NAME
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.iter().map(|r| mysql_row_str(r, 0)).collect())
    }

    async fn read_indexes(
        &self,
        conn: &mut MySqlConnection,
        table_name: &str,
    ) -> Result<Vec<IndexRow>, CodeGenError> {
        let rows = sqlx::query(
            r#"
            SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE, SEQ_IN_INDEX, INDEX_TYPE
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
            "#,
        )
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let index_name = mysql_row_str(r, 0);
                let is_primary_key = index_name == "PRIMARY";
                IndexRow {
                    column_name: mysql_row_str(r, 1),
                    is_unique: mysql_row_int(r, 2).unwrap_or(1) == 0,
                    is_primary_key,
                    is_disabled: false,
                    index_type: mysql_row_str(r, 4),
                    key_ordinal: mysql_row_int(r, 3).unwrap_or(0) as u32,
                    is_descending: false,
                    is_included: false,
                    index_name,
                }
            })
            .collect())
    }

    async fn read_foreign_keys(
        &self,
        conn: &mut MySqlConnection,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<crate::models::ForeignKey>, CodeGenError> {
        let cache_key = fk_cache_key(&self.connection_string, schema_name, table_name);
        {
            let cache = self.fk_cache.read().await;
            if let Some(cached) = cache.get(&cache_key) {
                log::debug!("MySQL: FK cache hit for {}", table_name);
                return Ok(cached.clone());
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT
                kcu.CONSTRAINT_NAME,
                kcu.COLUMN_NAME,
                kcu.REFERENCED_TABLE_NAME,
                kcu.REFERENCED_COLUMN_NAME,
                rc.UPDATE_RULE,
                rc.DELETE_RULE
            FROM information_schema.KEY_COLUMN_USAGE kcu
            JOIN information_schema.REFERENTIAL_CONSTRAINTS rc
            ON kcu.CONSTRAINT_NAME = rc.CONSTRAINT_NAME
            AND kcu.CONSTRAINT_SCHEMA = rc.CONSTRAINT_SCHEMA
            WHERE kcu.TABLE_SCHEMA = DATABASE()
            AND kcu.TABLE_NAME = ?
            AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
            "#,
        )
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        let fk_rows: Vec<FkRow> = rows
            .iter()
            .map(|r| FkRow {
                constraint_name: mysql_row_str(r, 0),
                fk_column: mysql_row_str(r, 1),
                referenced_table: mysql_row_str(r, 2),
                pk_column: mysql_row_str(r, 3),
                update_rule: normalize_rule(&mysql_row_str(r, 4)),
                delete_rule: normalize_rule(&mysql_row_str(r, 5)),
                is_enabled: true,
                comment: None,
            })
            .collect();
        let keys = group_foreign_keys(fk_rows)?;

        let mut cache = self.fk_cache.write().await;
        cache.insert(cache_key, keys.clone());
        Ok(keys)
    }
}

#[async_trait]
impl TableDetailReader<MySqlConnection> for MySqlSchemaReader {
    async fn read_table(
        &self,
        conn: &mut MySqlConnection,
        stub: &TableStub,
    ) -> Result<Table, CodeGenError> {
        let mut table = Table::new(stub.schema_name.clone(), stub.table_name.clone());
        table.comment = stub.comment.clone();

        table.columns = self.read_columns(conn, &stub.table_name).await?;
        for pk in self
            .read_primary_key_columns(conn, &stub.table_name)
            .await?
        {
            if let Some(column) = table.columns.iter_mut().find(|c| c.name == pk) {
                column.is_primary_key = true;
            }
        }
        table.indexes = group_indexes(self.read_indexes(conn, &stub.table_name).await?);
        table.foreign_keys = self
            .read_foreign_keys(conn, &stub.schema_name, &stub.table_name)
            .await?;
        Ok(table)
    }
}

#[async_trait]
impl SchemaReader for MySqlSchemaReader {
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
        log::info!("MySQL: found {} tables", stubs.len());
        read_tables_in_batches(self, &self.pool, &self.connection_string, stubs).await
    }
}
