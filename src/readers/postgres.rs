use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Connection, FromRow, PgConnection};

use crate::error::CodeGenError;
use crate::models::{Column, GeneratedKind, Table};
use crate::pool::{ConnectionPool, PoolableConnection};
use crate::readers::types::{parse_postgres_type, rule_from_pg_char};
use crate::readers::{
    fk_cache_key, group_foreign_keys, group_indexes, new_fk_cache, read_tables_in_batches,
    FkCache, FkRow, IndexRow, SchemaReader, TableDetailReader, TableStub,
};

pub const DEFAULT_SCHEMA: &str = "public";

#[async_trait]
impl PoolableConnection for PgConnection {
    async fn open(connection_string: &str) -> Result<Self, CodeGenError> {
        PgConnection::connect(connection_string).await.map_err(|e| {
            log::error!("Failed to open PostgreSQL connection: {}", e);
            e.into()
        })
    }

    async fn dispose(self) -> Result<(), CodeGenError> {
        self.close().await.map_err(Into::into)
    }
}

#[derive(Debug, FromRow)]
struct TableRow {
    schema_name: String,
    table_name: String,
    table_comment: Option<String>,
}

#[derive(Debug, FromRow)]
struct ColumnRow {
    column_name: String,
    data_type: String,
    is_nullable: bool,
    is_identity: bool,
    identity_always: bool,
    is_generated: bool,
    default_value: Option<String>,
    column_comment: Option<String>,
    collation_name: Option<String>,
}

#[derive(Debug, FromRow)]
struct PgIndexRow {
    index_name: String,
    column_name: String,
    is_unique: bool,
    is_primary_key: bool,
    is_disabled: bool,
    index_type: String,
    key_ordinal: i32,
}

#[derive(Debug, FromRow)]
struct PgFkRow {
    constraint_name: String,
    referenced_table: String,
    fk_column: String,
    pk_column: String,
    delete_action: String,
    update_action: String,
    is_validated: bool,
    constraint_comment: Option<String>,
}

/// Schema reader for PostgreSQL, driven by the pg_catalog tables.
pub struct PostgresSchemaReader {
    connection_string: String,
    schema: String,
    pool: Arc<ConnectionPool<PgConnection>>,
    fk_cache: FkCache,
}

impl std::fmt::Debug for PostgresSchemaReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSchemaReader")
            .finish_non_exhaustive()
    }
}

impl PostgresSchemaReader {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self::with_schema(connection_string, DEFAULT_SCHEMA)
    }

    pub fn with_schema(
        connection_string: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        PostgresSchemaReader {
            connection_string: connection_string.into(),
            schema: schema.into(),
            pool: Arc::new(ConnectionPool::with_default_size()),
            fk_cache: new_fk_cache(),
        }
    }

    async fn enumerate_tables(
        &self,
        conn: &mut PgConnection,
    ) -> Result<Vec<TableStub>, CodeGenError> {
        let rows: Vec<TableRow> = sqlx::query_as(
            r#"
            SELECT n.nspname::text AS schema_name,
                   c.relname::text AS table_name,
                   obj_description(c.oid, 'pg_class') AS table_comment
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind = 'r' AND n.nspname = $1
            ORDER BY c.relname
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| TableStub {
                schema_name: r.schema_name,
                table_name: r.table_name,
                comment: r.table_comment,
            })
            .collect())
    }

    async fn read_columns(
        &self,
        conn: &mut PgConnection,
        table_name: &str,
    ) -> Result<Vec<Column>, CodeGenError> {
        let rows: Vec<ColumnRow> = sqlx::query_as(
            r#"
            SELECT a.attname::text AS column_name,
                   format_type(a.atttypid, a.atttypmod) AS data_type,
                   NOT a.attnotnull AS is_nullable,
                   (a.attidentity <> '') AS is_identity,
                   (a.attidentity = 'a') AS identity_always,
                   (a.attgenerated <> '') AS is_generated,
                   pg_get_expr(ad.adbin, ad.adrelid) AS default_value,
                   col_description(c.oid, a.attnum::int) AS column_comment,
                   co.collname::text AS collation_name
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_attrdef ad ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum
            LEFT JOIN pg_collation co ON co.oid = a.attcollation AND co.collname <> 'default'
            WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
        )
        .bind(&self.schema)
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let parsed = parse_postgres_type(&r.data_type);
                let mut column = Column::new(r.column_name, parsed.data_type, parsed.base);
                column.is_nullable = r.is_nullable;
                column.is_identity = r.is_identity;
                column.max_length = parsed.max_length;
                column.precision = parsed.precision;
                column.scale = parsed.scale;
                column.collation = r.collation_name;
                column.comment = r.column_comment;
                if r.is_generated {
                    // stored generated column; the attrdef expression is the
                    // generation expression, not a default
                    column.is_computed = true;
                    column.generated_kind = Some(GeneratedKind::Stored);
                    column.computed_expression = r.default_value;
                } else {
                    column.default_value = r.default_value;
                    if r.identity_always {
                        column.generated_kind = Some(GeneratedKind::Always);
                    }
                }
                column
            })
            .collect())
    }

    async fn read_primary_key_columns(
        &self,
        conn: &mut PgConnection,
        table_name: &str,
    ) -> Result<Vec<String>, CodeGenError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
            WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2
            ORDER BY k.ord
            "#,
        )
        .bind(&self.schema)
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn read_indexes(
        &self,
        conn: &mut PgConnection,
        table_name: &str,
    ) -> Result<Vec<IndexRow>, CodeGenError> {
        let rows: Vec<PgIndexRow> = sqlx::query_as(
            r#"
            SELECT ic.relname::text AS index_name,
                   a.attname::text AS column_name,
                   i.indisunique AS is_unique,
                   i.indisprimary AS is_primary_key,
                   NOT i.indisvalid AS is_disabled,
                   am.amname::text AS index_type,
                   k.ord::int AS key_ordinal
            FROM pg_index i
            JOIN pg_class ic ON ic.oid = i.indexrelid
            JOIN pg_class tc ON tc.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = tc.relnamespace
            JOIN pg_am am ON am.oid = ic.relam
            CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = tc.oid AND a.attnum = k.attnum
            WHERE n.nspname = $1 AND tc.relname = $2
            ORDER BY ic.relname, k.ord
            "#,
        )
        .bind(&self.schema)
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| IndexRow {
                index_name: r.index_name,
                column_name: r.column_name,
                is_unique: r.is_unique,
                is_primary_key: r.is_primary_key,
                is_disabled: r.is_disabled,
                index_type: r.index_type,
                key_ordinal: r.key_ordinal as u32,
                is_descending: false,
                is_included: false,
            })
            .collect())
    }

    async fn read_foreign_keys(
        &self,
        conn: &mut PgConnection,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<crate::models::ForeignKey>, CodeGenError> {
        let cache_key = fk_cache_key(&self.connection_string, schema_name, table_name);
        {
            let cache = self.fk_cache.read().await;
            if let Some(cached) = cache.get(&cache_key) {
                log::debug!("PostgreSQL: FK cache hit for {}", table_name);
                return Ok(cached.clone());
            }
        }

        let rows: Vec<PgFkRow> = sqlx::query_as(
            r#"
            SELECT con.conname::text AS constraint_name,
                   ref.relname::text AS referenced_table,
                   src_a.attname::text AS fk_column,
                   ref_a.attname::text AS pk_column,
                   con.confdeltype::text AS delete_action,
                   con.confupdtype::text AS update_action,
                   con.convalidated AS is_validated,
                   obj_description(con.oid, 'pg_constraint') AS constraint_comment
            FROM pg_constraint con
            JOIN pg_class src ON src.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = src.relnamespace
            JOIN pg_class ref ON ref.oid = con.confrelid
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
                WITH ORDINALITY AS k(attnum, fattnum, ord)
            JOIN pg_attribute src_a ON src_a.attrelid = con.conrelid AND src_a.attnum = k.attnum
            JOIN pg_attribute ref_a ON ref_a.attrelid = con.confrelid AND ref_a.attnum = k.fattnum
            WHERE con.contype = 'f' AND n.nspname = $1 AND src.relname = $2
            ORDER BY con.conname, k.ord
            "#,
        )
        .bind(&self.schema)
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        let fk_rows: Vec<FkRow> = rows
            .into_iter()
            .map(|r| FkRow {
                constraint_name: r.constraint_name,
                referenced_table: r.referenced_table,
                fk_column: r.fk_column,
                pk_column: r.pk_column,
                delete_rule: rule_from_pg_char(&r.delete_action),
                update_rule: rule_from_pg_char(&r.update_action),
                is_enabled: r.is_validated,
                comment: r.constraint_comment,
            })
            .collect();
        let keys = group_foreign_keys(fk_rows)?;

        let mut cache = self.fk_cache.write().await;
        cache.insert(cache_key, keys.clone());
        Ok(keys)
    }
}

#[async_trait]
impl TableDetailReader<PgConnection> for PostgresSchemaReader {
    async fn read_table(
        &self,
        conn: &mut PgConnection,
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
impl SchemaReader for PostgresSchemaReader {
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
            "PostgreSQL: found {} tables in schema '{}'",
            stubs.len(),
            self.schema
        );
        read_tables_in_batches(self, &self.pool, &self.connection_string, stubs).await
    }
}
