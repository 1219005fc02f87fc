use crate::errors::{Error, Result, StoreError};
use crate::model::Fields;
use crate::store::Store;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{debug, error, info};

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    Ok(pool)
}

/// Table and column names for one [`PostgresStore`].
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub table: String,
    pub partition_key: String,
    /// `None` for keyed-item tables such as calibration.
    pub sort_key: Option<String>,
}

impl TableLayout {
    fn validate(&self) -> Result<()> {
        let names = [Some(&self.table), Some(&self.partition_key), self.sort_key.as_ref()];
        for name in names.into_iter().flatten() {
            if !is_identifier(name) {
                return Err(Error::Config(format!("invalid SQL identifier: {:?}", name)));
            }
        }
        Ok(())
    }

    /// DDL for a table with this layout. Ranged tables key on `(partition, sort)`.
    fn create_table_sql(&self) -> String {
        let TableLayout {
            table,
            partition_key: pk,
            sort_key,
        } = self;
        match sort_key {
            Some(sk) => format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                     {pk} TEXT NOT NULL,
                     {sk} BIGINT NOT NULL,
                     fields JSONB NOT NULL,
                     PRIMARY KEY ({pk}, {sk})
                 )"
            ),
            None => format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                     {pk} TEXT PRIMARY KEY,
                     fields JSONB NOT NULL
                 )"
            ),
        }
    }

    /// Columns this layout needs that `existing` lacks. Unquoted identifiers
    /// fold to lower case in PostgreSQL, so names compare case-insensitively.
    fn missing_columns(&self, existing: &[String]) -> Vec<String> {
        [Some(&self.partition_key), self.sort_key.as_ref()]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .chain(["fields"])
            .filter(|name| !existing.iter().any(|c| c.eq_ignore_ascii_case(name)))
            .map(str::to_string)
            .collect()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// PostgreSQL-backed [`Store`]. Row values live in a JSONB `fields` column.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    layout: TableLayout,
}

impl PostgresStore {
    /// Create the table for `layout` if absent and check an existing one has its columns.
    pub async fn open(pool: PgPool, layout: TableLayout) -> Result<Self> {
        layout.validate()?;
        sqlx::query(&layout.create_table_sql())
            .execute(&pool)
            .await?;

        let columns: Vec<(String,)> = sqlx::query_as(
            "SELECT column_name::text FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(layout.table.to_ascii_lowercase())
        .fetch_all(&pool)
        .await?;
        let columns: Vec<String> = columns.into_iter().map(|(name,)| name).collect();

        let missing = layout.missing_columns(&columns);
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "table {} exists without column(s) {}",
                layout.table,
                missing.join(", ")
            )));
        }

        info!(table = %layout.table, "Table ready");
        Ok(Self { pool, layout })
    }

    fn sort_column(&self) -> std::result::Result<&str, StoreError> {
        self.layout.sort_key.as_deref().ok_or_else(|| {
            StoreError::Rejected(format!("table {} has no sort key", self.layout.table))
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn put(
        &self,
        partition_key: &str,
        sort_key: Option<i64>,
        fields: Fields,
    ) -> std::result::Result<(), StoreError> {
        let TableLayout {
            table,
            partition_key: pk,
            ..
        } = &self.layout;

        let result = match sort_key {
            Some(sort_key) => {
                let sk = self.sort_column()?;
                let query = format!(
                    "INSERT INTO {table} ({pk}, {sk}, fields) VALUES ($1, $2, $3)
                     ON CONFLICT ({pk}, {sk}) DO UPDATE SET fields = EXCLUDED.fields"
                );
                sqlx::query(&query)
                    .bind(partition_key)
                    .bind(sort_key)
                    .bind(Json(&fields))
                    .execute(&self.pool)
                    .await
            }
            None => {
                if self.layout.sort_key.is_some() {
                    return Err(StoreError::Rejected(format!(
                        "table {} requires a sort key",
                        table
                    )));
                }
                let query = format!(
                    "INSERT INTO {table} ({pk}, fields) VALUES ($1, $2)
                     ON CONFLICT ({pk}) DO UPDATE SET fields = EXCLUDED.fields"
                );
                sqlx::query(&query)
                    .bind(partition_key)
                    .bind(Json(&fields))
                    .execute(&self.pool)
                    .await
            }
        };

        result.map_err(classify)?;
        debug!(table = %table, partition_key, ?sort_key, "Row written");
        Ok(())
    }

    async fn get_item(&self, partition_key: &str) -> std::result::Result<Option<Fields>, StoreError> {
        let TableLayout {
            table,
            partition_key: pk,
            ..
        } = &self.layout;
        let query = format!("SELECT fields FROM {table} WHERE {pk} = $1");

        let row: Option<(Json<Fields>,)> = sqlx::query_as(&query)
            .bind(partition_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        Ok(row.map(|(Json(fields),)| fields))
    }

    async fn query_range(
        &self,
        partition_key: &str,
        from: i64,
        to: i64,
    ) -> std::result::Result<Vec<(i64, Fields)>, StoreError> {
        let sk = self.sort_column()?;
        let TableLayout {
            table,
            partition_key: pk,
            ..
        } = &self.layout;
        let query = format!(
            "SELECT {sk}, fields FROM {table}
             WHERE {pk} = $1 AND {sk} BETWEEN $2 AND $3
             ORDER BY {sk} ASC"
        );

        let rows: Vec<(i64, Json<Fields>)> = sqlx::query_as(&query)
            .bind(partition_key)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        Ok(rows.into_iter().map(|(k, Json(f))| (k, f)).collect())
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    if is_transient_error(&err) {
        StoreError::Unavailable(err.to_string())
    } else {
        error!("Database request rejected: {}", err);
        StoreError::Rejected(err.to_string())
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Check if it's a connection-related error
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" || // too_many_connections
                code == "40001" // serialization_failure
            })
        }
        _ => false,
    }
}
