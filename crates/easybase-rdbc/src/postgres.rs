//! PostgreSQL backend implementation for easybase-rdbc
//!
//! Connection, transaction and factory over `tokio-postgres`.

use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tracing::{debug, error};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// NULL parameter accepted for any column type
///
/// `Option::<T>::None` is type-checked against `T`, which rejects binding a
/// NULL into a column of a different type.
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

type PgParam = Box<dyn ToSql + Sync + Send>;

/// Convert a Value to a tokio-postgres parameter
fn value_to_sql(value: &Value) -> PgParam {
    match value {
        Value::Null => Box::new(SqlNull),
        Value::Bool(b) => Box::new(*b),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::String(s) => Box::new(s.clone()),
        Value::Date(d) => Box::new(*d),
        Value::DateTime(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
    }
}

fn param_refs(boxed: &[PgParam]) -> Vec<&(dyn ToSql + Sync)> {
    boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Map a tokio-postgres error into the crate taxonomy
fn map_pg_error(err: tokio_postgres::Error, sql: &str) -> Error {
    if err.is_closed() {
        return Error::unavailable_with_source("connection closed", err);
    }
    if let Some(db) = err.as_db_error() {
        if db.code() == &SqlState::UNIQUE_VIOLATION {
            return Error::constraint(db.constraint().unwrap_or("unique"), db.message());
        }
        if db.code() == &SqlState::UNDEFINED_TABLE {
            return Error::TableNotFound(db.table().unwrap_or_default().to_string());
        }
        if db.code() == &SqlState::QUERY_CANCELED {
            return Error::Timeout(db.message().to_string());
        }
    }
    Error::Statement {
        message: err.to_string(),
        sql: Some(sql.to_string()),
        source: Some(Box::new(err)),
    }
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

fn get_opt<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Convert a PostgreSQL column value to a Value
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Value {
    match *pg_type {
        Type::BOOL => get_opt::<bool>(row, idx).into(),
        Type::INT2 => get_opt::<i16>(row, idx).map(i32::from).into(),
        Type::INT4 => get_opt::<i32>(row, idx).into(),
        Type::INT8 => get_opt::<i64>(row, idx).into(),
        Type::FLOAT4 => get_opt::<f32>(row, idx).into(),
        Type::FLOAT8 => get_opt::<f64>(row, idx).into(),
        Type::DATE => get_opt::<chrono::NaiveDate>(row, idx).into(),
        Type::TIMESTAMP => get_opt::<chrono::NaiveDateTime>(row, idx).into(),
        Type::TIMESTAMPTZ => get_opt::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|dt| dt.naive_utc())
            .into(),
        Type::UUID => get_opt::<uuid::Uuid>(row, idx).into(),
        Type::JSON | Type::JSONB => get_opt::<serde_json::Value>(row, idx)
            .map(|j| j.to_string())
            .into(),
        // VARCHAR, TEXT, BPCHAR, NAME and anything else readable as text
        _ => get_opt::<String>(row, idx).into(),
    }
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
    query_timeout: Option<Duration>,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
            query_timeout: None,
        }
    }

    /// Apply a per-statement timeout
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::unavailable("connection is closed"));
        }
        Ok(())
    }

    async fn with_timeout<T, F>(&self, sql: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, tokio_postgres::Error>>,
    {
        match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout(format!("statement exceeded {:?}", limit)))?
                .map_err(|e| map_pg_error(e, sql)),
            None => fut.await.map_err(|e| map_pg_error(e, sql)),
        }
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let boxed: Vec<PgParam> = params.iter().map(value_to_sql).collect();
        let refs = param_refs(&boxed);

        let pg_rows = self.with_timeout(sql, self.client.query(sql, &refs)).await?;
        Ok(pg_rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let boxed: Vec<PgParam> = params.iter().map(value_to_sql).collect();
        let refs = param_refs(&boxed);

        self.with_timeout(sql, self.client.execute(sql, &refs)).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::transaction(e.to_string(), e))?;

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            finished: AtomicBool::new(false),
        }))
    }

    async fn product_name(&self) -> Result<String> {
        let row = self
            .query_one("SELECT version() AS version", &[])
            .await?
            .ok_or_else(|| Error::statement("no rows returned", "SELECT version()"))?;
        row.get(0)
            .and_then(Value::as_string)
            .ok_or_else(|| Error::TypeConversion("version() is not text".into()))
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
    finished: AtomicBool,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let boxed: Vec<PgParam> = params.iter().map(value_to_sql).collect();
        let refs = param_refs(&boxed);

        let pg_rows = self
            .client
            .query(sql, &refs)
            .await
            .map_err(|e| map_pg_error(e, sql))?;
        Ok(pg_rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let boxed: Vec<PgParam> = params.iter().map(value_to_sql).collect();
        let refs = param_refs(&boxed);

        self.client
            .execute(sql, &refs)
            .await
            .map_err(|e| map_pg_error(e, sql))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| Error::transaction(e.to_string(), e))?;
        self.finished.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| Error::transaction(e.to_string(), e))?;
        self.finished.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Relaxed) {
            // Dropped without commit/rollback: the server keeps the transaction
            // open until the next statement, so roll it back in the background.
            let client = Arc::clone(&self.client);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = client.batch_execute("ROLLBACK").await;
                });
            }
        }
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::unavailable_with_source("invalid connection url", e))?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::unavailable_with_source("failed to connect", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection task terminated");
            }
        });
        debug!("PostgreSQL connection established");

        let query_timeout =
            (config.query_timeout_ms > 0).then(|| Duration::from_millis(config.query_timeout_ms));
        Ok(Box::new(PgConnection::new(client).with_query_timeout(query_timeout)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}
