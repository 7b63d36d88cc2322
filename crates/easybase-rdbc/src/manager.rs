//! Data source manager
//!
//! Wraps a [`ConnectionPool`] with the dialect detected from the server's
//! product name, the DDL templates derived from it, and a memoised
//! table-existence cache. Each statement borrows a pooled connection for
//! its round trip; [`DataSourceManager::begin`] pins one for the whole
//! transaction. The cache is only ever invalidated explicitly:
//! callers that create or drop tables go through [`DataSourceManager::create_table`]
//! and [`DataSourceManager::drop_table`], which do it for them.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::connection::{ConnectionFactory, Transaction};
use crate::dialect::{detect_dialect, DdlTemplates, SqlDialect};
use crate::error::Result;
use crate::pool::{ConnectionPool, PoolConfig, PoolStats};
use crate::security::validate_sql_identifier;
use crate::types::{Row, Value};

/// Relational store handle shared by the registry and the sync engine
pub struct DataSourceManager {
    pool: Arc<ConnectionPool>,
    dialect: Arc<dyn SqlDialect>,
    templates: DdlTemplates,
    product_name: String,
    /// lower-cased table name -> exists
    table_cache: DashMap<String, bool>,
}

impl std::fmt::Debug for DataSourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceManager")
            .field("dialect", &self.dialect.name())
            .field("product_name", &self.product_name)
            .field("pool", &self.pool.stats())
            .field("cached_tables", &self.table_cache.len())
            .finish()
    }
}

impl DataSourceManager {
    /// Open a pool through `factory` and detect the dialect
    pub async fn connect(factory: Arc<dyn ConnectionFactory>, config: PoolConfig) -> Result<Self> {
        let pool = ConnectionPool::open(config, factory).await?;
        Self::new(pool).await
    }

    /// Wrap an open pool, detecting the dialect from the server's product name
    pub async fn new(pool: Arc<ConnectionPool>) -> Result<Self> {
        let product_name = pool.get().await?.product_name().await?;
        let dialect: Arc<dyn SqlDialect> = Arc::from(detect_dialect(&product_name));
        info!(
            product = %product_name,
            dialect = dialect.name(),
            "Detected database dialect"
        );
        Ok(Self::with_dialect(pool, dialect, product_name))
    }

    /// Wrap a pool with an explicitly chosen dialect
    pub fn with_dialect(
        pool: Arc<ConnectionPool>,
        dialect: Arc<dyn SqlDialect>,
        product_name: impl Into<String>,
    ) -> Self {
        let templates = dialect.templates();
        Self {
            pool,
            dialect,
            templates,
            product_name: product_name.into(),
            table_cache: DashMap::new(),
        }
    }

    /// Active dialect
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// DDL templates for the active dialect
    pub fn templates(&self) -> &DdlTemplates {
        &self.templates
    }

    /// Product name reported by the server
    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    /// Underlying pool
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Pool counters
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Execute a DDL statement after template substitution
    pub async fn execute_ddl(&self, sql: &str) -> Result<()> {
        let sql = self.templates.apply(sql);
        debug!(sql = %sql, "Executing DDL");
        self.pool.get().await?.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Check whether a table exists, consulting the cache first
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let key = table.to_lowercase();
        if let Some(exists) = self.table_cache.get(&key) {
            return Ok(*exists);
        }

        validate_sql_identifier(table)?;
        let sql = self.dialect.table_exists_sql(table);
        let exists = self
            .pool
            .get()
            .await?
            .query_one(&sql, &[])
            .await?
            .and_then(|row| row.get(0).and_then(Value::as_i64))
            .is_some_and(|count| count > 0);

        self.table_cache.insert(key, exists);
        Ok(exists)
    }

    /// Forget the cached existence flag for a table
    pub fn invalidate_table_cache(&self, table: &str) {
        self.table_cache.remove(&table.to_lowercase());
    }

    /// Forget every cached existence flag
    pub fn clear_table_cache(&self) {
        self.table_cache.clear();
    }

    /// Number of tables with a cached existence flag
    pub fn cached_tables(&self) -> usize {
        self.table_cache.len()
    }

    /// Execute DDL that affects `table` and invalidate its cache entry
    ///
    /// The entry is dropped whether or not the statement succeeded.
    pub async fn execute_ddl_for_table(&self, table: &str, ddl: &str) -> Result<()> {
        validate_sql_identifier(table)?;
        let result = self.execute_ddl(ddl).await;
        self.invalidate_table_cache(table);
        result
    }

    /// Run a `CREATE TABLE` statement for `table`
    pub async fn create_table(&self, table: &str, ddl: &str) -> Result<()> {
        self.execute_ddl_for_table(table, ddl).await
    }

    /// `DROP TABLE IF EXISTS` and invalidate the table's cache entry
    pub async fn drop_table(&self, table: &str) -> Result<()> {
        let sql = self.dialect.drop_table_sql(table);
        self.execute_ddl_for_table(table, &sql).await
    }

    /// Run a query on a pooled connection
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.pool.get().await?.query(sql, params).await
    }

    /// Run a statement on a pooled connection
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.pool.get().await?.execute(sql, params).await
    }

    /// Begin a transaction that owns a pooled connection until it finishes
    pub async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.pool.begin().await
    }

    /// Close the pool's idle connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
