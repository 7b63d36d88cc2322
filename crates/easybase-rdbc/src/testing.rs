//! Scripted in-process database for tests
//!
//! [`ScriptedDatabase`] records every statement with its parameters and the
//! connection it ran on, answers `information_schema` lookups from a table
//! list kept current by `CREATE TABLE` / `DROP TABLE`, and returns canned
//! rows for queries matching a registered SQL fragment.
//!
//! ```rust,ignore
//! use easybase_rdbc::testing::ScriptedDatabase;
//!
//! let db = ScriptedDatabase::new("PostgreSQL 16");
//! db.respond("FROM \"orders\"", vec![Row::new(vec!["id".into()], vec![Value::from("a1")])]);
//! let manager = DataSourceManager::connect(db.factory(), PoolConfig::new("scripted://")).await?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// One statement as the database saw it
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Connection number, starting at 1
    pub connection: usize,
    /// SQL text
    pub sql: String,
    /// Bound parameters
    pub params: Vec<Value>,
    /// Whether it ran between BEGIN and COMMIT/ROLLBACK
    pub in_transaction: bool,
}

/// Shared state behind every scripted connection
#[derive(Debug)]
pub struct ScriptedDatabase {
    product: String,
    tables: Mutex<Vec<String>>,
    log: Mutex<Vec<Statement>>,
    responses: Mutex<Vec<(String, Vec<Row>)>>,
    affected: Mutex<Vec<(String, u64)>>,
    failures: Mutex<Vec<String>>,
    opened: AtomicUsize,
    valid: AtomicBool,
}

impl ScriptedDatabase {
    /// Empty database reporting `product` as its product name
    pub fn new(product: &str) -> Arc<Self> {
        Arc::new(Self {
            product: product.to_string(),
            tables: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            affected: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
            valid: AtomicBool::new(true),
        })
    }

    /// Pretend these tables exist
    pub fn with_tables(self: Arc<Self>, tables: &[&str]) -> Arc<Self> {
        self.tables
            .lock()
            .extend(tables.iter().map(|t| t.to_lowercase()));
        self
    }

    /// Factory handing out connections to this database
    pub fn factory(self: &Arc<Self>) -> Arc<dyn ConnectionFactory> {
        Arc::new(ScriptedFactory {
            db: Arc::clone(self),
        })
    }

    /// Queries containing `fragment` return `rows`; later registrations win
    pub fn respond(&self, fragment: &str, rows: Vec<Row>) {
        self.responses.lock().push((fragment.to_string(), rows));
    }

    /// Statements containing `fragment` report `count` affected rows
    ///
    /// Unmatched INSERT/UPDATE/DELETE statements report 1, everything else 0.
    pub fn affect(&self, fragment: &str, count: u64) {
        self.affected.lock().push((fragment.to_string(), count));
    }

    /// The next statement containing `fragment` fails with a unique violation
    pub fn fail_next(&self, fragment: &str) {
        self.failures.lock().push(fragment.to_string());
    }

    /// Make `is_valid` report dead connections
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// Every statement so far
    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().clone()
    }

    /// Every statement containing `fragment`
    pub fn matching(&self, fragment: &str) -> Vec<Statement> {
        self.log
            .lock()
            .iter()
            .filter(|s| s.sql.contains(fragment))
            .cloned()
            .collect()
    }

    /// Number of `information_schema` lookups
    pub fn lookups(&self) -> usize {
        self.matching("information_schema").len()
    }

    /// Physical connections opened
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Whether a table is currently known
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.lock().contains(&table.to_lowercase())
    }

    fn record(&self, connection: usize, sql: &str, params: &[Value], in_transaction: bool) {
        self.log.lock().push(Statement {
            connection,
            sql: sql.to_string(),
            params: params.to_vec(),
            in_transaction,
        });
    }

    fn take_failure(&self, sql: &str) -> Result<()> {
        let mut failures = self.failures.lock();
        match failures.iter().position(|f| sql.contains(f.as_str())) {
            Some(pos) => {
                let fragment = failures.remove(pos);
                Err(Error::constraint(
                    "scripted",
                    format!("scripted failure on '{}'", fragment),
                ))
            }
            None => Ok(()),
        }
    }

    fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        self.take_failure(sql)?;
        if sql.contains("information_schema") {
            let found = self
                .tables
                .lock()
                .iter()
                .any(|t| sql.contains(&format!("'{}'", t)));
            return Ok(vec![Row::new(
                vec!["table_count".into()],
                vec![Value::Int64(i64::from(found))],
            )]);
        }
        Ok(self
            .responses
            .lock()
            .iter()
            .rev()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn run_execute(&self, sql: &str) -> Result<u64> {
        self.take_failure(sql)?;
        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let name = rest
                .trim_start_matches("IF NOT EXISTS ")
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or_default()
                .trim_matches('"')
                .to_lowercase();
            self.tables.lock().push(name);
            return Ok(0);
        }
        if let Some(rest) = sql.strip_prefix("DROP TABLE IF EXISTS ") {
            let name = rest.trim().trim_matches('"').to_lowercase();
            self.tables.lock().retain(|t| *t != name);
            return Ok(0);
        }
        if let Some((_, count)) = self
            .affected
            .lock()
            .iter()
            .rev()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
        {
            return Ok(*count);
        }
        let dml = ["INSERT", "UPDATE", "DELETE"]
            .iter()
            .any(|kw| sql.trim_start().starts_with(kw));
        Ok(u64::from(dml))
    }
}

/// Factory for [`ScriptedConnection`]s
#[derive(Debug)]
pub struct ScriptedFactory {
    db: Arc<ScriptedDatabase>,
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let id = self.db.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(ScriptedConnection {
            db: Arc::clone(&self.db),
            id,
            closed: AtomicBool::new(false),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::detect(&self.db.product)
    }
}

/// One connection to a [`ScriptedDatabase`]
#[derive(Debug)]
pub struct ScriptedConnection {
    db: Arc<ScriptedDatabase>,
    id: usize,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.db.record(self.id, sql, params, false);
        self.db.run_query(sql)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.db.record(self.id, sql, params, false);
        self.db.run_execute(sql)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.db.record(self.id, "BEGIN", &[], true);
        Ok(Box::new(ScriptedTransaction {
            db: Arc::clone(&self.db),
            id: self.id,
        }))
    }

    async fn product_name(&self) -> Result<String> {
        Ok(self.db.product.clone())
    }

    async fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.db.valid.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transaction on a [`ScriptedConnection`]
#[derive(Debug)]
pub struct ScriptedTransaction {
    db: Arc<ScriptedDatabase>,
    id: usize,
}

#[async_trait]
impl Transaction for ScriptedTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.db.record(self.id, sql, params, true);
        self.db.run_query(sql)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.db.record(self.id, sql, params, true);
        self.db.run_execute(sql)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.db.record(self.id, "COMMIT", &[], true);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.db.record(self.id, "ROLLBACK", &[], true);
        Ok(())
    }
}
