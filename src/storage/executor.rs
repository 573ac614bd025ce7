//! Statement execution with connection-scoped transactions

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ToSql, TransactionBehavior};
use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use crate::Result;

/// One result row, as owned SQL values in column order
pub type Row = Vec<Value>;

/// Parameters bound to a single statement
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    /// Bound to `?` placeholders in order
    Positional(Vec<Value>),
    /// Bound by name; keys carry their prefix, e.g. `:ip`
    Named(Vec<(String, Value)>),
}

/// Runs one statement against the store and hands back its rows
pub trait Executor: Send + Sync {
    /// Execute `statement` inside its own transaction, retrying per policy
    fn execute(&self, statement: &str, params: &Params) -> Result<Vec<Row>>;

    /// Drop any cached connection, e.g. before the store file is replaced
    fn invalidate(&self) {}

    /// Path of the store file this executor writes to
    fn path(&self) -> &Path;
}

/// How writers reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Fresh connection per statement; SQLite locking plus retry resolves conflicts
    #[default]
    PerCall,
    /// One connection behind a mutex; writers queue in-process
    Serialized,
}

/// Open a connection with the busy timeout writers rely on
pub fn open_connection(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

/// Run a statement once inside an immediate transaction.
///
/// The transaction rolls back on drop unless the commit is reached.
fn run_once(conn: &mut Connection, statement: &str, params: &Params) -> rusqlite::Result<Vec<Row>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let rows = {
        let mut stmt = tx.prepare(statement)?;
        let width = stmt.column_count();
        let mut rows = match params {
            Params::None => stmt.query([])?,
            Params::Positional(values) => stmt.query(params_from_iter(values.iter()))?,
            Params::Named(pairs) => {
                let named: Vec<(&str, &dyn ToSql)> = pairs
                    .iter()
                    .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                    .collect();
                stmt.query(named.as_slice())?
            }
        };

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(row.get::<_, Value>(idx)?);
            }
            out.push(values);
        }
        out
    };
    tx.commit()?;
    Ok(rows)
}

/// Opens an independent connection for every call.
///
/// Nothing is shared between calls or threads; contention is left to SQLite's
/// file locking, and the retry policy absorbs whatever still fails.
#[derive(Debug, Clone)]
pub struct StatementExecutor {
    path: PathBuf,
    busy_timeout: Duration,
    retry: RetryPolicy,
}

impl StatementExecutor {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
            retry,
        }
    }
}

impl Executor for StatementExecutor {
    fn execute(&self, statement: &str, params: &Params) -> Result<Vec<Row>> {
        self.retry.run(statement, || {
            let mut conn = open_connection(&self.path, self.busy_timeout)?;
            run_once(&mut conn, statement, params)
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Funnels every statement through one lazily opened connection.
///
/// A failed attempt discards the connection so the next one starts clean.
#[derive(Debug)]
pub struct SerializedExecutor {
    path: PathBuf,
    busy_timeout: Duration,
    retry: RetryPolicy,
    conn: Mutex<Option<Connection>>,
}

impl SerializedExecutor {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
            retry,
            conn: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Connection>> {
        // A panic while holding the lock leaves at worst a stale connection
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Executor for SerializedExecutor {
    fn execute(&self, statement: &str, params: &Params) -> Result<Vec<Row>> {
        let mut slot = self.lock();
        self.retry.run(statement, || {
            let mut conn = match slot.take() {
                Some(conn) => conn,
                None => open_connection(&self.path, self.busy_timeout)?,
            };
            let result = run_once(&mut conn, statement, params);
            if result.is_ok() {
                *slot = Some(conn);
            }
            result
        })
    }

    fn invalidate(&self) {
        *self.lock() = None;
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn executors(path: &Path) -> Vec<Box<dyn Executor>> {
        vec![
            Box::new(StatementExecutor::new(path, Duration::from_secs(5), RetryPolicy::default())),
            Box::new(SerializedExecutor::new(path, Duration::from_secs(5), RetryPolicy::default())),
        ]
    }

    #[test]
    fn test_select_returns_rows() {
        let dir = tempfile::tempdir().unwrap();
        for executor in executors(&dir.path().join("exec.db")) {
            let rows = executor.execute("SELECT 1, 'two'", &Params::None).unwrap();
            assert_eq!(rows, vec![vec![Value::Integer(1), Value::Text("two".into())]]);
        }
    }

    #[test]
    fn test_positional_and_named_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.db");
        let executor = StatementExecutor::new(&path, Duration::from_secs(5), RetryPolicy::default());

        executor.execute("CREATE TABLE t (a INT, b TEXT)", &Params::None).unwrap();
        executor
            .execute(
                "INSERT INTO t (a, b) VALUES (?, ?)",
                &Params::Positional(vec![Value::Integer(1), Value::Text("x".into())]),
            )
            .unwrap();
        executor
            .execute(
                "INSERT INTO t (a, b) VALUES (:a, :b)",
                &Params::Named(vec![
                    (":b".into(), Value::Text("y".into())),
                    (":a".into(), Value::Integer(2)),
                ]),
            )
            .unwrap();

        let rows = executor.execute("SELECT a, b FROM t ORDER BY a", &Params::None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![Value::Integer(2), Value::Text("y".into())]);
    }

    #[test]
    fn test_write_returns_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let executor = StatementExecutor::new(
            dir.path().join("empty.db"),
            Duration::from_secs(5),
            RetryPolicy::default(),
        );
        let rows = executor.execute("CREATE TABLE t (a INT)", &Params::None).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_exhausted_statement_leaves_store_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intact.db");
        for executor in executors(&path) {
            executor.execute("CREATE TABLE IF NOT EXISTS t (a INT)", &Params::None).unwrap();
            executor.execute("INSERT INTO t (a) VALUES (1)", &Params::None).unwrap();

            let err = executor
                .execute("INSERT INTO missing_table (a) VALUES (1)", &Params::None)
                .unwrap_err();
            assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));

            // Connections from the failed attempts are gone: a fresh writer is not blocked
            let mut conn = open_connection(&path, Duration::from_millis(100)).unwrap();
            run_once(&mut conn, "INSERT INTO t (a) VALUES (2)", &Params::None).unwrap();
        }

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn test_failed_statement_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollback.db");
        let executor = StatementExecutor::new(&path, Duration::from_secs(5), RetryPolicy::default());
        executor
            .execute("CREATE TABLE t (a INT CHECK (a > 0))", &Params::None)
            .unwrap();

        let result = executor.execute(
            "INSERT INTO t (a) VALUES (?)",
            &Params::Positional(vec![Value::Integer(-1)]),
        );
        assert!(result.is_err());

        let rows = executor.execute("SELECT COUNT(*) FROM t", &Params::None).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(0)]]);
    }

    #[test]
    fn test_serialized_invalidate_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serial.db");
        let executor = SerializedExecutor::new(&path, Duration::from_secs(5), RetryPolicy::default());
        executor.execute("CREATE TABLE t (a INT)", &Params::None).unwrap();

        executor.invalidate();
        std::fs::remove_file(&path).unwrap();

        // The next call opens a brand-new file rather than the unlinked one
        executor.execute("CREATE TABLE t (a INT)", &Params::None).unwrap();
        assert!(path.exists());
    }
}
