//! Database schema definitions and store reset

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::executor::{Executor, Params};
use crate::Result;

/// SQL to create the observations table
pub const CREATE_OBSERVATIONS_TABLE: &str = r#"
CREATE TABLE observations (
    ip TEXT,
    port INT,
    services INT,
    timestamp INT,
    receiver_services INT,
    receiver_ip TEXT,
    receiver_port INT,
    sender_services INT,
    sender_ip TEXT,
    sender_port INT,
    nonce TEXT,
    user_agent TEXT,
    latest_block INT,
    relay INT
)
"#;

/// SQL to create the errors table
pub const CREATE_ERRORS_TABLE: &str = r#"
CREATE TABLE errors (
    ip TEXT,
    port INT,
    error INT,
    timestamp INT
)
"#;

/// Observation columns, in table order
pub const OBSERVATION_COLUMNS: [&str; 14] = [
    "ip",
    "port",
    "services",
    "timestamp",
    "receiver_services",
    "receiver_ip",
    "receiver_port",
    "sender_services",
    "sender_ip",
    "sender_port",
    "nonce",
    "user_agent",
    "latest_block",
    "relay",
];

/// Insert binding every observation column by name
pub const INSERT_OBSERVATION: &str = r#"
INSERT INTO observations (
    ip, port, services, timestamp,
    receiver_services, receiver_ip, receiver_port,
    sender_services, sender_ip, sender_port,
    nonce, user_agent, latest_block, relay
) VALUES (
    :ip, :port, :services, :timestamp,
    :receiver_services, :receiver_ip, :receiver_port,
    :sender_services, :sender_ip, :sender_port,
    :nonce, :user_agent, :latest_block, :relay
)
"#;

/// Positional insert for one error row
pub const INSERT_ERROR: &str = "INSERT INTO errors (ip, port, error, timestamp) VALUES (?1, ?2, ?3, ?4)";

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![CREATE_OBSERVATIONS_TABLE, CREATE_ERRORS_TABLE]
}

/// The store file plus the sidecars SQLite may leave next to it
fn store_files(path: &Path) -> Vec<PathBuf> {
    let mut files = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}

/// Discard the store and recreate both relations empty.
///
/// Removal failures are logged and ignored. Must run before any writer starts.
pub fn reset_store(executor: &dyn Executor) -> Result<()> {
    executor.invalidate();

    let path = executor.path();
    for (idx, file) in store_files(path).iter().enumerate() {
        match std::fs::remove_file(file) {
            Ok(()) => tracing::debug!("Removed {}", file.display()),
            // Missing sidecars are the normal case
            Err(e) if e.kind() == ErrorKind::NotFound && idx > 0 => {}
            Err(e) => tracing::warn!("Could not remove {}: {}", file.display(), e),
        }
    }

    // Every statement is issued even after a failure; the first error wins
    let mut first_err = None;
    for stmt in all_schema_statements() {
        if let Err(e) = executor.execute(stmt, &Params::None) {
            tracing::error!("Schema statement failed during reset: {}", e);
            first_err.get_or_insert(e);
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }
    tracing::info!("Store reset at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RetryPolicy, Row, StatementExecutor};
    use crate::Error;
    use rusqlite::Connection;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails every statement that mentions `failing`, remembering all it saw
    struct FailingExecutor {
        path: PathBuf,
        failing: &'static str,
        seen: Mutex<Vec<String>>,
    }

    impl Executor for FailingExecutor {
        fn execute(&self, statement: &str, _params: &Params) -> Result<Vec<Row>> {
            self.seen.lock().unwrap().push(statement.to_string());
            if statement.contains(self.failing) {
                return Err(Error::Rejected {
                    source: rusqlite::Error::InvalidQuery,
                });
            }
            Ok(Vec::new())
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    fn executor(path: &Path) -> StatementExecutor {
        StatementExecutor::new(path, Duration::from_secs(5), RetryPolicy::default())
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<(String, String)> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table)).unwrap();
        stmt.query_map([], |row| Ok((row.get(1)?, row.get(2)?)))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_reset_creates_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawler.db");
        reset_store(&executor(&path)).unwrap();

        let conn = Connection::open(&path).unwrap();
        let observations = table_columns(&conn, "observations");
        let names: Vec<&str> = observations.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, OBSERVATION_COLUMNS);
        assert_eq!(observations[10], ("nonce".to_string(), "TEXT".to_string()));

        let errors = table_columns(&conn, "errors");
        assert_eq!(
            errors,
            vec![
                ("ip".to_string(), "TEXT".to_string()),
                ("port".to_string(), "INT".to_string()),
                ("error".to_string(), "INT".to_string()),
                ("timestamp".to_string(), "INT".to_string()),
            ]
        );
    }

    #[test]
    fn test_reset_without_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.db");
        assert!(!path.exists());
        reset_store(&executor(&path)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_reset_discards_previous_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawler.db");
        let exec = executor(&path);
        reset_store(&exec).unwrap();
        exec.execute(
            INSERT_ERROR,
            &Params::Positional(vec![
                "10.0.0.1".to_string().into(),
                8333i64.into(),
                1i64.into(),
                0i64.into(),
            ]),
        )
        .unwrap();

        reset_store(&exec).unwrap();
        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM errors", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_reset_issues_every_statement_and_reports_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor = FailingExecutor {
            path: dir.path().join("crawler.db"),
            failing: "observations",
            seen: Mutex::new(Vec::new()),
        };

        let err = reset_store(&executor).unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));

        let seen = executor.seen.lock().unwrap();
        assert_eq!(*seen, vec![CREATE_OBSERVATIONS_TABLE.to_string(), CREATE_ERRORS_TABLE.to_string()]);
    }

    #[test]
    fn test_store_files_include_sidecars() {
        let files = store_files(Path::new("data/crawler.db"));
        assert_eq!(files.len(), 4);
        assert_eq!(files[1], PathBuf::from("data/crawler.db-journal"));
        assert_eq!(files[3], PathBuf::from("data/crawler.db-shm"));
    }
}
