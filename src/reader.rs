//! Read-side queries for offline reporting
//!
//! Every call opens its own read-only connection. Nothing here is retried;
//! errors propagate to the caller.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::observation::{ErrorRecord, Observation, PeerAddr};
use crate::Result;

const SELECT_OBSERVATIONS: &str = "SELECT ip, port, services, timestamp, receiver_services, receiver_ip, receiver_port, \
     sender_services, sender_ip, sender_port, nonce, user_agent, latest_block, relay FROM observations";

const SELECT_ERRORS: &str = "SELECT ip, port, error, timestamp FROM errors";

#[derive(Debug, Clone)]
pub struct Reader {
    path: PathBuf,
}

impl Reader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// Count all observations
    pub fn count_observations(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// One observation, or `None` on an empty table
    pub fn peek_observation(&self) -> Result<Option<Observation>> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("{} ORDER BY rowid LIMIT 1", SELECT_OBSERVATIONS),
            [],
            Observation::from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Every observation, in insertion order
    pub fn list_observations(&self) -> Result<Vec<Observation>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY rowid", SELECT_OBSERVATIONS))?;
        let observations = stmt
            .query_map([], Observation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(observations)
    }

    /// Every observation of one peer, oldest first
    pub fn observations_for(&self, addr: &PeerAddr) -> Result<Vec<Observation>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE ip = ?1 AND port = ?2 ORDER BY rowid",
            SELECT_OBSERVATIONS
        ))?;
        let observations = stmt
            .query_map(params![addr.ip, addr.port], Observation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(observations)
    }

    /// Count all error rows
    pub fn count_errors(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM errors", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Every error row, in insertion order
    pub fn list_errors(&self) -> Result<Vec<ErrorRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY rowid", SELECT_ERRORS))?;
        let errors = stmt
            .query_map([], ErrorRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(errors)
    }
}
