//! Store facade - the write path crawler workers call into
//!
//! A [`CrawlStore`] is `Send + Sync`; share one behind an `Arc` across worker
//! threads. Every write is synchronous and goes through the configured
//! [`Executor`].

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::types::Value;
use serde_json::{Map, Value as JsonValue};

use crate::config::StoreConfig;
use crate::observation::{ErrorCode, ObservationFields, PeerAddr};
use crate::reader::Reader;
use crate::storage::schema::{self, INSERT_ERROR, INSERT_OBSERVATION, OBSERVATION_COLUMNS};
use crate::storage::{Executor, Params, Row, SerializedExecutor, StatementExecutor, WriteStrategy};
use crate::{Error, Result};

pub struct CrawlStore {
    config: StoreConfig,
    executor: Box<dyn Executor>,
}

impl CrawlStore {
    /// Build a store from configuration. Touches nothing on disk.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let executor: Box<dyn Executor> = match config.strategy {
            WriteStrategy::PerCall => Box::new(StatementExecutor::new(
                &config.database,
                config.busy_timeout(),
                config.retry.clone(),
            )),
            WriteStrategy::Serialized => Box::new(SerializedExecutor::new(
                &config.database,
                config.busy_timeout(),
                config.retry.clone(),
            )),
        };
        Ok(Self { config, executor })
    }

    /// Default settings against `path`
    pub fn open(path: &Path) -> Result<Self> {
        Self::new(StoreConfig::at(path))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        self.executor.path()
    }

    /// Reader over the same store file
    pub fn reader(&self) -> Reader {
        Reader::new(self.path())
    }

    /// Run an arbitrary statement through the executor
    pub fn execute(&self, statement: &str, params: &Params) -> Result<Vec<Row>> {
        self.executor.execute(statement, params)
    }

    /// Discard the store and recreate empty tables. Run before workers start.
    pub fn reset_store(&self) -> Result<()> {
        schema::reset_store(self.executor.as_ref())
    }

    // ========== Observation Operations ==========

    /// Record one successful handshake with `addr`
    pub fn record_observation(
        &self,
        addr: impl Into<PeerAddr>,
        fields: &ObservationFields,
    ) -> Result<()> {
        let map = match serde_json::to_value(fields)? {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        self.record_observation_map(addr, map)
    }

    /// Record an observation from loosely typed fields.
    ///
    /// `ip`/`port` always come from `addr`, and `nonce` is stored as text
    /// whatever form it arrives in. Every other field must already have the
    /// shape its column is read back as; nothing is written otherwise.
    pub fn record_observation_map(
        &self,
        addr: impl Into<PeerAddr>,
        mut fields: Map<String, JsonValue>,
    ) -> Result<()> {
        let addr = addr.into();
        fields.insert("ip".into(), JsonValue::String(addr.ip.clone()));
        fields.insert("port".into(), JsonValue::from(addr.port));
        if let Some(nonce) = fields.get_mut("nonce") {
            *nonce = JsonValue::String(nonce_text(nonce));
        }

        let mut named = Vec::with_capacity(OBSERVATION_COLUMNS.len());
        for column in OBSERVATION_COLUMNS {
            let value = fields
                .get(column)
                .ok_or_else(|| Error::MissingField(column.to_string()))?;
            named.push((format!(":{}", column), column_value(column, value)?));
        }

        self.executor
            .execute(INSERT_OBSERVATION, &Params::Named(named))?;
        tracing::trace!(peer = %addr, "observation recorded");
        Ok(())
    }

    // ========== Error Operations ==========

    /// Record a failed interaction with `addr`. Never fails; problems are logged.
    pub fn record_error(&self, addr: impl Into<PeerAddr>, error: impl Into<ErrorCode>) {
        let addr = addr.into();
        if let Err(e) = self.try_record_error(&addr, error) {
            tracing::warn!(peer = %addr, "Failed to record peer error: {}", e);
        }
    }

    /// Same as [`record_error`](Self::record_error) but hands the failure back
    pub fn try_record_error(&self, addr: &PeerAddr, error: impl Into<ErrorCode>) -> Result<()> {
        let code: ErrorCode = error.into();
        let params = Params::Positional(vec![
            Value::Text(addr.ip.clone()),
            Value::Integer(addr.port.into()),
            code.into(),
            Value::Integer(unix_now()),
        ]);
        self.executor.execute(INSERT_ERROR, &params)?;
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Text form of a nonce; numbers keep every digit
fn nonce_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// How a stored observation column is decoded again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Port,
    /// Service bitfield; values above `i64::MAX` keep their bits
    Bits,
    Integer,
    Flag,
}

fn column_kind(column: &str) -> ColumnKind {
    match column {
        "ip" | "receiver_ip" | "sender_ip" | "nonce" | "user_agent" => ColumnKind::Text,
        "port" | "receiver_port" | "sender_port" => ColumnKind::Port,
        "services" | "receiver_services" | "sender_services" => ColumnKind::Bits,
        "relay" => ColumnKind::Flag,
        _ => ColumnKind::Integer,
    }
}

/// Convert a loose field into the SQL value that gets bound.
///
/// Rejects anything the reader could not turn back into an [`Observation`](crate::Observation).
fn column_value(column: &str, value: &JsonValue) -> Result<Value> {
    let kind = column_kind(column);
    let converted = match (kind, value) {
        (ColumnKind::Text, JsonValue::String(s)) => Some(Value::Text(s.clone())),
        (ColumnKind::Port, JsonValue::Number(n)) => n
            .as_u64()
            .filter(|port| *port <= u16::MAX as u64)
            .map(|port| Value::Integer(port as i64)),
        (ColumnKind::Bits, JsonValue::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|bits| bits as i64))
            .map(Value::Integer),
        (ColumnKind::Integer, JsonValue::Number(n)) => n.as_i64().map(Value::Integer),
        (ColumnKind::Flag, JsonValue::Bool(b)) => Some(Value::Integer(*b as i64)),
        (ColumnKind::Flag, JsonValue::Number(n)) => match n.as_i64() {
            Some(flag @ (0 | 1)) => Some(Value::Integer(flag)),
            _ => None,
        },
        _ => None,
    };

    converted.ok_or_else(|| Error::InvalidField {
        field: column.to_string(),
        reason: format!("expected {:?} value, got {}", kind, value),
    })
}
