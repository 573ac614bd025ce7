//! Peer records - what crawler workers hand to the store
//!
//! An [`Observation`] is one successful handshake with a peer; an
//! [`ErrorRecord`] is one failed interaction. Both are append-only.

use std::fmt;
use std::net::SocketAddr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// Peer identity: the address a worker connected to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub ip: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }
}

impl From<(&str, u16)> for PeerAddr {
    fn from((ip, port): (&str, u16)) -> Self {
        Self::new(ip, port)
    }
}

impl From<(String, u16)> for PeerAddr {
    fn from((ip, port): (String, u16)) -> Self {
        Self::new(ip, port)
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

/// Handshake nonce, always kept as decimal text so no width is lost
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

impl Nonce {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! nonce_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Nonce {
                fn from(value: $ty) -> Self {
                    Nonce(value.to_string())
                }
            }
        )*
    };
}

nonce_from_integer!(u64, u128, i64);

impl From<&str> for Nonce {
    fn from(value: &str) -> Self {
        Nonce(value.to_string())
    }
}

impl From<String> for Nonce {
    fn from(value: String) -> Self {
        Nonce(value)
    }
}

/// Everything a peer reports in a handshake, minus its address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationFields {
    pub services: u64,
    pub timestamp: i64,
    pub receiver_services: u64,
    pub receiver_ip: String,
    pub receiver_port: u16,
    pub sender_services: u64,
    pub sender_ip: String,
    pub sender_port: u16,
    pub nonce: Nonce,
    pub user_agent: String,
    pub latest_block: i64,
    pub relay: bool,
}

/// One stored row of the observations table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub ip: String,
    pub port: u16,
    pub services: u64,
    pub timestamp: i64,
    pub receiver_services: u64,
    pub receiver_ip: String,
    pub receiver_port: u16,
    pub sender_services: u64,
    pub sender_ip: String,
    pub sender_port: u16,
    pub nonce: String,
    pub user_agent: String,
    pub latest_block: i64,
    pub relay: bool,
}

impl Observation {
    pub fn addr(&self) -> PeerAddr {
        PeerAddr::new(self.ip.clone(), self.port)
    }

    /// Map a `SELECT` in table column order
    pub(crate) fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            ip: row.get(0)?,
            port: row.get(1)?,
            services: row.get::<_, i64>(2)? as u64,
            timestamp: row.get(3)?,
            receiver_services: row.get::<_, i64>(4)? as u64,
            receiver_ip: row.get(5)?,
            receiver_port: row.get(6)?,
            sender_services: row.get::<_, i64>(7)? as u64,
            sender_ip: row.get(8)?,
            sender_port: row.get(9)?,
            nonce: row.get(10)?,
            user_agent: row.get(11)?,
            latest_block: row.get(12)?,
            relay: row.get(13)?,
        })
    }
}

/// Crawler-side classification of a failure, stored untouched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Code(i64),
    Label(String),
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode::Code(code)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode::Code(code.into())
    }
}

impl From<&str> for ErrorCode {
    fn from(label: &str) -> Self {
        ErrorCode::Label(label.to_string())
    }
}

impl From<String> for ErrorCode {
    fn from(label: String) -> Self {
        ErrorCode::Label(label)
    }
}

impl From<ErrorCode> for Value {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Code(n) => Value::Integer(n),
            ErrorCode::Label(s) => Value::Text(s),
        }
    }
}

impl ToSql for ErrorCode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ErrorCode::Code(n) => ToSqlOutput::from(*n),
            ErrorCode::Label(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for ErrorCode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(n) => Ok(ErrorCode::Code(n)),
            ValueRef::Text(_) => value.as_str().map(ErrorCode::from),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Code(n) => write!(f, "{}", n),
            ErrorCode::Label(s) => f.write_str(s),
        }
    }
}

/// One stored row of the errors table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub ip: String,
    pub port: u16,
    pub error: ErrorCode,
    pub timestamp: i64,
}

impl ErrorRecord {
    pub(crate) fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            ip: row.get(0)?,
            port: row.get(1)?,
            error: row.get(2)?,
            timestamp: row.get(3)?,
        })
    }
}
