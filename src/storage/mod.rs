//! Storage Layer - SQLite-backed persistence
//!
//! System of record is one SQLite file with tables:
//! - observations(ip, port, services, timestamp, receiver_*, sender_*, nonce, user_agent, latest_block, relay)
//! - errors(ip, port, error, timestamp)
//!
//! Every write goes through an [`Executor`], which owns contention handling.

pub mod executor;
pub mod retry;
pub mod schema;

pub use executor::{
    open_connection, Executor, Params, Row, SerializedExecutor, StatementExecutor, WriteStrategy,
};
pub use retry::{is_busy_error, Backoff, RetryOn, RetryPolicy};
pub use schema::reset_store;
