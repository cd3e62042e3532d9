//! rollcall-store — Durable storage for rosters, attendance events and summaries.
//!
//! Provides the persistence gateway abstraction, a SQLite implementation, an
//! in-memory implementation, and the background sink that feeds a gateway
//! without blocking the capture loop.

pub mod gateway;
mod migrations;
pub mod sink;
pub mod sqlite;

pub use gateway::{MemoryGateway, PersistenceGateway, StoreError};
pub use sink::{PersistenceSink, RetryPolicy, SinkHandle, SinkStats};
pub use sqlite::SqliteGateway;
