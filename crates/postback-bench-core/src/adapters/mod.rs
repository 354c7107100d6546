//! # Store Adapters
//!
//! Implementations of [`PostbackStore`](crate::PostbackStore): an in-memory
//! store for tests and local runs, and a SQLite store for real runs.

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::InMemoryPostbackStore;
pub use sqlite_store::SqlitePostbackStore;
