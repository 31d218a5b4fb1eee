//! Persistent storage.
//!
//! `SQLite` store with schema migrations, the `Store` trait for domain
//! CRUD, and tenant-scoped retrieval reads.

pub mod schema;
pub mod sqlite;
pub mod traits;

pub use sqlite::{DEFAULT_DB_PATH, SqliteStore};
pub use traits::{ChunkRecord, ProgressCounts, Store, StoreStats};
