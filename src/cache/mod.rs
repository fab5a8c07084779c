//! Generation-named cache store for request/response snapshots.
//!
//! A store is a set of named generations (versioned buckets); each
//! generation maps request keys to stored response snapshots. The router
//! precaches the app shell into one generation at install time, fills a
//! runtime generation lazily with API responses, and purges every other
//! generation at activation.

mod storage;
mod traits;

pub use storage::{MemoryStore, SqliteStore};
pub use traits::{CacheStore, StoredResponse};
