//! Core trait and types for the cache store.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::{Request, ResponseSnapshot};

/// A response retrieved from the store, with its storage timestamp.
///
/// `cached_at` is recorded for inspection only; entries never expire on
/// their own.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  pub response: ResponseSnapshot,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache store backends.
///
/// Implementations serialize conflicting writes internally; the last
/// writer for a given request key wins.
pub trait CacheStore: Send + Sync {
  /// Ensure a generation exists.
  fn open(&self, generation: &str) -> Result<()>;

  /// Names of all existing generations, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a generation and all its entries. Returns whether it existed.
  fn delete(&self, generation: &str) -> Result<bool>;

  /// Store a response under the request's key, creating the generation on
  /// first use.
  fn put(&self, generation: &str, request: &Request, response: &ResponseSnapshot) -> Result<()>;

  /// Look up the exact request within one generation.
  fn get(&self, generation: &str, request: &Request) -> Result<Option<StoredResponse>>;

  /// Look up the exact request across all generations, oldest generation
  /// first.
  fn match_any(&self, request: &Request) -> Result<Option<StoredResponse>>;

  /// Number of entries in a generation.
  fn count(&self, generation: &str) -> Result<usize>;
}
