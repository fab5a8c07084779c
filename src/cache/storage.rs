//! Cache store backends: SQLite (persistent) and in-memory (ephemeral).

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheStore, StoredResponse};
use crate::http::{Request, ResponseSnapshot};

/// In-memory cache store.
///
/// Used for ephemeral runs and tests. Generations are kept in creation
/// order; everything is dropped with the process.
#[derive(Default)]
pub struct MemoryStore {
  generations: Mutex<Vec<(String, BTreeMap<String, StoredResponse>)>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryStore {
  fn open(&self, generation: &str) -> Result<()> {
    let mut generations = lock(&self.generations)?;
    if !generations.iter().any(|(name, _)| name == generation) {
      generations.push((generation.to_string(), BTreeMap::new()));
    }
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let generations = lock(&self.generations)?;
    Ok(generations.iter().map(|(name, _)| name.clone()).collect())
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let mut generations = lock(&self.generations)?;
    let before = generations.len();
    generations.retain(|(name, _)| name != generation);
    Ok(generations.len() < before)
  }

  fn put(&self, generation: &str, request: &Request, response: &ResponseSnapshot) -> Result<()> {
    let mut generations = lock(&self.generations)?;
    let index = match generations.iter().position(|(name, _)| name == generation) {
      Some(index) => index,
      None => {
        generations.push((generation.to_string(), BTreeMap::new()));
        generations.len() - 1
      }
    };

    generations[index].1.insert(
      request.cache_key(),
      StoredResponse {
        response: response.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn get(&self, generation: &str, request: &Request) -> Result<Option<StoredResponse>> {
    let generations = lock(&self.generations)?;
    Ok(
      generations
        .iter()
        .find(|(name, _)| name == generation)
        .and_then(|(_, entries)| entries.get(&request.cache_key()).cloned()),
    )
  }

  fn match_any(&self, request: &Request) -> Result<Option<StoredResponse>> {
    let key = request.cache_key();
    let generations = lock(&self.generations)?;
    Ok(
      generations
        .iter()
        .find_map(|(_, entries)| entries.get(&key).cloned()),
    )
  }

  fn count(&self, generation: &str) -> Result<usize> {
    let generations = lock(&self.generations)?;
    Ok(
      generations
        .iter()
        .find(|(name, _)| name == generation)
        .map(|(_, entries)| entries.len())
        .unwrap_or(0),
    )
  }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
  mutex.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

/// SQLite-based cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("mihrab").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = lock(&self.conn)?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables. Generation creation order is the rowid order.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots, keyed by generation and hashed request key
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    response BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(request_key);
"#;

impl CacheStore for SqliteStore {
  fn open(&self, generation: &str) -> Result<()> {
    let conn = lock(&self.conn)?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to open generation '{}': {}", generation, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let conn = lock(&self.conn)?;

    conn
      .execute("DELETE FROM entries WHERE generation = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete entries of '{}': {}", generation, e))?;

    let deleted = conn
      .execute("DELETE FROM generations WHERE name = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete generation '{}': {}", generation, e))?;

    Ok(deleted > 0)
  }

  fn put(&self, generation: &str, request: &Request, response: &ResponseSnapshot) -> Result<()> {
    let data =
      serde_json::to_vec(response).map_err(|e| eyre!("Failed to serialize response: {}", e))?;

    let conn = lock(&self.conn)?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to open generation '{}': {}", generation, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries (generation, request_key, url, method, response, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![
          generation,
          request.cache_key(),
          request.url.as_str(),
          request.method,
          data
        ],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", request.url, e))?;

    Ok(())
  }

  fn get(&self, generation: &str, request: &Request) -> Result<Option<StoredResponse>> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare(
        "SELECT response, cached_at FROM entries
         WHERE generation = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![generation, request.cache_key()], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .ok();

    row.map(decode_row).transpose()
  }

  fn match_any(&self, request: &Request) -> Result<Option<StoredResponse>> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare(
        "SELECT e.response, e.cached_at FROM entries e
         INNER JOIN generations g ON g.name = e.generation
         WHERE e.request_key = ?
         ORDER BY g.rowid
         LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![request.cache_key()], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .ok();

    row.map(decode_row).transpose()
  }

  fn count(&self, generation: &str) -> Result<usize> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare("SELECT COUNT(*) FROM entries WHERE generation = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let count: i64 = stmt
      .query_row(params![generation], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count entries of '{}': {}", generation, e))?;

    Ok(count as usize)
  }
}

fn decode_row((data, cached_at): (Vec<u8>, String)) -> Result<StoredResponse> {
  let response: ResponseSnapshot =
    serde_json::from_slice(&data).map_err(|e| eyre!("Failed to deserialize response: {}", e))?;
  let cached_at = parse_datetime(&cached_at)?;

  Ok(StoredResponse {
    response,
    cached_at,
  })
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn response(body: &[u8]) -> ResponseSnapshot {
    ResponseSnapshot::new(200)
      .with_header("Content-Type", "text/html")
      .with_body(body.to_vec())
  }

  fn exercise_roundtrip(store: &dyn CacheStore) {
    let req = request("https://jannah.app/index.html");
    let res = response(b"<html>shell</html>");

    store.put("app-shell-v1.0.0", &req, &res).unwrap();

    let stored = store.get("app-shell-v1.0.0", &req).unwrap().unwrap();
    assert_eq!(stored.response, res);

    // Different generation does not see the entry
    assert!(store.get("runtime-v1", &req).unwrap().is_none());
  }

  fn exercise_generation_lifecycle(store: &dyn CacheStore) {
    store.open("v1").unwrap();
    store.open("v2").unwrap();
    store.open("v1").unwrap(); // reopening keeps creation order
    assert_eq!(store.keys().unwrap(), vec!["v1", "v2"]);

    let req = request("https://jannah.app/");
    store.put("v1", &req, &response(b"a")).unwrap();
    assert_eq!(store.count("v1").unwrap(), 1);

    assert!(store.delete("v1").unwrap());
    assert!(!store.delete("v1").unwrap());
    assert_eq!(store.keys().unwrap(), vec!["v2"]);
    assert_eq!(store.count("v1").unwrap(), 0);
    assert!(store.get("v1", &req).unwrap().is_none());
  }

  fn exercise_match_any(store: &dyn CacheStore) {
    let req = request("https://api.aladhan.com/v1/timings");
    store.open("older").unwrap();
    store.open("newer").unwrap();
    store.put("newer", &req, &response(b"newer")).unwrap();
    store.put("older", &req, &response(b"older")).unwrap();

    // Oldest generation wins the store-wide lookup
    let stored = store.match_any(&req).unwrap().unwrap();
    assert_eq!(stored.response.body, b"older");

    assert!(store.match_any(&request("https://api.aladhan.com/v1/other")).unwrap().is_none());
  }

  #[test]
  fn test_memory_roundtrip() {
    exercise_roundtrip(&MemoryStore::new());
  }

  #[test]
  fn test_memory_generation_lifecycle() {
    exercise_generation_lifecycle(&MemoryStore::new());
  }

  #[test]
  fn test_memory_match_any() {
    exercise_match_any(&MemoryStore::new());
  }

  #[test]
  fn test_sqlite_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    exercise_roundtrip(&SqliteStore::open_at(&dir.path().join("cache.db")).unwrap());
  }

  #[test]
  fn test_sqlite_generation_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    exercise_generation_lifecycle(&SqliteStore::open_at(&dir.path().join("cache.db")).unwrap());
  }

  #[test]
  fn test_sqlite_match_any() {
    let dir = tempfile::tempdir().unwrap();
    exercise_match_any(&SqliteStore::open_at(&dir.path().join("cache.db")).unwrap());
  }

  #[test]
  fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let req = request("https://jannah.app/manifest.json");
    let res = response(b"{\"name\":\"app\"}");

    {
      let store = SqliteStore::open_at(&path).unwrap();
      store.put("app-shell-v1.0.0", &req, &res).unwrap();
    }

    let store = SqliteStore::open_at(&path).unwrap();
    let stored = store.get("app-shell-v1.0.0", &req).unwrap().unwrap();
    assert_eq!(stored.response, res);
    assert_eq!(store.keys().unwrap(), vec!["app-shell-v1.0.0"]);
  }
}
