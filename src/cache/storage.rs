//! SQLite-backed cache store.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{ensure_cacheable, CacheStore, GenerationStatus};
use crate::http::{Request, RequestMode, Response};

/// SQLite-based cache store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("radar-offline").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    // Databases created before generations tracked their status
    let has_status: bool = conn
      .query_row(
        "SELECT COUNT(*) FROM pragma_table_info('cache_generations') WHERE name = 'status'",
        [],
        |row| row.get::<_, i64>(0),
      )
      .map(|count| count > 0)
      .map_err(|e| eyre!("Failed to inspect cache schema: {}", e))?;

    if !has_status {
      conn
        .execute_batch(
          "ALTER TABLE cache_generations ADD COLUMN status TEXT NOT NULL DEFAULT 'opened'",
        )
        .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    }

    Ok(())
  }
}

/// Insert or replace one entry. Caller owns the transaction.
fn insert_entry(conn: &Connection, name: &str, request: &Request, response: &Response) -> Result<()> {
  ensure_cacheable(request)?;

  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, request_key, method, url, mode, response_url, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        request.cache_key(),
        request.method.as_str(),
        request.cache_url(),
        request.mode.as_str(),
        response.url,
        response.status,
        response.status_text,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in cache '{}': {}", request.url, name, e))?;

  Ok(())
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache generation
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'opened',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by request hash within a generation
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    mode TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_name ON cache_entries(cache_name);
"#;

impl CacheStore for SqliteStore {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache '{}': {}", name, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of cache '{}': {}", name, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete cache '{}': {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
    let conn = self.lock()?;

    let row: Option<(String, u16, String, String, Vec<u8>)> = conn
      .query_row(
        "SELECT response_url, status, status_text, headers, body FROM cache_entries
         WHERE cache_name = ? AND request_key = ?",
        params![name, request.cache_key()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in cache '{}': {}", request.url, name, e))?;

    match row {
      Some((url, status, status_text, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", request.url, e))?;
        Ok(Some(Response {
          url,
          status,
          status_text,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache '{}': {}", name, e))?;

    insert_entry(&tx, name, request, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn status(&self, name: &str) -> Result<Option<GenerationStatus>> {
    let conn = self.lock()?;

    let status: Option<String> = conn
      .query_row(
        "SELECT status FROM cache_generations WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read status of cache '{}': {}", name, e))?;

    status.as_deref().map(GenerationStatus::parse).transpose()
  }

  fn set_status(&self, name: &str, status: GenerationStatus) -> Result<()> {
    let conn = self.lock()?;

    let updated = conn
      .execute(
        "UPDATE cache_generations SET status = ? WHERE name = ?",
        params![status.as_str(), name],
      )
      .map_err(|e| eyre!("Failed to update status of cache '{}': {}", name, e))?;

    if updated == 0 {
      return Err(eyre!("Cache '{}' does not exist", name));
    }
    Ok(())
  }

  fn install(&self, name: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache '{}': {}", name, e))?;

    for (request, response) in entries {
      insert_entry(&tx, name, request, response)?;
    }

    tx.execute(
      "UPDATE cache_generations SET status = ? WHERE name = ?",
      params![GenerationStatus::Installed.as_str(), name],
    )
    .map_err(|e| eyre!("Failed to mark cache '{}' installed: {}", name, e))?;

    // Dropping the transaction on any error above rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn requests(&self, name: &str) -> Result<Vec<Request>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT method, url, mode FROM cache_entries
         WHERE cache_name = ?
         ORDER BY cached_at, url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![name], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries of cache '{}': {}", name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url, mode)| {
        let method = Method::from_bytes(method.as_bytes())
          .map_err(|e| eyre!("Invalid method '{}' stored for {}: {}", method, url, e))?;
        Ok(Request::new(url, method, parse_mode(&mode)))
      })
      .collect()
  }
}

fn parse_mode(s: &str) -> RequestMode {
  match s {
    "navigate" => RequestMode::Navigate,
    "same-origin" => RequestMode::SameOrigin,
    "cors" => RequestMode::Cors,
    _ => RequestMode::NoCors,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
  }

  #[test]
  fn test_open_is_idempotent() {
    let store = store();
    store.open("radar-detector-v2.7").unwrap();
    store.open("radar-detector-v2.7").unwrap();
    assert_eq!(store.keys().unwrap(), vec!["radar-detector-v2.7".to_string()]);
  }

  #[test]
  fn test_put_then_match() {
    let store = store();
    let request = Request::get("https://example.com/Radars/index.html");
    let response = Response::new("https://example.com/Radars/index.html", 200, "<html>")
      .with_header("content-type", "text/html");

    store.put("v1", &request, &response).unwrap();

    let cached = store.match_request("v1", &request).unwrap();
    assert_eq!(cached, Some(response));
    assert!(store.match_request("v2", &request).unwrap().is_none());
    assert_eq!(store.keys().unwrap(), vec!["v1".to_string()]);
  }

  #[test]
  fn test_put_replaces_existing_entry() {
    let store = store();
    let request = Request::get("https://example.com/app.js");
    store
      .put("v1", &request, &Response::new("https://example.com/app.js", 200, "old"))
      .unwrap();
    store
      .put("v1", &request, &Response::new("https://example.com/app.js", 200, "new"))
      .unwrap();

    let cached = store.match_request("v1", &request).unwrap().unwrap();
    assert_eq!(cached.body, b"new");
    assert_eq!(store.requests("v1").unwrap().len(), 1);
  }

  #[test]
  fn test_put_rejects_non_get() {
    let store = store();
    let request = Request::new("https://example.com/form", Method::POST, RequestMode::Cors);
    let result = store.put("v1", &request, &Response::new("https://example.com/form", 200, ""));
    assert!(result.is_err());
    assert!(store.keys().unwrap().is_empty());
  }

  #[test]
  fn test_delete_removes_entries() {
    let store = store();
    let request = Request::navigate("https://example.com/Radars/");
    store
      .put("old", &request, &Response::new("https://example.com/Radars/", 200, "x"))
      .unwrap();

    assert!(store.delete("old").unwrap());
    assert!(!store.delete("old").unwrap());
    assert!(store.keys().unwrap().is_empty());
    assert!(store.match_request("old", &request).unwrap().is_none());
    assert!(store.requests("old").unwrap().is_empty());
  }

  #[test]
  fn test_status_follows_lifecycle() {
    let store = store();
    assert_eq!(store.status("v1").unwrap(), None);

    store.open("v1").unwrap();
    assert_eq!(store.status("v1").unwrap(), Some(GenerationStatus::Opened));

    let request = Request::get("https://example.com/Radars/");
    let response = Response::new("https://example.com/Radars/", 200, "shell");
    store.install("v1", &[(request.clone(), response.clone())]).unwrap();
    assert_eq!(store.status("v1").unwrap(), Some(GenerationStatus::Installed));
    assert_eq!(store.match_request("v1", &request).unwrap(), Some(response));

    store.set_status("v1", GenerationStatus::Activated).unwrap();
    assert_eq!(store.status("v1").unwrap(), Some(GenerationStatus::Activated));
    assert!(store.set_status("missing", GenerationStatus::Activated).is_err());
  }

  #[test]
  fn test_install_rolls_back_on_failure() {
    let store = store();
    store.open("v1").unwrap();
    let entries = vec![
      (
        Request::get("https://example.com/Radars/"),
        Response::new("https://example.com/Radars/", 200, "shell"),
      ),
      (
        Request::new("https://example.com/Radars/form", Method::POST, RequestMode::Cors),
        Response::new("https://example.com/Radars/form", 200, ""),
      ),
    ];

    assert!(store.install("v1", &entries).is_err());

    assert!(store.requests("v1").unwrap().is_empty());
    assert_eq!(store.status("v1").unwrap(), Some(GenerationStatus::Opened));
  }

  #[test]
  fn test_requests_round_trip_mode() {
    let store = store();
    let request = Request::navigate("https://example.com/Radars/#top");
    store
      .put("v1", &request, &Response::new("https://example.com/Radars/", 200, "x"))
      .unwrap();

    let requests = store.requests("v1").unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://example.com/Radars/");
    assert!(requests[0].is_navigation());
  }
}
