//! In-process cache store.

use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::traits::{ensure_cacheable, CacheStore, GenerationStatus};
use crate::http::{Request, Response};

struct Generation {
  status: GenerationStatus,
  entries: HashMap<String, (Request, Response)>,
}

impl Default for Generation {
  fn default() -> Self {
    Self {
      status: GenerationStatus::Opened,
      entries: HashMap::new(),
    }
  }
}

fn stored_request(request: &Request) -> Request {
  let mut stored = request.clone();
  stored.url = request.cache_url().to_string();
  stored
}

/// Cache store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStore {
  generations: Mutex<BTreeMap<String, Generation>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Generation>>> {
    self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStore for MemoryStore {
  fn open(&self, name: &str) -> Result<()> {
    self.lock()?.entry(name.to_string()).or_default();
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.remove(name).is_some())
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
    let generations = self.lock()?;
    Ok(
      generations
        .get(name)
        .and_then(|g| g.entries.get(&request.cache_key()))
        .map(|(_, response)| response.clone()),
    )
  }

  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
    ensure_cacheable(request)?;

    self
      .lock()?
      .entry(name.to_string())
      .or_default()
      .entries
      .insert(request.cache_key(), (stored_request(request), response.clone()));
    Ok(())
  }

  fn status(&self, name: &str) -> Result<Option<GenerationStatus>> {
    Ok(self.lock()?.get(name).map(|g| g.status))
  }

  fn set_status(&self, name: &str, status: GenerationStatus) -> Result<()> {
    let mut generations = self.lock()?;
    let generation = generations
      .get_mut(name)
      .ok_or_else(|| eyre!("Cache '{}' does not exist", name))?;
    generation.status = status;
    Ok(())
  }

  fn install(&self, name: &str, entries: &[(Request, Response)]) -> Result<()> {
    // Validate everything before touching the map so a failure leaves no trace
    for (request, _) in entries {
      ensure_cacheable(request)?;
    }

    let mut generations = self.lock()?;
    let generation = generations.entry(name.to_string()).or_default();
    for (request, response) in entries {
      generation
        .entries
        .insert(request.cache_key(), (stored_request(request), response.clone()));
    }
    generation.status = GenerationStatus::Installed;
    Ok(())
  }

  fn requests(&self, name: &str) -> Result<Vec<Request>> {
    let generations = self.lock()?;
    let mut requests: Vec<Request> = generations
      .get(name)
      .map(|g| g.entries.values().map(|(request, _)| request.clone()).collect())
      .unwrap_or_default();
    requests.sort_by(|a, b| a.url.cmp(&b.url));
    Ok(requests)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::RequestMode;
  use reqwest::Method;

  #[test]
  fn test_generations_are_isolated() {
    let store = MemoryStore::new();
    let request = Request::get("https://example.com/Radars/");
    store
      .put("a", &request, &Response::new("https://example.com/Radars/", 200, "a"))
      .unwrap();
    store.open("b").unwrap();

    assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    assert!(store.match_request("b", &request).unwrap().is_none());
    assert_eq!(
      store.match_request("a", &request).unwrap().unwrap().body,
      b"a"
    );
  }

  #[test]
  fn test_delete_reports_existence() {
    let store = MemoryStore::new();
    store.open("a").unwrap();
    assert!(store.delete("a").unwrap());
    assert!(!store.delete("a").unwrap());
  }

  #[test]
  fn test_install_marks_generation_installed() {
    let store = MemoryStore::new();
    store.open("a").unwrap();
    assert_eq!(store.status("a").unwrap(), Some(GenerationStatus::Opened));

    let request = Request::get("https://example.com/Radars/");
    store
      .install(
        "a",
        &[(request.clone(), Response::new("https://example.com/Radars/", 200, "shell"))],
      )
      .unwrap();

    assert_eq!(store.status("a").unwrap(), Some(GenerationStatus::Installed));
    assert!(store.match_request("a", &request).unwrap().is_some());
  }

  #[test]
  fn test_install_with_invalid_entry_writes_nothing() {
    let store = MemoryStore::new();
    let entries = vec![
      (
        Request::get("https://example.com/Radars/"),
        Response::new("https://example.com/Radars/", 200, "shell"),
      ),
      (
        Request::new("https://example.com/x", Method::PUT, RequestMode::Cors),
        Response::new("https://example.com/x", 200, ""),
      ),
    ];

    assert!(store.install("a", &entries).is_err());
    assert_eq!(store.status("a").unwrap(), None);
  }

  #[test]
  fn test_put_rejects_non_get() {
    let store = MemoryStore::new();
    let request = Request::new("https://example.com/x", Method::PUT, RequestMode::Cors);
    assert!(store
      .put("a", &request, &Response::new("https://example.com/x", 200, ""))
      .is_err());
  }
}
