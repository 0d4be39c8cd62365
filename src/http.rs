//! Request and response types shared by the agent, the cache store and the network.

use reqwest::Method;
use sha2::{Digest, Sha256};

/// How the request was initiated by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  SameOrigin,
  #[default]
  NoCors,
  Cors,
}

impl RequestMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      RequestMode::Navigate => "navigate",
      RequestMode::SameOrigin => "same-origin",
      RequestMode::NoCors => "no-cors",
      RequestMode::Cors => "cors",
    }
  }
}

/// An intercepted outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub url: String,
  pub method: Method,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(url: impl Into<String>, method: Method, mode: RequestMode) -> Self {
    Self {
      url: url.into(),
      method,
      mode,
    }
  }

  /// Subresource GET request.
  pub fn get(url: impl Into<String>) -> Self {
    Self::new(url, Method::GET, RequestMode::NoCors)
  }

  /// Top-level page load.
  pub fn navigate(url: impl Into<String>) -> Self {
    Self::new(url, Method::GET, RequestMode::Navigate)
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// URL as used for cache matching (fragment stripped).
  pub fn cache_url(&self) -> &str {
    match self.url.find('#') {
      Some(idx) => &self.url[..idx],
      None => &self.url,
    }
  }

  /// Stable, fixed-length key identifying this request within a cache generation.
  ///
  /// Two requests share a key when their method and fragment-less URL match;
  /// the request mode does not take part.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.cache_url().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response, either fresh from the network or read back from a cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL the response was served from
  pub url: String,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url: url.into(),
      status,
      status_text: reason_phrase(status).to_string(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Status in the 200-299 range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value matching `name`, case-insensitively.
  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

fn reason_phrase(status: u16) -> &'static str {
  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("")
}

/// Whether `url` uses a fetchable HTTP(S) scheme.
pub fn is_http_url(url: &str) -> bool {
  let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
  lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_ignores_fragment_and_mode() {
    let a = Request::get("https://example.com/Radars/index.html#map");
    let b = Request::navigate("https://example.com/Radars/index.html");
    assert_eq!(a.cache_key(), b.cache_key());
    assert_eq!(a.cache_key().len(), 64);
  }

  #[test]
  fn test_cache_key_depends_on_method() {
    let get = Request::get("https://example.com/a");
    let post = Request::new("https://example.com/a", Method::POST, RequestMode::Cors);
    assert_ne!(get.cache_key(), post.cache_key());
  }

  #[test]
  fn test_http_scheme_detection() {
    assert!(is_http_url("https://example.com/"));
    assert!(is_http_url("HTTP://example.com/"));
    assert!(!is_http_url("chrome-extension://abc/script.js"));
    assert!(!is_http_url("data:text/plain,hi"));
    assert!(!is_http_url("http"));
  }

  #[test]
  fn test_response_status_helpers() {
    let ok = Response::new("https://example.com/", 200, "hi").with_header("Content-Type", "text/plain");
    assert!(ok.is_ok());
    assert_eq!(ok.status_text, "OK");
    assert_eq!(ok.header("content-type"), Some("text/plain"));
    assert!(!Response::new("https://example.com/", 404, "").is_ok());
  }
}
