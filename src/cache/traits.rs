//! Core trait for cache store backends.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;

use crate::http::{Request, Response};

/// How far a generation got through the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
  /// Created, app shell not (yet) stored
  Opened,
  /// App shell stored in full
  Installed,
  /// Took over from older generations
  Activated,
}

impl GenerationStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      GenerationStatus::Opened => "opened",
      GenerationStatus::Installed => "installed",
      GenerationStatus::Activated => "activated",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "opened" => Ok(GenerationStatus::Opened),
      "installed" => Ok(GenerationStatus::Installed),
      "activated" => Ok(GenerationStatus::Activated),
      other => Err(eyre!("Unknown generation status '{}'", other)),
    }
  }

  /// Whether the app shell is complete.
  pub fn is_installed(&self) -> bool {
    matches!(self, GenerationStatus::Installed | GenerationStatus::Activated)
  }
}

/// Trait for cache store backends.
///
/// Operations are per-key atomic; no multi-key transaction is offered.
pub trait CacheStore: Send + Sync {
  /// Open the named generation, creating it if absent.
  fn open(&self, name: &str) -> Result<()>;

  /// Lifecycle status of a generation, `None` if it does not exist.
  fn status(&self, name: &str) -> Result<Option<GenerationStatus>>;

  /// Record a generation's lifecycle status. Fails if it does not exist.
  fn set_status(&self, name: &str, status: GenerationStatus) -> Result<()>;

  /// Store every entry and mark the generation installed, all or nothing.
  fn install(&self, name: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Names of all existing generations.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a generation and every entry in it. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up the stored response for a request in one generation.
  fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>>;

  /// Store a response for a request, replacing any previous entry.
  /// Creates the generation if absent.
  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()>;

  /// Requests stored in a generation.
  fn requests(&self, name: &str) -> Result<Vec<Request>>;
}

/// Reject requests the cache cannot hold.
pub(super) fn ensure_cacheable(request: &Request) -> Result<()> {
  if request.method != Method::GET {
    return Err(eyre!(
      "Request method '{}' is unsupported for caching: {}",
      request.method,
      request.url
    ));
  }
  Ok(())
}
