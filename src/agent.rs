//! Offline cache agent: install, activate and fetch policy.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, GenerationStatus};
use crate::config::AgentConfig;
use crate::host::Clients;
use crate::http::{is_http_url, Request, Response};
use crate::network::Network;

/// The three lifecycle entry points a host invokes.
#[async_trait]
pub trait WorkerHandler: Send + Sync {
  /// Prepare a new version. An error aborts installation.
  async fn on_install(&self) -> Result<()>;

  /// Take over from previous versions. Fails unless install completed.
  async fn on_activate(&self) -> Result<()>;

  /// Decide how an outbound request is answered.
  async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome>;

  /// Whether this version finished activating, possibly in an earlier run.
  async fn is_active(&self) -> Result<bool>;
}

/// How a request is treated by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Not an HTTP(S) request; left to the host untouched
  Ignored,
  /// Live data; network only, never cached
  Bypass,
  /// Network first with cache fallback
  NetworkFirst,
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh network response on the default path
  Network,
  /// Network response for a bypassed request
  Bypass,
  /// Network failed; cached entry for this request
  Cache,
  /// Network failed and nothing cached; app shell document for a navigation
  NavigationFallback,
  /// Network failed and nothing to fall back to
  Empty,
}

/// Result of intercepting a request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not intercepted; the host performs the request itself
  Passthrough,
  Respond(Served),
}

impl FetchOutcome {
  #[cfg(test)]
  pub fn served(self) -> Option<Served> {
    match self {
      FetchOutcome::Respond(served) => Some(served),
      FetchOutcome::Passthrough => None,
    }
  }
}

/// Response handed back to the caller, plus the detached cache write it triggered.
#[derive(Debug)]
pub struct Served {
  /// `None` when nothing could be served
  pub response: Option<Response>,
  pub source: ResponseSource,
  pub cache_write: Option<CacheWrite>,
}

impl Served {
  fn new(response: Option<Response>, source: ResponseSource) -> Self {
    Self {
      response,
      source,
      cache_write: None,
    }
  }
}

/// A cache write running in the background after a response was returned.
///
/// Failures are logged inside the task and never reach the request caller.
/// Dropping the handle does not cancel the write.
#[derive(Debug)]
pub struct CacheWrite {
  handle: JoinHandle<()>,
}

impl CacheWrite {
  /// Wait for the write to finish, whatever its outcome.
  pub async fn settled(self) {
    if let Err(e) = self.handle.await {
      warn!("Cache write task did not complete: {}", e);
    }
  }
}

/// Network-first caching agent bound to one cache generation.
pub struct OfflineCacheAgent<S: ?Sized, N: ?Sized, C> {
  config: Arc<AgentConfig>,
  store: Arc<S>,
  network: Arc<N>,
  clients: C,
}

impl<S, N, C> OfflineCacheAgent<S, N, C>
where
  S: CacheStore + ?Sized + 'static,
  N: Network + ?Sized,
  C: Clients,
{
  pub fn new(config: AgentConfig, store: Arc<S>, network: Arc<N>, clients: C) -> Self {
    Self {
      config: Arc::new(config),
      store,
      network,
      clients,
    }
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  #[cfg(test)]
  pub fn clients(&self) -> &C {
    &self.clients
  }

  /// Classify a request URL.
  pub fn classify(&self, url: &str) -> RequestClass {
    if !is_http_url(url) {
      RequestClass::Ignored
    } else if self
      .config
      .bypass_patterns
      .iter()
      .any(|p| url.contains(p.as_str()))
    {
      RequestClass::Bypass
    } else {
      RequestClass::NetworkFirst
    }
  }

  /// Store a network response in the background.
  fn spawn_cache_write(&self, request: &Request, response: Response) -> CacheWrite {
    let store = Arc::clone(&self.store);
    let cache_name = self.config.cache_name.clone();
    let request = request.clone();

    let handle = tokio::task::spawn_blocking(move || {
      match store.put(&cache_name, &request, &response) {
        Ok(()) => debug!("Cached {} in {}", request.url, cache_name),
        Err(e) => warn!("Failed to cache {}: {}", request.url, e),
      }
    });

    CacheWrite { handle }
  }

  /// Answer from the current generation after a network failure.
  fn serve_offline(&self, request: &Request) -> Result<Served> {
    let cache_name = &self.config.cache_name;

    if let Some(cached) = self.store.match_request(cache_name, request)? {
      info!("Serving from cache: {}", request.url);
      return Ok(Served::new(Some(cached), ResponseSource::Cache));
    }

    if request.is_navigation() {
      let fallback = Request::get(self.config.resolve(&self.config.navigation_fallback)?);
      let document = self.store.match_request(cache_name, &fallback)?;
      if document.is_some() {
        info!("Serving app shell for navigation: {}", request.url);
      } else {
        warn!("App shell missing from {}; nothing to serve for {}", cache_name, request.url);
      }
      return Ok(Served::new(document, ResponseSource::NavigationFallback));
    }

    debug!("No cached response for {}", request.url);
    Ok(Served::new(None, ResponseSource::Empty))
  }

  async fn network_first(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        let cache_write = if response.status == 200 {
          Some(self.spawn_cache_write(request, response.clone()))
        } else {
          debug!("Not caching {} (status {})", request.url, response.status);
          None
        };
        Served {
          response: Some(response),
          source: ResponseSource::Network,
          cache_write,
        }
      }
      Err(e) => {
        debug!("Network failed for {}: {}", request.url, e);
        self.serve_offline(request).unwrap_or_else(|e| {
          warn!("Cache lookup failed for {}: {}", request.url, e);
          Served::new(None, ResponseSource::Empty)
        })
      }
    }
  }
}

#[async_trait]
impl<S, N, C> WorkerHandler for OfflineCacheAgent<S, N, C>
where
  S: CacheStore + ?Sized + 'static,
  N: Network + ?Sized,
  C: Clients,
{
  async fn on_install(&self) -> Result<()> {
    let cache_name = &self.config.cache_name;
    info!("Installing {}", cache_name);

    self.store.open(cache_name)?;

    let requests: Vec<Request> = self
      .config
      .seed_resources()?
      .into_iter()
      .map(|url| Request::get(url.as_str()))
      .collect();

    info!("Caching app shell ({} resources)", requests.len());

    // Every seed must load before anything is written.
    let responses = try_join_all(requests.iter().map(|request| async move {
      let response = self.network.fetch(request).await?;
      if !response.is_ok() {
        return Err(eyre!(
          "Seed resource {} returned status {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>(response)
    }))
    .await
    .map_err(|e| eyre!("Failed to install {}: {}", cache_name, e))?;

    let entries: Vec<(Request, Response)> = requests.into_iter().zip(responses).collect();
    self.store.install(cache_name, &entries)?;

    self.clients.skip_waiting().await?;
    info!("Installed {}", cache_name);
    Ok(())
  }

  async fn on_activate(&self) -> Result<()> {
    let current = &self.config.cache_name;
    info!("Activating {}", current);

    let status = self.store.status(current)?;
    if !status.is_some_and(|s| s.is_installed()) {
      return Err(eyre!(
        "Cannot activate {}: install has not completed",
        current
      ));
    }

    let stale: Vec<String> = self
      .store
      .keys()?
      .into_iter()
      .filter(|name| name != current)
      .collect();

    for name in &stale {
      info!("Deleting old cache: {}", name);
      self
        .store
        .delete(name)
        .map_err(|e| eyre!("Failed to delete old cache {}: {}", name, e))?;
    }

    self.store.set_status(current, GenerationStatus::Activated)?;
    self.clients.claim().await?;
    info!("Activated {}", current);
    Ok(())
  }

  async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    match self.classify(&request.url) {
      RequestClass::Ignored => Ok(FetchOutcome::Passthrough),
      RequestClass::Bypass => {
        debug!("Bypassing cache for {}", request.url);
        let response = self.network.fetch(request).await?;
        Ok(FetchOutcome::Respond(Served::new(
          Some(response),
          ResponseSource::Bypass,
        )))
      }
      RequestClass::NetworkFirst => Ok(FetchOutcome::Respond(self.network_first(request).await)),
    }
  }

  async fn is_active(&self) -> Result<bool> {
    Ok(self.store.status(&self.config.cache_name)? == Some(GenerationStatus::Activated))
  }
}
