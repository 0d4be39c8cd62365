//! Host side of the agent: client control and lifecycle dispatch.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::{FetchOutcome, ResponseSource, Served, WorkerHandler};
use crate::http::Request;
use crate::network::Network;

/// Client-management operations the host exposes to a worker.
#[async_trait]
pub trait Clients: Send + Sync {
  /// Replace any previously active version without waiting for its clients to close.
  async fn skip_waiting(&self) -> Result<()>;

  /// Take control of already-open clients.
  async fn claim(&self) -> Result<()>;
}

/// In-process clients that record the signals they receive.
#[derive(Debug, Default)]
pub struct LocalClients {
  skip_waiting: AtomicBool,
  claimed: AtomicBool,
}

impl LocalClients {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub fn skipped_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  #[cfg(test)]
  pub fn claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Clients for LocalClients {
  async fn skip_waiting(&self) -> Result<()> {
    debug!("Skip waiting requested");
    self.skip_waiting.store(true, Ordering::SeqCst);
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    debug!("Claiming clients");
    self.claimed.store(true, Ordering::SeqCst);
    Ok(())
  }
}

#[async_trait]
impl<T: Clients> Clients for Arc<T> {
  async fn skip_waiting(&self) -> Result<()> {
    self.as_ref().skip_waiting().await
  }

  async fn claim(&self) -> Result<()> {
    self.as_ref().claim().await
  }
}

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Registered, no lifecycle event dispatched yet
  Parsed,
  Installing,
  Installed,
  Activating,
  /// Active and intercepting fetches
  Activated,
  /// Failed or superseded; never intercepts again
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

/// Drives a worker through install and activate, then routes fetches to it.
///
/// Activation never starts unless install succeeded. Requests the worker
/// does not intercept, and requests made before activation, go straight
/// to the network.
pub struct Runtime<H, N: ?Sized> {
  handler: H,
  network: Arc<N>,
  state: WorkerState,
}

impl<H: WorkerHandler, N: Network + ?Sized> Runtime<H, N> {
  pub fn new(handler: H, network: Arc<N>) -> Self {
    Self {
      handler,
      network,
      state: WorkerState::Parsed,
    }
  }

  /// Resume a worker that was installed and activated by an earlier run.
  ///
  /// Fails if that version never finished activating.
  pub async fn resume(handler: H, network: Arc<N>) -> Result<Self> {
    if !handler.is_active().await? {
      return Err(eyre!(
        "Worker has not been activated; run install and activate first"
      ));
    }

    Ok(Self {
      handler,
      network,
      state: WorkerState::Activated,
    })
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  #[cfg(test)]
  pub fn handler(&self) -> &H {
    &self.handler
  }

  pub async fn install(&mut self) -> Result<()> {
    if self.state != WorkerState::Parsed {
      return Err(eyre!("Cannot install worker in state {}", self.state));
    }

    self.state = WorkerState::Installing;
    match self.handler.on_install().await {
      Ok(()) => {
        self.state = WorkerState::Installed;
        Ok(())
      }
      Err(e) => {
        warn!("Install failed: {}", e);
        self.state = WorkerState::Redundant;
        Err(e)
      }
    }
  }

  pub async fn activate(&mut self) -> Result<()> {
    if self.state != WorkerState::Installed {
      return Err(eyre!("Cannot activate worker in state {}", self.state));
    }

    self.state = WorkerState::Activating;
    match self.handler.on_activate().await {
      Ok(()) => {
        self.state = WorkerState::Activated;
        info!("Worker activated");
        Ok(())
      }
      Err(e) => {
        warn!("Activation failed: {}", e);
        self.state = WorkerState::Redundant;
        Err(e)
      }
    }
  }

  /// Install then activate.
  pub async fn start(&mut self) -> Result<()> {
    self.install().await?;
    self.activate().await
  }

  /// Answer a request as the page would see it.
  pub async fn fetch(&self, request: &Request) -> Result<Served> {
    if self.state == WorkerState::Activated {
      if let FetchOutcome::Respond(served) = self.handler.on_fetch(request).await? {
        return Ok(served);
      }
      debug!("Not intercepted: {}", request.url);
    }

    let response = self.network.fetch(request).await?;
    Ok(Served {
      response: Some(response),
      source: ResponseSource::Network,
      cache_write: None,
    })
  }
}
