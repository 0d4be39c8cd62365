//! Outbound network access.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::config::NetworkConfig;
use crate::http::{Request, Response};

/// Anything that can perform a fetch.
///
/// An `Err` means the fetch itself was rejected (no connection, aborted).
/// Any HTTP status, including 4xx and 5xx, is an `Ok` response.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let response = self
      .client
      .request(request.method.clone(), request.url.as_str())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let url = response.url().to_string();
    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      headers,
      ..Response::new(url, status.as_u16(), body.to_vec())
    })
  }
}

/// Network that rejects every fetch, for simulating loss of connectivity.
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    Err(eyre!("Failed to fetch {}: network is offline", request.url))
  }
}
