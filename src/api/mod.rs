pub mod openverse;
pub mod wikipedia;

use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;

/// Query-string pairs, sent in order.
pub type Query<'a> = &'a [(&'a str, String)];

/// Blocking-free HTTP access used by the media sources and the downloader.
///
/// Every failure (transport, non-2xx status, undecodable body) surfaces as
/// [`Error::SourceUnavailable`].
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get_json(&self, url: &str, query: Query<'_>) -> Result<serde_json::Value>;

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct ReqwestFetch {
    pub client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(cfg: &ResolverConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .gzip(true)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn get_json(&self, url: &str, query: Query<'_>) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::unavailable(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::unavailable(url, format!("HTTP {}", status.as_u16())));
        }

        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| Error::unavailable(url, format!("bad JSON body: {e}")))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::unavailable(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::unavailable(url, format!("HTTP {}", status.as_u16())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::unavailable(url, format!("body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}
