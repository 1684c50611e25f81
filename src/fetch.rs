// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Download client for NIST and DISA reference data

use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::{Result, StigqterError};

/// HTTP client with retries; local paths are read from disk instead
pub struct Fetcher {
    client: Client,
    retries: u32,
}

impl Fetcher {
    /// Create a new fetcher
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            retries: config.retries,
        })
    }

    fn is_remote(source: &str) -> bool {
        let lower = source.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    async fn get_once(&self, url: &str) -> Result<reqwest::Response> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(StigqterError::Document(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        Ok(response)
    }

    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                warn!("Retrying {} in {:?} (attempt {})", url, delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.get_once(url).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| StigqterError::Document(format!("Unable to fetch {}", url))))
    }

    /// Fetch a text document (HTML page, XML feed)
    pub async fn download_page(&self, source: &str) -> Result<String> {
        if !Self::is_remote(source) {
            return Ok(tokio::fs::read_to_string(Path::new(source)).await?);
        }
        let response = self.get_with_retry(source).await?;
        Ok(response.text().await?)
    }

    /// Fetch a binary document (zip bundle)
    pub async fn download_bytes(&self, source: &str) -> Result<Vec<u8>> {
        if !Self::is_remote(source) {
            return Ok(tokio::fs::read(Path::new(source)).await?);
        }
        let response = self.get_with_retry(source).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
