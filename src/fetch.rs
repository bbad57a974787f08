use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::config::Settings;
use crate::error::BookError;

/// A fetched page. `url` is where the request ended up after redirects.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

/// Sequential HTTP client that keeps at least `delay` between requests.
pub struct Fetcher {
    client: reqwest::Client,
    delay: Duration,
    last: Option<Instant>,
}

impl Fetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            delay: Duration::from_millis(settings.delay_ms),
            last: None,
        })
    }

    pub async fn fetch(&mut self, url: &Url) -> Result<Page, BookError> {
        self.wait_turn().await;

        debug!(%url, "GET");
        let result = self.get(url).await;
        self.last = Some(Instant::now());

        result.map_err(|e| BookError::FetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get(&self, url: &Url) -> reqwest::Result<Page> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        let final_url = response.url().clone();
        let body = response.text().await?;
        Ok(Page {
            url: final_url,
            body,
        })
    }

    async fn wait_turn(&self) {
        if let Some(last) = self.last {
            let ready = last + self.delay;
            if ready > Instant::now() {
                tokio::time::sleep_until(ready).await;
            }
        }
    }
}
