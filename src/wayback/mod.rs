//! Wayback Machine "Save Page Now" submissions.
//!
//! Submission is fire-and-forget from the archiver's point of view: nothing is
//! stored on the link, the result is only logged.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::constants::ARCHIVAL_USER_AGENT;

/// Something that can ask an external archive to snapshot a URL.
#[async_trait]
pub trait WaybackSubmitter: Send + Sync {
    /// Returns the snapshot URL when the archive reported one.
    async fn submit(&self, url: &str) -> Result<Option<String>>;
}

pub struct WaybackClient {
    client: Client,
    base_url: String,
}

impl WaybackClient {
    /// Create a client talking to `base_url` (normally `https://web.archive.org`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(ARCHIVAL_USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create Wayback HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WaybackSubmitter for WaybackClient {
    async fn submit(&self, url: &str) -> Result<Option<String>> {
        debug!(url = %url, "Submitting URL to Wayback Machine");

        let save_url = format!("{}/save/{url}", self.base_url);
        let response = self
            .client
            .get(&save_url)
            .send()
            .await
            .context("Failed to submit to Wayback Machine")?;

        let status = response.status();

        if status.is_success() || status.is_redirection() {
            if let Some(loc) = response
                .headers()
                .get("content-location")
                .and_then(|v| v.to_str().ok())
            {
                let snapshot_url = format!("{}{loc}", self.base_url);
                info!(url = %url, snapshot = %snapshot_url, "Wayback snapshot created");
                return Ok(Some(snapshot_url));
            }

            if let Some(memento) = response
                .headers()
                .get("link")
                .and_then(|v| v.to_str().ok())
                .and_then(extract_memento_url)
            {
                info!(url = %url, snapshot = %memento, "Wayback snapshot created");
                return Ok(Some(memento));
            }

            info!(url = %url, "Wayback submission accepted");
            return Ok(None);
        }

        if status.as_u16() == 520 || status.as_u16() == 523 {
            warn!(url = %url, status = %status, "Target site may be blocking Wayback archival");
            return Ok(None);
        }

        anyhow::bail!("Wayback Machine rejected submission with status {status}")
    }
}

/// Extract the memento URL from a `Link` header.
fn extract_memento_url(link_header: &str) -> Option<String> {
    // <url>; rel="memento"; datetime="..."
    link_header
        .split(',')
        .filter(|part| part.contains("rel=\"memento\"") || part.contains("rel=memento"))
        .find_map(|part| {
            let start = part.find('<')?;
            let end = part.find('>')?;
            Some(part[start + 1..end].to_string())
        })
}
