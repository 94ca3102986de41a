//! Classify a link's target with a header probe.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::ARCHIVAL_USER_AGENT;
use crate::db::LinkType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageExtension {
    Png,
    Jpeg,
}

impl ImageExtension {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

/// What the probe decided the link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedType {
    Url,
    Pdf,
    Image(ImageExtension),
}

impl ResolvedType {
    #[must_use]
    pub fn link_type(&self) -> LinkType {
        match self {
            Self::Url => LinkType::Url,
            Self::Pdf => LinkType::Pdf,
            Self::Image(_) => LinkType::Image,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("header probe failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("resource is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
}

/// Map a `Content-Type` header value to a link type.
///
/// `image/jpeg` and `image/jpg` are JPEG; every other image subtype is stored
/// as PNG.
#[must_use]
pub fn classify_content_type(content_type: Option<&str>) -> ResolvedType {
    let Some(raw) = content_type else {
        return ResolvedType::Url;
    };
    let mime = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "application/pdf" {
        ResolvedType::Pdf
    } else if let Some(subtype) = mime.strip_prefix("image/") {
        if matches!(subtype, "jpeg" | "jpg") {
            ResolvedType::Image(ImageExtension::Jpeg)
        } else {
            ResolvedType::Image(ImageExtension::Png)
        }
    } else {
        ResolvedType::Url
    }
}

#[derive(Debug, Clone)]
pub struct LinkTypeResolver {
    client: Client,
    max_size: u64,
}

impl LinkTypeResolver {
    #[must_use]
    pub fn new(max_size: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .unwrap_or_default();

        Self { client, max_size }
    }

    /// Issue a HEAD request and classify the response.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Request`] on transport failure and
    /// [`ProbeError::TooLarge`] when `Content-Length` exceeds the limit.
    pub async fn probe(&self, url: &str) -> Result<ResolvedType, ProbeError> {
        let response = self.client.head(url).send().await?;
        let headers = response.headers();

        // reqwest reports no body length for HEAD, so read the header directly.
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(size) = size.filter(|s| *s > self.max_size) {
            return Err(ProbeError::TooLarge {
                size,
                limit: self.max_size,
            });
        }

        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let resolved = classify_content_type(content_type);
        debug!(url = %url, content_type = ?content_type, resolved = ?resolved, "Classified link");
        Ok(resolved)
    }

    /// Like [`probe`](Self::probe), but a failed request degrades to a page.
    ///
    /// # Errors
    ///
    /// Only an oversize resource is an error.
    pub async fn resolve(&self, url: &str) -> Result<ResolvedType, ProbeError> {
        match self.probe(url).await {
            Err(ProbeError::Request(e)) => {
                warn!(url = %url, error = %e, "Header probe failed, treating link as a web page");
                Ok(ResolvedType::Url)
            }
            other => other,
        }
    }
}
