//! Producers that write artifacts to local storage.

use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::ImageOutputFormat;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::link_type::ImageExtension;
use super::monolith::{create_complete_html, MonolithConfig};
use super::producers::ArtifactProducers;
use super::readability;
use super::settings::ArchivalSettings;
use crate::browser::LivePage;
use crate::constants::{ARCHIVAL_USER_AGENT, UNAVAILABLE};
use crate::db::{self, ArtifactField, Database, Link, LinkPatch, User};
use crate::storage::Storage;
use crate::tagging::AutoTagger;

/// Longest edge of an image preview, in pixels.
const PREVIEW_MAX_EDGE: u32 = 1000;
const PREVIEW_JPEG_QUALITY: u8 = 20;

pub struct LocalProducers {
    db: Database,
    storage: Storage,
    client: Client,
    monolith: MonolithConfig,
    tagger: AutoTagger,
    max_size: u64,
}

impl LocalProducers {
    #[must_use]
    pub fn new(
        db: Database,
        storage: Storage,
        monolith: MonolithConfig,
        tagger: AutoTagger,
        max_size: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .unwrap_or_default();

        Self {
            db,
            storage,
            client,
            monolith,
            tagger,
            max_size,
        }
    }

    async fn record(&self, link: &Link, field: ArtifactField, value: &str) -> Result<()> {
        db::update_link(self.db.pool(), link.id, &LinkPatch::artifact(field, value)).await
    }

    async fn download(&self, link: &Link) -> Result<Vec<u8>> {
        let url = link.url.as_deref().context("Link has no URL")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {url}"))?
            .error_for_status()
            .with_context(|| format!("Download of {url} was rejected"))?;

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {url}"))?;

        if bytes.len() as u64 > self.max_size {
            anyhow::bail!(
                "Downloaded {} bytes from {url}, larger than the {} byte limit",
                bytes.len(),
                self.max_size
            );
        }
        Ok(bytes.to_vec())
    }

    async fn store_image_preview(&self, link: &Link, bytes: Vec<u8>) -> Result<()> {
        let jpeg = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let img = image::load_from_memory(&bytes).context("Failed to decode image")?;
            let thumb = img.thumbnail(PREVIEW_MAX_EDGE, PREVIEW_MAX_EDGE);
            let mut out = Cursor::new(Vec::new());
            thumb
                .write_to(&mut out, ImageOutputFormat::Jpeg(PREVIEW_JPEG_QUALITY))
                .context("Failed to encode preview")?;
            Ok(out.into_inner())
        })
        .await
        .context("Preview task panicked")??;

        let path = Storage::preview_path(link.collection_id, link.id);
        self.storage.write(&path, &jpeg).await?;
        self.record(link, ArtifactField::Preview, &path).await
    }
}

#[async_trait]
impl ArtifactProducers for LocalProducers {
    async fn image(&self, link: &Link, ext: ImageExtension) -> Result<()> {
        let bytes = self.download(link).await?;

        let path = Storage::artifact_path(link.collection_id, link.id, &format!(".{}", ext.as_str()));
        self.storage.write(&path, &bytes).await?;
        self.record(link, ArtifactField::Image, &path).await?;

        if !link.is_populated(ArtifactField::Preview) {
            if let Err(e) = self.store_image_preview(link, bytes).await {
                warn!(link_id = link.id, error = %e, "Failed to create image preview");
            }
        }

        info!(link_id = link.id, path = %path, "Image stored");
        Ok(())
    }

    async fn pdf(&self, link: &Link) -> Result<()> {
        let bytes = self.download(link).await?;
        let path = Storage::artifact_path(link.collection_id, link.id, ".pdf");
        self.storage.write(&path, &bytes).await?;
        self.record(link, ArtifactField::Pdf, &path).await?;
        info!(link_id = link.id, path = %path, "PDF stored");
        Ok(())
    }

    async fn preview(&self, link: &Link, page: &dyn LivePage) -> Result<()> {
        let jpeg = page.preview_jpeg().await?;
        let path = Storage::preview_path(link.collection_id, link.id);
        self.storage.write(&path, &jpeg).await?;
        self.record(link, ArtifactField::Preview, &path).await
    }

    async fn readability(&self, content: &str, link: &Link) -> Result<()> {
        let readable = readability::extract(content);
        if readable.is_empty() {
            debug!(link_id = link.id, "No readable content found");
            return self.record(link, ArtifactField::Readable, UNAVAILABLE).await;
        }

        let json = serde_json::to_vec(&readable).context("Failed to serialize readable content")?;
        let path = Storage::artifact_path(link.collection_id, link.id, "_readability.json");
        self.storage.write(&path, &json).await?;
        self.record(link, ArtifactField::Readable, &path).await
    }

    async fn screenshot_pdf(
        &self,
        link: &Link,
        page: &dyn LivePage,
        settings: &ArchivalSettings,
    ) -> Result<()> {
        if settings.screenshot && !link.is_populated(ArtifactField::Image) {
            let png = page.screenshot_png(true).await?;
            let path = Storage::artifact_path(link.collection_id, link.id, ".png");
            self.storage.write(&path, &png).await?;
            self.record(link, ArtifactField::Image, &path).await?;
        }

        if settings.pdf && !link.is_populated(ArtifactField::Pdf) {
            let pdf = page.pdf().await?;
            let path = Storage::artifact_path(link.collection_id, link.id, ".pdf");
            self.storage.write(&path, &pdf).await?;
            self.record(link, ArtifactField::Pdf, &path).await?;
        }

        Ok(())
    }

    async fn monolith(&self, link: &Link, content: &str, cancel: CancellationToken) -> Result<()> {
        let url = link.url.as_deref().context("Link has no URL")?;
        let path = Storage::artifact_path(link.collection_id, link.id, ".html");

        let size = create_complete_html(
            content,
            url,
            &self.storage.absolute(&path),
            &self.monolith,
            &cancel,
        )
        .await?;

        self.record(link, ArtifactField::Monolith, &path).await?;
        info!(link_id = link.id, size, "Monolith snapshot stored");
        Ok(())
    }

    async fn auto_tag(&self, owner: &User, link_id: i64, description: Option<&str>) -> Result<()> {
        self.tagger
            .tag_link(self.db.pool(), owner, link_id, description)
            .await
    }
}
