use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::link_type::ImageExtension;
use super::settings::ArchivalSettings;
use crate::browser::LivePage;
use crate::db::{Link, User};

/// The artifact producers the pipeline drives.
///
/// Each producer writes its file(s) and records the result on the link
/// itself. An `Err` from any of them except `monolith` aborts the pipeline.
#[async_trait]
pub trait ArtifactProducers: Send + Sync {
    /// Download a direct image link and store it with a preview.
    async fn image(&self, link: &Link, ext: ImageExtension) -> Result<()>;

    /// Download a direct PDF link.
    async fn pdf(&self, link: &Link) -> Result<()>;

    /// Store a small preview of the rendered page.
    async fn preview(&self, link: &Link, page: &dyn LivePage) -> Result<()>;

    async fn readability(&self, content: &str, link: &Link) -> Result<()>;

    /// Store a screenshot and/or a printed PDF, as `settings` asks for.
    async fn screenshot_pdf(
        &self,
        link: &Link,
        page: &dyn LivePage,
        settings: &ArchivalSettings,
    ) -> Result<()>;

    /// Bundle `content` into a self-contained HTML file. Honors `cancel`.
    async fn monolith(&self, link: &Link, content: &str, cancel: CancellationToken) -> Result<()>;

    async fn auto_tag(&self, owner: &User, link_id: i64, description: Option<&str>) -> Result<()>;
}
