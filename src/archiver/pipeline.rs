//! The per-link artifact pipeline.
//!
//! Runs inside its own task so the orchestrator can race it against the
//! browser timeout. Stages run strictly in order; an error from any producer
//! other than monolith ends the run.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::link_type::{LinkTypeResolver, ResolvedType};
use super::producers::ArtifactProducers;
use super::settings::ArchivalSettings;
use crate::browser::BrowserSession;
use crate::db::{self, ArtifactField, Database, Link, LinkPatch, User};
use crate::wayback::WaybackSubmitter;

/// Everything one pipeline run owns.
pub struct PipelineContext {
    pub link: Link,
    pub owner: User,
    pub settings: ArchivalSettings,
    pub session: Arc<dyn BrowserSession>,
    pub db: Database,
    pub resolver: LinkTypeResolver,
    pub producers: Arc<dyn ArtifactProducers>,
    pub wayback: Arc<dyn WaybackSubmitter>,
    pub has_ai_provider: bool,
    pub cancel: CancellationToken,
    /// Title of the rendered page, read back by finalization.
    pub captured_title: Arc<Mutex<Option<String>>>,
}

/// Run the pipeline for one link.
///
/// # Errors
///
/// Returns the first fatal stage error: an oversize resource, a navigation
/// failure, or a failing producer.
pub async fn run(ctx: PipelineContext) -> Result<()> {
    let link = &ctx.link;
    let url = link.url.clone().context("Link has no URL")?;

    let resolved = ctx.resolver.resolve(&url).await?;
    db::update_link(
        ctx.db.pool(),
        link.id,
        &LinkPatch {
            link_type: Some(resolved.link_type()),
            ..Default::default()
        },
    )
    .await?;

    if ctx.settings.wayback {
        spawn_wayback(Arc::clone(&ctx.wayback), url.clone(), link.id);
    }

    match resolved {
        ResolvedType::Image(ext) => {
            if !link.is_populated(ArtifactField::Image) {
                ctx.producers.image(link, ext).await?;
            }
            Ok(())
        }
        ResolvedType::Pdf => {
            if !link.is_populated(ArtifactField::Pdf) {
                ctx.producers.pdf(link).await?;
            }
            Ok(())
        }
        ResolvedType::Url => run_page(&ctx, &url).await,
    }
}

fn spawn_wayback(wayback: Arc<dyn WaybackSubmitter>, url: String, link_id: i64) {
    tokio::spawn(async move {
        match wayback.submit(&url).await {
            Ok(Some(snapshot)) => debug!(link_id, snapshot = %snapshot, "Wayback submission done"),
            Ok(None) => debug!(link_id, "Wayback submission done without snapshot URL"),
            Err(e) => warn!(link_id, url = %url, error = %e, "Wayback submission failed"),
        }
    });
}

async fn run_page(ctx: &PipelineContext, url: &str) -> Result<()> {
    let link = &ctx.link;
    let settings = &ctx.settings;

    let page = ctx.session.new_page().await?;
    page.goto(url).await?;

    let title = page.title().await?;
    *ctx.captured_title.lock().await = title.clone();

    let content = page.content().await?;
    let description = page.meta_description().await.unwrap_or_else(|e| {
        debug!(link_id = link.id, error = %e, "No meta description");
        String::new()
    });

    debug!(link_id = link.id, title = ?title, "Page loaded");

    if !link.is_populated(ArtifactField::Preview) {
        ctx.producers.preview(link, page.as_ref()).await?;
    }

    if settings.readable && !link.is_populated(ArtifactField::Readable) {
        ctx.producers.readability(&content, link).await?;
    }

    if (settings.screenshot && !link.is_populated(ArtifactField::Image))
        || (settings.pdf && !link.is_populated(ArtifactField::Pdf))
    {
        ctx.producers.screenshot_pdf(link, page.as_ref(), settings).await?;
    }

    page.close().await;
    drop(page);
    if let Err(e) = ctx.session.close().await {
        warn!(link_id = link.id, error = %e, "Failed to close browser session");
    }

    if settings.ai_tag
        && ctx.owner.tagging_method().is_enabled()
        && !link.ai_tagged
        && ctx.has_ai_provider
    {
        let description = Some(description.as_str()).filter(|d| !d.is_empty());
        ctx.producers.auto_tag(&ctx.owner, link.id, description).await?;
    }

    if settings.monolith && !link.is_populated(ArtifactField::Monolith) {
        if let Err(e) = ctx
            .producers
            .monolith(link, &content, ctx.cancel.clone())
            .await
        {
            warn!(link_id = link.id, url = %url, error = %e, "Monolith snapshot failed");
        }
    }

    info!(link_id = link.id, "Page pipeline complete");
    Ok(())
}
