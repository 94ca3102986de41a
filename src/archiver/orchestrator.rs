//! Archive one link end to end.
//!
//! ```text
//! guard ──(disabled / not http)──> mark unavailable, stamp, done
//!   │
//! acquire browser ─> captcha ─> folders ─> settings ─> race(pipeline, timer)
//!   │                                                        │
//!   └───────────────────── finalize (always) <───────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::link_type::LinkTypeResolver;
use super::local::LocalProducers;
use super::pipeline::{self, PipelineContext};
use super::producers::ArtifactProducers;
use super::settings::ArchivalSettings;
use crate::browser::{BrowserLauncher, BrowserSession, ChromiumLauncher};
use crate::captcha::{CaptchaSolver, SolveStatus};
use crate::config::Config;
use crate::constants::{CAPTCHA_PLACEHOLDER_TITLE, DEFAULT_CAPTCHA_TIMEOUT_MS};
use crate::db::{self, ArchivalTarget, Database, LinkPatch};
use crate::storage::Storage;
use crate::tagging::AutoTagger;
use crate::wayback::{WaybackClient, WaybackSubmitter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Browser has been open for more than {0:?}")]
    Timeout(Duration),
    #[error("link {0} not found")]
    LinkNotFound(i64),
    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}

impl ArchiveError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// New name for a link after a run, if it should change.
///
/// Only a link still carrying the captcha interstitial title adopts the
/// captured page title.
#[must_use]
pub fn reconcile_title(stored: &str, captured: Option<&str>) -> Option<String> {
    let captured = captured.filter(|t| !t.is_empty())?;
    if captured == stored || stored != CAPTCHA_PLACEHOLDER_TITLE {
        return None;
    }
    Some(captured.to_string())
}

fn is_http_url(url: Option<&str>) -> bool {
    url.and_then(|u| url::Url::parse(u).ok())
        .is_some_and(|u| matches!(u.scheme(), "http" | "https"))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Race the pipeline against `timeout`.
///
/// When the timer wins the token is cancelled and the pipeline task is left
/// to wind down on its own.
pub async fn race_pipeline(ctx: PipelineContext, timeout: Duration) -> Result<(), ArchiveError> {
    let cancel = ctx.cancel.clone();
    let task = tokio::spawn(pipeline::run(ctx));

    tokio::select! {
        joined = task => match joined {
            Ok(result) => result.map_err(ArchiveError::Pipeline),
            Err(e) => Err(ArchiveError::Pipeline(
                anyhow::Error::new(e).context("Pipeline task failed"),
            )),
        },
        () = tokio::time::sleep(timeout) => {
            cancel.cancel();
            Err(ArchiveError::Timeout(timeout))
        }
    }
}

pub struct Archiver {
    config: Arc<Config>,
    db: Database,
    storage: Storage,
    launcher: Arc<dyn BrowserLauncher>,
    captcha: CaptchaSolver,
    resolver: LinkTypeResolver,
    producers: Arc<dyn ArtifactProducers>,
    wayback: Arc<dyn WaybackSubmitter>,
}

impl Archiver {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        db: Database,
        launcher: Arc<dyn BrowserLauncher>,
        producers: Arc<dyn ArtifactProducers>,
        wayback: Arc<dyn WaybackSubmitter>,
    ) -> Self {
        Self {
            storage: Storage::new(&config.storage_dir),
            captcha: CaptchaSolver::new(config.captcha_solver_url.clone()),
            resolver: LinkTypeResolver::new(config.max_file_size_bytes()),
            config,
            db,
            launcher,
            producers,
            wayback,
        }
    }

    /// Archiver wired to Chromium, local storage and the Wayback Machine.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn with_defaults(config: Arc<Config>, db: Database) -> Result<Self> {
        let storage = Storage::new(&config.storage_dir);
        let producers = LocalProducers::new(
            db.clone(),
            storage,
            config.monolith_config(),
            AutoTagger::from_config(&config),
            config.max_file_size_bytes(),
        );
        let wayback = WaybackClient::new(&config.wayback_base_url)?;
        let launcher = ChromiumLauncher::new(Arc::clone(&config));

        Ok(Self::new(
            config,
            db,
            Arc::new(launcher),
            Arc::new(producers),
            Arc::new(wayback),
        ))
    }

    /// Load a link with its owner and tags, then archive it.
    ///
    /// # Errors
    ///
    /// See [`archive`](Self::archive); also fails if the link does not exist.
    pub async fn archive_link(&self, link_id: i64) -> Result<(), ArchiveError> {
        let target = db::get_archival_target(self.db.pool(), link_id)
            .await?
            .ok_or(ArchiveError::LinkNotFound(link_id))?;
        self.archive(target).await
    }

    /// Archive one link.
    ///
    /// Finalization runs on every path that reaches the browser, after which
    /// the pipeline's error (if any) is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Timeout`] when the run overruns the browser
    /// timeout, or [`ArchiveError::Pipeline`] for any fatal stage failure.
    pub async fn archive(&self, target: ArchivalTarget) -> Result<(), ArchiveError> {
        let link = &target.link;

        if self.config.disable_preservation || !is_http_url(link.url.as_deref()) {
            debug!(
                link_id = link.id,
                disabled = self.config.disable_preservation,
                "Skipping preservation"
            );
            self.short_circuit(&target).await?;
            return Ok(());
        }

        info!(link_id = link.id, url = ?link.url, "Archiving link");

        let mut session: Option<Arc<dyn BrowserSession>> = None;
        let captured_title = Arc::new(Mutex::new(None));

        let result = self
            .run(&target, &mut session, Arc::clone(&captured_title))
            .await;

        if let Err(ref e) = result {
            error!(link_id = link.id, url = ?link.url, error = %e, "Archival failed");
        }

        let title = captured_title.lock().await.clone();
        self.finalize(&target, title.as_deref(), session.as_deref())
            .await;

        result
    }

    async fn short_circuit(&self, target: &ArchivalTarget) -> Result<()> {
        let pool = self.db.pool();
        let link = &target.link;

        db::mark_unset_artifacts_unavailable(pool, link.id).await?;

        let tag = target.owner.tagging_method().is_enabled()
            && !link.ai_tagged
            && self.config.has_ai_provider();

        db::update_link(
            pool,
            link.id,
            &LinkPatch {
                ai_tagged: tag.then_some(true),
                last_preserved: Some(now()),
                ..Default::default()
            },
        )
        .await
    }

    async fn run(
        &self,
        target: &ArchivalTarget,
        session_slot: &mut Option<Arc<dyn BrowserSession>>,
        captured_title: Arc<Mutex<Option<String>>>,
    ) -> Result<(), ArchiveError> {
        let link = &target.link;
        let url = link.url.clone().unwrap_or_default();

        let session = self.launcher.acquire().await?;
        *session_slot = Some(Arc::clone(&session));

        let solved = self.captcha.solve(&url, DEFAULT_CAPTCHA_TIMEOUT_MS).await;
        match solved.status {
            SolveStatus::Success => debug!(link_id = link.id, "Captcha solver succeeded"),
            SolveStatus::Skip => debug!(link_id = link.id, "No captcha solver configured"),
            SolveStatus::Fail => warn!(link_id = link.id, url = %url, "Captcha solver failed"),
            SolveStatus::Error => error!(link_id = link.id, url = %url, "Captcha solver errored"),
        }
        if let Some(cookies) = solved.usable_cookies() {
            if let Err(e) = session.set_cookies(cookies).await {
                warn!(link_id = link.id, error = %e, "Failed to inject captcha cookies");
            }
        }

        self.storage.ensure_link_folders(link.collection_id).await?;

        let settings = ArchivalSettings::resolve(&target.owner, &target.tags);
        debug!(link_id = link.id, settings = ?settings, "Resolved archival settings");

        let ctx = PipelineContext {
            link: link.clone(),
            owner: target.owner.clone(),
            settings,
            session,
            db: self.db.clone(),
            resolver: self.resolver.clone(),
            producers: Arc::clone(&self.producers),
            wayback: Arc::clone(&self.wayback),
            has_ai_provider: self.config.has_ai_provider(),
            cancel: CancellationToken::new(),
            captured_title,
        };

        race_pipeline(ctx, self.config.browser_timeout).await
    }

    async fn finalize(
        &self,
        target: &ArchivalTarget,
        captured_title: Option<&str>,
        session: Option<&dyn BrowserSession>,
    ) {
        if let Err(e) = self.reconcile(target, captured_title).await {
            error!(link_id = target.link.id, error = %e, "Failed to finalize link");
        }

        if let Some(session) = session.filter(|s| s.is_connected()) {
            if let Err(e) = session.close().await {
                warn!(link_id = target.link.id, error = %e, "Failed to close browser session");
            }
        }
    }

    async fn reconcile(&self, target: &ArchivalTarget, captured_title: Option<&str>) -> Result<()> {
        let pool = self.db.pool();
        let link = &target.link;

        let Some(current) = db::get_link(pool, link.id).await? else {
            info!(link_id = link.id, "Link removed during archival, cleaning up files");
            return self.storage.remove_files(link.id, link.collection_id).await;
        };

        db::mark_unset_artifacts_unavailable(pool, link.id).await?;

        let tag = target.owner.tagging_method().is_enabled() && !current.ai_tagged;
        db::update_link(
            pool,
            link.id,
            &LinkPatch {
                name: reconcile_title(&current.name, captured_title),
                ai_tagged: tag.then_some(true),
                last_preserved: Some(now()),
                ..Default::default()
            },
        )
        .await
    }
}
