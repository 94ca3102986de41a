//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use link_preserver::archiver::{ArchivalSettings, ArtifactProducers, ImageExtension};
use link_preserver::browser::{BrowserLauncher, BrowserSession, LivePage};
use link_preserver::captcha::SolvedCookie;
use link_preserver::config::Config;
use link_preserver::db::{
    self, AiTaggingMethod, ArtifactField, Database, Link, LinkPatch, NewLink, NewUser, User,
};
use link_preserver::wayback::WaybackSubmitter;

pub async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

pub fn test_config(temp_dir: &TempDir) -> Config {
    Config {
        database_path: temp_dir.path().join("test.sqlite"),
        storage_dir: temp_dir.path().join("storage"),
        browser_timeout: Duration::from_secs(30),
        ..Config::for_testing()
    }
}

pub async fn insert_owner(db: &Database, method: AiTaggingMethod) -> i64 {
    db::insert_user(
        db.pool(),
        &NewUser {
            username: "alice".to_string(),
            ai_tagging_method: method,
            ..NewUser::default()
        },
    )
    .await
    .expect("Failed to insert user")
}

pub async fn insert_link(db: &Database, owner_id: i64, url: &str) -> i64 {
    db::insert_link(
        db.pool(),
        &NewLink {
            collection_id: 7,
            owner_id,
            name: "Saved link".to_string(),
            url: Some(url.to_string()),
        },
    )
    .await
    .expect("Failed to insert link")
}

pub async fn fetch_link(db: &Database, id: i64) -> Option<Link> {
    db::get_link(db.pool(), id).await.expect("Failed to fetch link")
}

// ========== Browser ==========

#[derive(Debug, Clone)]
pub struct PageScript {
    pub title: Option<String>,
    pub content: String,
    pub description: String,
    pub fail_navigation: bool,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            title: Some("Example Article".to_string()),
            content: "<html><head><title>Example Article</title></head><body><p>Hello</p></body></html>".to_string(),
            description: "An example".to_string(),
            fail_navigation: false,
        }
    }
}

pub struct FakePage {
    script: PageScript,
}

#[async_trait]
impl LivePage for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        if self.script.fail_navigation {
            anyhow::bail!("net::ERR_NAME_NOT_RESOLVED at {url}");
        }
        Ok(())
    }

    async fn title(&self) -> Result<Option<String>> {
        Ok(self.script.title.clone())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.script.content.clone())
    }

    async fn meta_description(&self) -> Result<String> {
        Ok(self.script.description.clone())
    }

    async fn screenshot_png(&self, _full_page: bool) -> Result<Vec<u8>> {
        Ok(b"png".to_vec())
    }

    async fn preview_jpeg(&self) -> Result<Vec<u8>> {
        Ok(b"jpeg".to_vec())
    }

    async fn pdf(&self) -> Result<Vec<u8>> {
        Ok(b"%PDF".to_vec())
    }

    async fn close(&self) {}
}

#[derive(Default)]
pub struct FakeSession {
    pub script: PageScript,
    pub closed: AtomicBool,
    pub close_calls: AtomicUsize,
    pub cookies: Mutex<Vec<SolvedCookie>>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn set_cookies(&self, cookies: &[SolvedCookie]) -> Result<()> {
        self.cookies.lock().unwrap().extend_from_slice(cookies);
        Ok(())
    }

    async fn new_page(&self) -> Result<Box<dyn LivePage>> {
        Ok(Box::new(FakePage {
            script: self.script.clone(),
        }))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeLauncher {
    pub session: Arc<FakeSession>,
    pub acquired: AtomicUsize,
    pub fail: bool,
}

impl FakeLauncher {
    pub fn new(script: PageScript) -> Self {
        Self {
            session: Arc::new(FakeSession {
                script,
                ..FakeSession::default()
            }),
            acquired: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn acquire(&self) -> Result<Arc<dyn BrowserSession>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("Failed to launch browser");
        }
        Ok(Arc::clone(&self.session) as Arc<dyn BrowserSession>)
    }
}

// ========== Producers ==========

/// Producers that record calls and optionally store fake artifact paths.
pub struct RecordingProducers {
    pub db: Database,
    pub calls: Mutex<Vec<String>>,
    /// Store a path for every artifact a producer is responsible for.
    pub write_fields: bool,
    pub preview_delay: Option<Duration>,
    pub delete_link_on_preview: bool,
    pub fail_monolith: bool,
    /// Keep monolith busy this long unless the run is cancelled first.
    pub monolith_delay: Option<Duration>,
    pub monolith_cancelled: AtomicBool,
}

impl RecordingProducers {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            calls: Mutex::new(Vec::new()),
            write_fields: true,
            preview_delay: None,
            delete_link_on_preview: false,
            fail_monolith: false,
            monolith_delay: None,
            monolith_cancelled: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    async fn store(&self, link: &Link, field: ArtifactField, suffix: &str) -> Result<()> {
        if self.write_fields {
            let path = format!("archives/{}/{}{suffix}", link.collection_id, link.id);
            db::update_link(self.db.pool(), link.id, &LinkPatch::artifact(field, path)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactProducers for RecordingProducers {
    async fn image(&self, link: &Link, ext: ImageExtension) -> Result<()> {
        self.push(format!("image:{}", ext.as_str()));
        self.store(link, ArtifactField::Image, &format!(".{}", ext.as_str()))
            .await
    }

    async fn pdf(&self, link: &Link) -> Result<()> {
        self.push("pdf");
        self.store(link, ArtifactField::Pdf, ".pdf").await
    }

    async fn preview(&self, link: &Link, _page: &dyn LivePage) -> Result<()> {
        self.push("preview");
        if let Some(delay) = self.preview_delay {
            tokio::time::sleep(delay).await;
        }
        if self.delete_link_on_preview {
            db::delete_link(self.db.pool(), link.id).await?;
            return Ok(());
        }
        self.store(link, ArtifactField::Preview, ".jpeg").await
    }

    async fn readability(&self, _content: &str, link: &Link) -> Result<()> {
        self.push("readability");
        self.store(link, ArtifactField::Readable, "_readability.json")
            .await
    }

    async fn screenshot_pdf(
        &self,
        link: &Link,
        _page: &dyn LivePage,
        settings: &ArchivalSettings,
    ) -> Result<()> {
        self.push("screenshot_pdf");
        if settings.screenshot && !link.is_populated(ArtifactField::Image) {
            self.store(link, ArtifactField::Image, ".png").await?;
        }
        if settings.pdf && !link.is_populated(ArtifactField::Pdf) {
            self.store(link, ArtifactField::Pdf, ".pdf").await?;
        }
        Ok(())
    }

    async fn monolith(&self, link: &Link, _content: &str, cancel: CancellationToken) -> Result<()> {
        self.push("monolith");
        if let Some(delay) = self.monolith_delay {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.monolith_cancelled.store(true, Ordering::SeqCst);
                    anyhow::bail!("monolith cancelled");
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
        if self.fail_monolith {
            anyhow::bail!("monolith exited with status 1");
        }
        self.store(link, ArtifactField::Monolith, ".html").await
    }

    async fn auto_tag(&self, _owner: &User, link_id: i64, description: Option<&str>) -> Result<()> {
        self.push(format!("auto_tag:{}", description.unwrap_or_default()));
        db::update_link(
            self.db.pool(),
            link_id,
            &LinkPatch {
                ai_tagged: Some(true),
                ..Default::default()
            },
        )
        .await
    }
}

#[derive(Default)]
pub struct FakeWayback {
    pub submitted: Mutex<Vec<String>>,
    /// Reject every submission.
    pub fail: bool,
    /// Never answer.
    pub hang: bool,
}

impl FakeWayback {
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl WaybackSubmitter for FakeWayback {
    async fn submit(&self, url: &str) -> Result<Option<String>> {
        self.submitted.lock().unwrap().push(url.to_string());
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            anyhow::bail!("wayback rejected submission");
        }
        Ok(None)
    }
}
