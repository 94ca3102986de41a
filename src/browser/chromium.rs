//! Chromium sessions driven over CDP with chromiumoxide.
//!
//! Every archival run gets a fresh session: either a locally launched headless
//! Chromium or a connection to a remote browser (`BROWSER_WS_URL`). Pages are
//! opened in a dedicated browser context so cookies injected for one run never
//! leak into another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventDomContentEventFired, NavigateParams, PrintToPdfParams,
};
use chromiumoxide::cdp::browser_protocol::security::SetIgnoreCertificateErrorsParams;
use chromiumoxide::cdp::browser_protocol::storage::SetCookiesParams;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserLauncher, BrowserSession, LivePage};
use crate::captcha::SolvedCookie;
use crate::config::Config;
use crate::constants::{
    ARCHIVAL_USER_AGENT, DEVICE_SCALE_FACTOR, DEVICE_VIEWPORT_HEIGHT, DEVICE_VIEWPORT_WIDTH,
    NAVIGATION_TIMEOUT_SECS,
};

const META_DESCRIPTION_JS: &str = r#"(() => {
    const meta = document.querySelector('meta[name="description"]');
    return meta ? (meta.getAttribute('content') || '') : '';
})()"#;

/// JPEG quality used for link previews.
const PREVIEW_JPEG_QUALITY: i64 = 20;

/// Command line for a locally launched Chromium.
#[must_use]
pub fn launch_args(config: &Config) -> Vec<String> {
    let mut args: Vec<String> = [
        "--headless=new",
        "--disable-gpu",
        "--disable-dev-shm-usage",
        "--disable-software-rasterizer",
        "--no-first-run",
        "--no-default-browser-check",
        "--disable-background-networking",
        "--disable-extensions",
        "--disable-sync",
        "--disable-translate",
        "--mute-audio",
        "--hide-scrollbars",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    args.push(format!(
        "--window-size={DEVICE_VIEWPORT_WIDTH},{DEVICE_VIEWPORT_HEIGHT}"
    ));

    if let Some(ref proxy) = config.proxy {
        args.push(format!("--proxy-server={}", proxy.server));
        if let Some(ref bypass) = proxy.bypass {
            args.push(format!("--proxy-bypass-list={bypass}"));
        }
    }

    if config.ignore_https_errors {
        args.push("--ignore-certificate-errors".to_string());
    }

    args
}

/// Convert solver cookies into CDP cookie parameters.
///
/// Cookies without a domain cannot be scoped before navigation and are skipped.
#[must_use]
pub fn cookie_params(cookies: &[SolvedCookie]) -> Vec<CookieParam> {
    cookies
        .iter()
        .filter_map(|cookie| {
            let Some(domain) = cookie.domain.as_deref() else {
                debug!(name = %cookie.name, "Skipping cookie without domain");
                return None;
            };

            let mut builder = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(domain)
                .path(cookie.path.clone().unwrap_or_else(|| "/".to_string()))
                .secure(cookie.secure)
                .http_only(cookie.http_only);

            if let Some(expires) = cookie.expires.filter(|e| *e > 0.0) {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }

            match builder.build() {
                Ok(param) => Some(param),
                Err(e) => {
                    warn!(name = %cookie.name, error = %e, "Failed to build cookie");
                    None
                }
            }
        })
        .collect()
}

fn spawn_handler_task(
    mut handler: chromiumoxide::Handler,
    closed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("Browser handler error: {e}");
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}

/// Launches (or connects to) Chromium for each archival run.
pub struct ChromiumLauncher {
    config: Arc<Config>,
}

impl ChromiumLauncher {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn acquire(&self) -> Result<Arc<dyn BrowserSession>> {
        let session = ChromiumSession::start(&self.config).await?;
        Ok(Arc::new(session))
    }
}

#[derive(Debug, Clone, Default)]
struct PageSetup {
    ignore_https_errors: bool,
    proxy_credentials: Option<(String, String)>,
}

pub struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    context_id: Option<BrowserContextId>,
    remote: bool,
    closed: Arc<AtomicBool>,
    handler_task: JoinHandle<()>,
    page_setup: PageSetup,
}

impl ChromiumSession {
    async fn start(config: &Config) -> Result<Self> {
        let closed = Arc::new(AtomicBool::new(false));

        let (browser, handler, remote) = if let Some(ref ws_url) = config.browser_ws_url {
            info!(ws_url = %ws_url, "Connecting to remote browser");
            let (browser, handler) = Browser::connect(ws_url.as_str())
                .await
                .context("Failed to connect to remote browser")?;
            (browser, handler, true)
        } else {
            debug!("Launching headless browser");
            let mut builder = BrowserConfig::builder()
                .window_size(DEVICE_VIEWPORT_WIDTH, DEVICE_VIEWPORT_HEIGHT)
                .request_timeout(Duration::from_secs(NAVIGATION_TIMEOUT_SECS))
                .no_sandbox()
                .disable_default_args()
                .args(launch_args(config));

            if let Some(ref path) = config.browser_executable_path {
                builder = builder.chrome_executable(path);
            }

            let browser_config = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

            let (browser, handler) = Browser::launch(browser_config)
                .await
                .context("Failed to launch browser")?;
            (browser, handler, false)
        };

        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        // A remote browser was not started with our proxy flags, so the proxy
        // is attached to the context instead.
        let (proxy_server, proxy_bypass_list) = match (&config.proxy, remote) {
            (Some(proxy), true) => (Some(proxy.server.clone()), proxy.bypass.clone()),
            _ => (None, None),
        };
        let context_params = CreateBrowserContextParams {
            proxy_server,
            proxy_bypass_list,
            ..Default::default()
        };
        let context_id = match browser.create_browser_context(context_params).await {
            Ok(id) => Some(id),
            Err(e) => {
                handler_task.abort();
                return Err(anyhow::Error::new(e).context("Failed to create browser context"));
            }
        };

        let page_setup = PageSetup {
            ignore_https_errors: config.ignore_https_errors,
            proxy_credentials: config
                .proxy
                .as_ref()
                .and_then(|p| p.credentials())
                .map(|(u, p)| (u.to_string(), p.to_string())),
        };

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            context_id,
            remote,
            closed,
            handler_task,
            page_setup,
        })
    }

    async fn prepare_page(&self, page: &Page) -> Result<()> {
        page.set_user_agent(ARCHIVAL_USER_AGENT)
            .await
            .context("Failed to set user agent")?;

        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(DEVICE_VIEWPORT_WIDTH),
            i64::from(DEVICE_VIEWPORT_HEIGHT),
            DEVICE_SCALE_FACTOR,
            false,
        ))
        .await
        .context("Failed to set device metrics")?;

        if self.page_setup.ignore_https_errors {
            page.execute(SetIgnoreCertificateErrorsParams::new(true))
                .await
                .context("Failed to ignore certificate errors")?;
        }

        if let Some((ref username, ref password)) = self.page_setup.proxy_credentials {
            spawn_proxy_auth(page, username.clone(), password.clone()).await?;
        }

        Ok(())
    }
}

/// Answer proxy auth challenges for a page and let every other request through.
async fn spawn_proxy_auth(page: &Page, username: String, password: String) -> Result<()> {
    let mut auth_events = page.event_listener::<EventAuthRequired>().await?;
    let mut paused_events = page.event_listener::<EventRequestPaused>().await?;

    page.execute(EnableParams {
        patterns: None,
        handle_auth_requests: Some(true),
    })
    .await
    .context("Failed to enable request interception for proxy auth")?;

    let page = page.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = auth_events.next() => {
                    let response = AuthChallengeResponse {
                        response: AuthChallengeResponseResponse::ProvideCredentials,
                        username: Some(username.clone()),
                        password: Some(password.clone()),
                    };
                    let params = ContinueWithAuthParams::new(event.request_id.clone(), response);
                    if let Err(e) = page.execute(params).await {
                        debug!("Failed to answer proxy auth challenge: {e}");
                    }
                }
                Some(event) = paused_events.next() => {
                    if let Err(e) = page.execute(ContinueRequestParams::new(event.request_id.clone())).await {
                        debug!("Failed to continue paused request: {e}");
                    }
                }
                else => break,
            }
        }
    });

    Ok(())
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn set_cookies(&self, cookies: &[SolvedCookie]) -> Result<()> {
        let params = cookie_params(cookies);
        if params.is_empty() {
            return Ok(());
        }

        let guard = self.browser.lock().await;
        let browser = guard.as_ref().context("Browser session already closed")?;
        browser
            .execute(SetCookiesParams {
                cookies: params,
                browser_context_id: self.context_id.clone(),
            })
            .await
            .context("Failed to set cookies")?;
        Ok(())
    }

    async fn new_page(&self) -> Result<Box<dyn LivePage>> {
        let mut builder = CreateTargetParams::builder().url("about:blank");
        if let Some(ref id) = self.context_id {
            builder = builder.browser_context_id(id.clone());
        }
        let params = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build target params: {e}"))?;

        let page = {
            let guard = self.browser.lock().await;
            let browser = guard.as_ref().context("Browser session already closed")?;
            browser
                .new_page(params)
                .await
                .context("Failed to create new page")?
        };

        self.prepare_page(&page).await?;
        Ok(Box::new(ChromiumPage { page }))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        self.closed.store(true, Ordering::SeqCst);

        if self.remote {
            // The remote browser outlives us; only our context goes away.
            if let Some(ref id) = self.context_id {
                if let Err(e) = browser.dispose_browser_context(id.clone()).await {
                    warn!("Failed to dispose browser context: {e}");
                }
            }
        } else {
            browser.close().await.context("Failed to close browser")?;
            if let Err(e) = browser.wait().await {
                debug!("Failed waiting for browser process: {e}");
            }
        }

        self.handler_task.abort();
        debug!(remote = self.remote, "Browser session closed");
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        // A launched browser process is killed when `Browser` drops.
        self.handler_task.abort();
    }
}

pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl LivePage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<()> {
        let mut loaded = self
            .page
            .event_listener::<EventDomContentEventFired>()
            .await
            .context("Failed to listen for DOMContentLoaded")?;

        let response = self
            .page
            .execute(NavigateParams::new(url))
            .await
            .with_context(|| format!("Failed to navigate to {url}"))?;

        if let Some(ref error) = response.result.error_text {
            anyhow::bail!("Navigation to {url} failed: {error}");
        }

        tokio::time::timeout(Duration::from_secs(NAVIGATION_TIMEOUT_SECS), loaded.next())
            .await
            .with_context(|| format!("Timed out waiting for {url} to load"))?;

        Ok(())
    }

    async fn title(&self) -> Result<Option<String>> {
        self.page.get_title().await.context("Failed to read page title")
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.context("Failed to read page content")
    }

    async fn meta_description(&self) -> Result<String> {
        let value = self
            .page
            .evaluate(META_DESCRIPTION_JS)
            .await
            .context("Failed to read meta description")?;
        Ok(value.into_value::<String>().unwrap_or_default())
    }

    async fn screenshot_png(&self, full_page: bool) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        self.page
            .screenshot(params)
            .await
            .context("Failed to capture screenshot")
    }

    async fn preview_jpeg(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(PREVIEW_JPEG_QUALITY)
            .build();
        self.page
            .screenshot(params)
            .await
            .context("Failed to capture preview")
    }

    async fn pdf(&self) -> Result<Vec<u8>> {
        self.page
            .pdf(PrintToPdfParams::default())
            .await
            .context("Failed to print page to PDF")
    }

    async fn close(&self) {
        if let Err(e) = self.page.clone().close().await {
            debug!("Failed to close page: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;

    #[test]
    fn test_launch_args_default() {
        let args = launch_args(&Config::for_testing());
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=1280,800".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--proxy-server")));
        assert!(!args.contains(&"--ignore-certificate-errors".to_string()));
    }

    #[test]
    fn test_launch_args_proxy_and_https() {
        let config = Config {
            proxy: Some(ProxyConfig {
                server: "http://proxy:3128".to_string(),
                bypass: Some("localhost,127.0.0.1".to_string()),
                username: None,
                password: None,
            }),
            ignore_https_errors: true,
            ..Config::for_testing()
        };
        let args = launch_args(&config);
        assert!(args.contains(&"--proxy-server=http://proxy:3128".to_string()));
        assert!(args.contains(&"--proxy-bypass-list=localhost,127.0.0.1".to_string()));
        assert!(args.contains(&"--ignore-certificate-errors".to_string()));
    }

    #[test]
    fn test_cookie_params_skip_domainless() {
        let cookies = vec![
            SolvedCookie {
                name: "cf_clearance".to_string(),
                value: "token".to_string(),
                domain: Some(".example.com".to_string()),
                path: None,
                http_only: true,
                secure: true,
                expires: Some(1_900_000_000.0),
            },
            SolvedCookie {
                name: "orphan".to_string(),
                value: "x".to_string(),
                domain: None,
                path: None,
                http_only: false,
                secure: false,
                expires: None,
            },
        ];

        let params = cookie_params(&cookies);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "cf_clearance");
        assert_eq!(params[0].path.as_deref(), Some("/"));
    }
}
