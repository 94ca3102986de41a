//! Shared constants used across the application.

/// User agent string used for archival HTTP requests and browser pages.
///
/// A realistic desktop browser user agent so that archival requests look like
/// normal browser traffic.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Stored value for an artifact that could not (or should not) be produced.
pub const UNAVAILABLE: &str = "unavailable";

/// Title served by the Cloudflare interstitial while a challenge is pending.
///
/// Links first saved while a challenge was shown carry this as their name.
pub const CAPTCHA_PLACEHOLDER_TITLE: &str = "Just a moment...";

/// Desktop device profile used for every browser page.
pub const DEVICE_VIEWPORT_WIDTH: u32 = 1280;
pub const DEVICE_VIEWPORT_HEIGHT: u32 = 800;
pub const DEVICE_SCALE_FACTOR: f64 = 1.0;

/// How long to wait for `DOMContentLoaded` after navigating.
pub const NAVIGATION_TIMEOUT_SECS: u64 = 60;

/// Default captcha solve budget in milliseconds.
pub const DEFAULT_CAPTCHA_TIMEOUT_MS: u64 = 60_000;
