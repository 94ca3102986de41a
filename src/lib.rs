//! Link preserver library.
//!
//! Archives bookmarked links as screenshots, PDFs, readable text and
//! self-contained HTML snapshots, bounded by a per-link browser timeout.

pub mod archiver;
pub mod browser;
pub mod captcha;
pub mod config;
pub mod constants;
pub mod db;
pub mod storage;
pub mod tagging;
pub mod wayback;
