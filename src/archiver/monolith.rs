//! Monolith wrapper for self-contained HTML snapshots.
//!
//! The rendered DOM captured from the browser is handed to monolith as a local
//! file, with the link URL as base so relative assets still resolve. Monolith
//! then inlines CSS, images and fonts as data URIs.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::ARCHIVAL_USER_AGENT;

/// Archive hosts never fetched as assets.
const EXCLUDED_ASSET_DOMAINS: [&str; 9] = [
    "web.archive.org",
    "archive.org",
    "archive.today",
    "archive.is",
    "archive.ph",
    "archive.fo",
    "archive.li",
    "archive.md",
    "archive.vn",
];

/// Per-asset network timeout passed to monolith, in seconds.
const ASSET_TIMEOUT_SECS: &str = "30";

const MAX_OUTPUT_LEN: usize = 2000;

#[derive(Debug, Clone)]
pub struct MonolithConfig {
    /// Path to the monolith executable.
    pub path: String,
    /// Wall clock limit for one run.
    pub timeout: Duration,
    /// Keep `<script>` content in the snapshot.
    pub include_js: bool,
}

/// Arguments for one monolith run.
#[must_use]
pub fn build_args(input: &Path, base_url: &str, output: &Path, config: &MonolithConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        input.as_os_str().to_owned(),
        "-o".into(),
        output.as_os_str().to_owned(),
        "-b".into(),
        base_url.into(),
        // Isolate: the saved file never reaches out to the network.
        "-I".into(),
    ];

    // monolith 3.x flags exclude; JS is kept unless `-j` is given.
    if !config.include_js {
        args.push("-j".into());
    }

    for domain in EXCLUDED_ASSET_DOMAINS {
        args.push("-B".into());
        args.push(domain.into());
    }

    args.push("-t".into());
    args.push(ASSET_TIMEOUT_SECS.into());
    args.push("-u".into());
    args.push(ARCHIVAL_USER_AGENT.into());
    args
}

fn truncate_output(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.len() > MAX_OUTPUT_LEN {
        let cut = text
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|i| *i <= MAX_OUTPUT_LEN)
            .last()
            .unwrap_or(0);
        format!(
            "{}...[truncated {} more chars]",
            &text[..cut],
            text.len() - cut
        )
    } else {
        text.to_string()
    }
}

/// Bundle already-rendered HTML into a self-contained file at `output_path`.
///
/// The child process is killed if `cancel` fires or the configured timeout
/// elapses. Returns the size of the written file.
///
/// # Errors
///
/// Returns an error if monolith cannot run, is cancelled, times out, or
/// produces no output file.
pub async fn create_complete_html(
    content: &str,
    base_url: &str,
    output_path: &Path,
    config: &MonolithConfig,
    cancel: &CancellationToken,
) -> Result<u64> {
    let input = tempfile::Builder::new()
        .prefix("link-preserver-")
        .suffix(".html")
        .tempfile()
        .context("Failed to create monolith input file")?;

    let mut file = tokio::fs::File::create(input.path())
        .await
        .context("Failed to open monolith input file")?;
    file.write_all(content.as_bytes())
        .await
        .context("Failed to write monolith input file")?;
    file.flush().await?;
    drop(file);

    debug!(base_url = %base_url, output = %output_path.display(), "Running monolith");

    let mut cmd = Command::new(&config.path);
    cmd.args(build_args(input.path(), base_url, output_path, config))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().context("Failed to execute monolith")?;

    let output = tokio::select! {
        () = cancel.cancelled() => {
            anyhow::bail!("Monolith cancelled");
        }
        result = tokio::time::timeout(config.timeout, child.wait_with_output()) => {
            result
                .context("Monolith execution timed out")?
                .context("Failed to wait for monolith")?
        }
    };

    if !output.status.success() {
        let stdout = truncate_output(&output.stdout);
        let stderr = truncate_output(&output.stderr);

        // Some pages make monolith exit non-zero but still yield a usable file.
        if !output_path.exists() {
            anyhow::bail!(
                "Monolith failed with exit code {:?}.\nBase URL: {}\nStderr:\n{}\nStdout:\n{}",
                output.status.code(),
                base_url,
                stderr,
                stdout
            );
        }
        warn!(
            base_url = %base_url,
            exit_code = ?output.status.code(),
            stderr = %stderr,
            stdout = %stdout,
            "Monolith completed with warnings but produced output file"
        );
    }

    let size = tokio::fs::metadata(output_path)
        .await
        .map(|m| m.len())
        .context("Monolith did not create output file")?;

    debug!(base_url = %base_url, size, "Self-contained HTML created");
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MonolithConfig {
        MonolithConfig {
            path: "monolith".to_string(),
            timeout: Duration::from_secs(120),
            include_js: false,
        }
    }

    #[test]
    fn test_build_args_sets_base_and_excludes_js() {
        let args = build_args(
            Path::new("/tmp/in.html"),
            "https://example.com/a",
            Path::new("/data/archives/1/2.html"),
            &config(),
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(args[0], "/tmp/in.html");
        let base = args.iter().position(|a| a == "-b").unwrap();
        assert_eq!(args[base + 1], "https://example.com/a");
        assert!(args.contains(&"-I".to_string()));
        assert!(args.contains(&"-j".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "-B").count(), EXCLUDED_ASSET_DOMAINS.len());
    }

    #[test]
    fn test_build_args_keeps_js_when_configured() {
        let config = MonolithConfig {
            include_js: true,
            ..config()
        };
        let args = build_args(Path::new("in.html"), "https://x.org", Path::new("out.html"), &config);
        assert!(!args.iter().any(|a| a == "-j"));
    }

    #[test]
    fn test_truncate_output() {
        let long = "x".repeat(MAX_OUTPUT_LEN + 10);
        let out = truncate_output(long.as_bytes());
        assert!(out.ends_with("[truncated 10 more chars]"));
        assert_eq!(truncate_output(b"  short \n"), "short");
    }

    #[tokio::test]
    async fn test_cancelled_run_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // `sleep` ignores monolith's flags; it only has to outlive the cancel.
        let config = MonolithConfig {
            path: "sleep".to_string(),
            ..config()
        };
        let result = create_complete_html(
            "<html></html>",
            "https://example.com",
            &dir.path().join("out.html"),
            &config,
            &cancel,
        )
        .await;
        assert!(result.is_err());
    }
}
