//! On-disk layout for preserved artifacts.
//!
//! ```text
//! archives/{collection}/{link}.png | .jpeg | .pdf | .html | _readability.json
//! archives/preview/{collection}/{link}.jpeg
//! ```
//!
//! Paths stored on links are relative to the storage root.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Every file suffix a link may own inside its collection folder.
const LINK_FILE_SUFFIXES: [&str; 5] = [".png", ".jpeg", ".pdf", ".html", "_readability.json"];

/// Create a directory (and its parents) if it does not exist yet.
pub async fn ensure_folder_exists(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Relative path of the artifact folder for a collection.
    #[must_use]
    pub fn archive_dir(collection_id: i64) -> String {
        format!("archives/{collection_id}")
    }

    /// Relative path of the preview folder for a collection.
    #[must_use]
    pub fn preview_dir(collection_id: i64) -> String {
        format!("archives/preview/{collection_id}")
    }

    /// Relative path of a link artifact, e.g. `archives/3/17.pdf`.
    #[must_use]
    pub fn artifact_path(collection_id: i64, link_id: i64, suffix: &str) -> String {
        format!("{}/{link_id}{suffix}", Self::archive_dir(collection_id))
    }

    #[must_use]
    pub fn preview_path(collection_id: i64, link_id: i64) -> String {
        format!("{}/{link_id}.jpeg", Self::preview_dir(collection_id))
    }

    #[must_use]
    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Make sure both folders a link's artifacts land in exist.
    pub async fn ensure_link_folders(&self, collection_id: i64) -> Result<()> {
        ensure_folder_exists(&self.absolute(&Self::archive_dir(collection_id))).await?;
        ensure_folder_exists(&self.absolute(&Self::preview_dir(collection_id))).await
    }

    /// Write bytes to a relative path, creating parent folders as needed.
    pub async fn write(&self, relative: &str, bytes: &[u8]) -> Result<()> {
        let path = self.absolute(relative);
        if let Some(parent) = path.parent() {
            ensure_folder_exists(parent).await?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Stored artifact");
        Ok(())
    }

    /// Remove every file a link may own. Missing files are ignored.
    pub async fn remove_files(&self, link_id: i64, collection_id: i64) -> Result<()> {
        let mut targets: Vec<String> = LINK_FILE_SUFFIXES
            .iter()
            .map(|suffix| Self::artifact_path(collection_id, link_id, suffix))
            .collect();
        targets.push(Self::preview_path(collection_id, link_id));

        for relative in targets {
            let path = self.absolute(&relative);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(anyhow::Error::new(e))
                        .context(format!("Failed to remove {}", path.display()));
                }
            }
        }
        Ok(())
    }
}
