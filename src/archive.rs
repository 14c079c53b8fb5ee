//! Moves completed downloads out of staging into the permanent archive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Names and moves completed downloads into the archive directory.
///
/// Archive names are never overwritten: the same prefix on the same day
/// gets `_1`, `_2`, ... suffixes, since the portal may legitimately be
/// revisited by several runs on one calendar day.
pub struct FileArchiver {
    archive_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileArchiver {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.archive_dir).with_context(|| {
            format!(
                "Failed to create archive directory: {}",
                self.archive_dir.display()
            )
        })
    }

    /// Move `source` into the archive as `{prefix}_{today}_{stem}{ext}`
    /// (no leading prefix segment when `prefix` is empty), suffixing a
    /// counter until the name is free. Returns `None`, with no side
    /// effects, when the source no longer exists.
    pub fn archive(&self, source: &Path, prefix: &str) -> Result<Option<PathBuf>> {
        if !source.exists() {
            return Ok(None);
        }

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let today = self.clock.today().format("%Y-%m-%d");

        let base = if prefix.is_empty() {
            format!("{today}_{stem}")
        } else {
            format!("{prefix}_{today}_{stem}")
        };

        let mut destination = self.archive_dir.join(format!("{base}{extension}"));
        let mut counter = 1u32;
        while destination.exists() {
            destination = self
                .archive_dir
                .join(format!("{base}_{counter}{extension}"));
            counter += 1;
        }

        move_file(source, &destination).with_context(|| {
            format!(
                "Failed to move {} to {}",
                source.display(),
                destination.display()
            )
        })?;
        debug!(from = %source.display(), to = %destination.display(), "archived download");

        Ok(Some(destination))
    }
}

/// Rename, falling back to copy + delete when the archive lives on a
/// different file system than staging.
fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    match std::fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(source, destination)?;
            std::fs::remove_file(source)
        }
    }
}
