//! Observes the staging directory for completed browser downloads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// File name suffixes the browser uses while a download is in flight.
const INCOMPLETE_MARKERS: &[&str] = &[".crdownload", ".tmp"];

/// Polls the staging directory until a completed file of the expected
/// type appears or the bound elapses.
///
/// The portal exposes no completion signal, so this is an explicit
/// polling contract: one directory scan per interval, any marker file
/// means "still downloading", and the bound caps the whole wait.
pub struct DownloadWatcher {
    staging_dir: PathBuf,
    poll_interval: Duration,
}

impl DownloadWatcher {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Override the scan interval. Tests run at a few milliseconds.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Create the staging directory and delete any regular file left in
    /// it. Runs once at startup: a leftover artifact from a previous
    /// run must never be archived as if it belonged to this one.
    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.staging_dir).with_context(|| {
            format!(
                "Failed to create staging directory: {}",
                self.staging_dir.display()
            )
        })?;

        for entry in std::fs::read_dir(&self.staging_dir).with_context(|| {
            format!(
                "Failed to list staging directory: {}",
                self.staging_dir.display()
            )
        })? {
            let path = entry?.path();
            if path.is_file() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to delete staging file: {}", path.display()))?;
                debug!(file = %path.display(), "purged leftover staging file");
            }
        }

        Ok(())
    }

    /// Wait until a completed file whose name ends with `extension`
    /// (case-insensitive) exists in staging. Returns `None` when the
    /// bound elapses first.
    pub async fn wait_for_completion(
        &self,
        timeout: Duration,
        extension: &str,
    ) -> Result<Option<PathBuf>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let wanted = extension.to_lowercase();

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let names = self.scan()?;
            let in_flight = names.iter().any(|name| {
                let lower = name.to_lowercase();
                INCOMPLETE_MARKERS
                    .iter()
                    .any(|marker| lower.ends_with(marker))
            });

            if !in_flight {
                if let Some(name) = names.iter().find(|n| n.to_lowercase().ends_with(&wanted)) {
                    return Ok(Some(self.staging_dir.join(name)));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    extension = %extension,
                    "download did not complete within bound"
                );
                return Ok(None);
            }
        }
    }

    fn scan(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.staging_dir).with_context(|| {
            format!(
                "Failed to list staging directory: {}",
                self.staging_dir.display()
            )
        })? {
            let entry = entry?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }
}
