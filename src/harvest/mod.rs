//! The run state machine: accounts, invoices, download, archive.

mod portal;

pub use portal::{InvoiceOption, InvoicePortal, LivePortal};

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::archive::FileArchiver;
use crate::browser::UiError;
use crate::dates::{parse_invoice_token, DateTokenError};
use crate::download::DownloadWatcher;
use crate::retry::{with_retry, RetryPolicy};

/// Extension the portal serves invoices as.
pub const DOWNLOAD_EXTENSION: &str = ".pdf";

/// What happened to a single invoice option.
#[derive(Debug)]
pub enum InvoiceOutcome {
    /// Downloaded and moved into the archive.
    Archived(PathBuf),
    /// Token did not decode; the file cannot be named deterministically.
    SkippedUnparseable(DateTokenError),
    /// Downloaded, but the move into the archive failed.
    ArchiveFailed(String),
    /// The staging directory never produced a completed file.
    DownloadTimedOut,
}

/// Per-invoice record kept in the run summary.
#[derive(Debug)]
pub struct InvoiceReport {
    pub option: InvoiceOption,
    pub outcome: InvoiceOutcome,
}

/// What happened to a whole account.
#[derive(Debug)]
pub enum AccountOutcome {
    /// Every offered invoice was attempted.
    Completed { invoices: Vec<InvoiceReport> },
    /// Processing stopped partway; the reports cover what ran.
    Failed {
        invoices: Vec<InvoiceReport>,
        error: String,
    },
    /// The run ended before this account was reached.
    NotReached { reason: String },
}

#[derive(Debug)]
pub struct AccountReport {
    pub account: String,
    pub outcome: AccountOutcome,
}

/// Aggregated result of one harvesting run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub accounts: Vec<AccountReport>,
    /// Set when the run ended before the account loop could start.
    pub failure: Option<String>,
}

impl RunSummary {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            accounts: Vec::new(),
            failure: Some(reason.into()),
        }
    }

    fn invoice_outcomes(&self) -> impl Iterator<Item = &InvoiceOutcome> {
        self.accounts
            .iter()
            .flat_map(|report| match &report.outcome {
                AccountOutcome::Completed { invoices } => invoices.as_slice(),
                AccountOutcome::Failed { invoices, .. } => invoices.as_slice(),
                AccountOutcome::NotReached { .. } => &[],
            })
            .map(|report| &report.outcome)
    }

    pub fn archived_count(&self) -> usize {
        self.invoice_outcomes()
            .filter(|outcome| matches!(outcome, InvoiceOutcome::Archived(_)))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.invoice_outcomes()
            .filter(|outcome| matches!(outcome, InvoiceOutcome::SkippedUnparseable(_)))
            .count()
    }

    /// True when the run reached every account and every reached
    /// invoice either archived or was a recorded skip.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
            && self
                .accounts
                .iter()
                .all(|report| matches!(report.outcome, AccountOutcome::Completed { .. }))
            && self.invoice_outcomes().all(|outcome| {
                matches!(
                    outcome,
                    InvoiceOutcome::Archived(_) | InvoiceOutcome::SkippedUnparseable(_)
                )
            })
    }
}

/// Outcome of processing one account, before it is folded into the
/// summary.
struct AccountProcessing {
    invoices: Vec<InvoiceReport>,
    /// Unexpected failure that ends the account loop.
    error: Option<String>,
    /// Download timeout that aborts the whole run.
    abort: Option<String>,
}

/// Drives one full run against an [`InvoicePortal`].
///
/// The session must already be authenticated; teardown stays with the
/// caller so it happens on every exit path.
pub struct Harvester {
    watcher: DownloadWatcher,
    archiver: FileArchiver,
    retry: RetryPolicy,
    /// Grace period for the portal's own re-render after a selection.
    settle: Duration,
    /// Grace period between the download click and the first staging
    /// scan.
    download_start: Duration,
    download_timeout: Duration,
}

impl Harvester {
    pub fn new(watcher: DownloadWatcher, archiver: FileArchiver) -> Self {
        Self {
            watcher,
            archiver,
            retry: RetryPolicy::default(),
            settle: Duration::from_secs(1),
            download_start: Duration::from_secs(2),
            download_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_download_start(mut self, download_start: Duration) -> Self {
        self.download_start = download_start;
        self
    }

    pub fn with_download_timeout(mut self, download_timeout: Duration) -> Self {
        self.download_timeout = download_timeout;
        self
    }

    /// Run the account and invoice loops to completion.
    pub async fn run<P: InvoicePortal>(&self, portal: &P) -> RunSummary {
        if let Err(err) = portal.open_invoice_page().await {
            error!(error = %err, "invoice page did not load");
            return RunSummary::failed(format!("invoice page did not load: {err}"));
        }

        // One snapshot drives the whole run; the selector itself is
        // re-located fresh for every selection.
        let accounts = match portal.account_ids().await {
            Ok(accounts) => accounts,
            Err(err) => {
                error!(error = %err, "account selector missing");
                return RunSummary::failed(format!("account selector missing: {err}"));
            }
        };
        info!(accounts = accounts.len(), "starting harvest");

        let mut summary = RunSummary::default();
        let mut halted: Option<String> = None;

        for account in accounts {
            if let Some(reason) = &halted {
                summary.accounts.push(AccountReport {
                    account,
                    outcome: AccountOutcome::NotReached {
                        reason: reason.clone(),
                    },
                });
                continue;
            }

            info!(account = %account, "processing account");
            let processed = self.process_account(portal, &account).await;

            let outcome = if let Some(error) = processed.error {
                error!(account = %account, error = %error, "account processing failed");
                halted = Some(format!("account {account} failed: {error}"));
                AccountOutcome::Failed {
                    invoices: processed.invoices,
                    error,
                }
            } else if let Some(reason) = processed.abort {
                error!(account = %account, reason = %reason, "aborting run");
                halted = Some(reason.clone());
                AccountOutcome::Failed {
                    invoices: processed.invoices,
                    error: reason,
                }
            } else {
                AccountOutcome::Completed {
                    invoices: processed.invoices,
                }
            };

            summary.accounts.push(AccountReport { account, outcome });
        }

        summary
    }

    async fn process_account<P: InvoicePortal>(
        &self,
        portal: &P,
        account: &str,
    ) -> AccountProcessing {
        let mut invoices = Vec::new();

        if let Err(err) = portal.select_account(account).await {
            return AccountProcessing {
                invoices,
                error: Some(format!("account selection failed: {err}")),
                abort: None,
            };
        }
        // Let the dependent invoice selector repopulate.
        tokio::time::sleep(self.settle).await;

        // Snapshot (value, label) pairs and reselect by value below:
        // selecting an option can re-render the whole list, so holding
        // on to live option elements cannot guarantee order or
        // completeness.
        let options =
            match with_retry(self.retry, UiError::is_stale, || portal.invoice_options()).await {
                Ok(options) => options,
                Err(err) => {
                    return AccountProcessing {
                        invoices,
                        error: Some(format!("invoice enumeration failed: {err}")),
                        abort: None,
                    }
                }
            };
        info!(account = %account, invoices = options.len(), "invoice options snapshotted");

        for option in options {
            info!(account = %account, invoice = %option.label, "processing invoice");

            if let Err(err) =
                with_retry(self.retry, UiError::is_stale, || {
                    portal.select_invoice(&option.value)
                })
                .await
            {
                return AccountProcessing {
                    invoices,
                    error: Some(format!("invoice selection failed: {err}")),
                    abort: None,
                };
            }

            let dates = match parse_invoice_token(&option.value) {
                Ok(dates) => dates,
                Err(err) => {
                    warn!(
                        account = %account,
                        token = %option.value,
                        error = %err,
                        "undecodable invoice token, skipping"
                    );
                    invoices.push(InvoiceReport {
                        option,
                        outcome: InvoiceOutcome::SkippedUnparseable(err),
                    });
                    continue;
                }
            };

            let prefix = format!(
                "conta_{account}_ref_{}_venc_{}",
                dates.reference,
                dates.due_date.format("%Y-%m-%d")
            );
            info!(account = %account, prefix = %prefix, "requesting download");

            tokio::time::sleep(self.settle).await;
            if let Err(err) =
                with_retry(self.retry, UiError::is_stale, || portal.request_download()).await
            {
                return AccountProcessing {
                    invoices,
                    error: Some(format!("download trigger failed: {err}")),
                    abort: None,
                };
            }

            // Give the browser a moment to begin writing into staging.
            tokio::time::sleep(self.download_start).await;

            match self
                .watcher
                .wait_for_completion(self.download_timeout, DOWNLOAD_EXTENSION)
                .await
            {
                Ok(Some(path)) => {
                    let outcome = match self.archiver.archive(&path, &prefix) {
                        Ok(Some(final_path)) => {
                            info!(file = %final_path.display(), "invoice archived");
                            InvoiceOutcome::Archived(final_path)
                        }
                        Ok(None) => {
                            warn!(file = %path.display(), "download vanished before archiving");
                            InvoiceOutcome::ArchiveFailed(
                                "source disappeared before the move".to_string(),
                            )
                        }
                        Err(err) => {
                            warn!(error = %err, "failed to archive download");
                            InvoiceOutcome::ArchiveFailed(err.to_string())
                        }
                    };
                    invoices.push(InvoiceReport { option, outcome });
                }
                Ok(None) => {
                    error!(
                        account = %account,
                        invoice = %option.label,
                        "download never completed"
                    );
                    invoices.push(InvoiceReport {
                        option,
                        outcome: InvoiceOutcome::DownloadTimedOut,
                    });
                    return AccountProcessing {
                        invoices,
                        error: None,
                        abort: Some("download timed out".to_string()),
                    };
                }
                Err(err) => {
                    return AccountProcessing {
                        invoices,
                        error: Some(format!("staging scan failed: {err}")),
                        abort: None,
                    };
                }
            }
        }

        AccountProcessing {
            invoices,
            error: None,
            abort: None,
        }
    }
}
