use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::TimeZone;
use contafetch::archive::FileArchiver;
use contafetch::clock::FixedClock;
use contafetch::download::DownloadWatcher;
use contafetch::harvest::{AccountOutcome, Harvester};
use contafetch::retry::RetryPolicy;
use tempfile::TempDir;

mod support;
use support::{FakeAccount, FakeDownload, FakeInvoice, FakePortal};

fn accounts() -> Vec<FakeAccount> {
    vec![FakeAccount::new(
        "111",
        vec![FakeInvoice::new(
            "5/3/2024|3|2024",
            "05/03/2024",
            FakeDownload::File {
                name: "fatura.pdf".to_string(),
                delay: Duration::from_millis(20),
            },
        )],
    )]
}

fn harvester(staging: &std::path::Path, archive: &std::path::Path) -> Result<Harvester> {
    let watcher = DownloadWatcher::new(staging).with_poll_interval(Duration::from_millis(10));
    watcher.prepare()?;
    let fixed = chrono::Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
    let archiver = FileArchiver::new(archive).with_clock(Arc::new(FixedClock::new(fixed)));
    archiver.prepare()?;

    Ok(Harvester::new(watcher, archiver)
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        })
        .with_settle(Duration::ZERO)
        .with_download_start(Duration::ZERO)
        .with_download_timeout(Duration::from_secs(2)))
}

#[tokio::test]
async fn stale_enumeration_is_retried_transparently() -> Result<()> {
    let dir = TempDir::new()?;
    let staging = dir.path().join("staging");
    let archive = dir.path().join("archive");
    std::fs::create_dir_all(&staging)?;

    let portal = FakePortal::new(&staging, accounts()).with_stale_invoice_options(2);

    let summary = harvester(&staging, &archive)?.run(&portal).await;

    assert!(summary.is_success());
    assert_eq!(summary.archived_count(), 1);
    // Two stale failures plus the final success.
    assert_eq!(portal.invoice_options_calls(), 3);

    Ok(())
}

#[tokio::test]
async fn persistent_staleness_fails_the_account() -> Result<()> {
    let dir = TempDir::new()?;
    let staging = dir.path().join("staging");
    let archive = dir.path().join("archive");
    std::fs::create_dir_all(&staging)?;

    let portal = FakePortal::new(&staging, accounts()).with_stale_invoice_options(10);

    let summary = harvester(&staging, &archive)?.run(&portal).await;

    assert!(!summary.is_success());
    assert_eq!(summary.archived_count(), 0);
    // Retries stop at the attempt bound.
    assert_eq!(portal.invoice_options_calls(), 3);

    match &summary.accounts[0].outcome {
        AccountOutcome::Failed { error, .. } => {
            assert!(error.contains("stale"), "unexpected error: {error}");
        }
        other => panic!("expected failed account, got {other:?}"),
    }

    Ok(())
}
