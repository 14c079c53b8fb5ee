use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::TimeZone;
use contafetch::archive::FileArchiver;
use contafetch::clock::FixedClock;
use contafetch::download::DownloadWatcher;
use contafetch::harvest::{AccountOutcome, Harvester, InvoiceOutcome};
use tempfile::TempDir;

mod support;
use support::{FakeAccount, FakeDownload, FakeInvoice, FakePortal};

fn harvester(staging: &std::path::Path, archive: &std::path::Path) -> Result<Harvester> {
    let watcher = DownloadWatcher::new(staging).with_poll_interval(Duration::from_millis(10));
    watcher.prepare()?;

    let fixed = chrono::Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
    let archiver = FileArchiver::new(archive).with_clock(Arc::new(FixedClock::new(fixed)));
    archiver.prepare()?;

    Ok(Harvester::new(watcher, archiver)
        .with_settle(Duration::ZERO)
        .with_download_start(Duration::ZERO)
        .with_download_timeout(Duration::from_secs(2)))
}

#[tokio::test]
async fn archives_valid_invoice_and_skips_unparseable() -> Result<()> {
    let dir = TempDir::new()?;
    let staging = dir.path().join("staging");
    let archive = dir.path().join("archive");
    std::fs::create_dir_all(&staging)?;

    let portal = FakePortal::new(
        &staging,
        vec![
            FakeAccount::new(
                "111",
                vec![FakeInvoice::new(
                    "5/3/2024|3|2024",
                    "05/03/2024",
                    FakeDownload::File {
                        name: "fatura.pdf".to_string(),
                        delay: Duration::from_millis(30),
                    },
                )],
            ),
            FakeAccount::new(
                "222",
                vec![FakeInvoice::new(
                    "not-a-token",
                    "??",
                    FakeDownload::File {
                        name: "phantom.pdf".to_string(),
                        delay: Duration::ZERO,
                    },
                )],
            ),
        ],
    );

    let summary = harvester(&staging, &archive)?.run(&portal).await;

    assert!(summary.failure.is_none());
    assert!(summary.is_success());
    assert_eq!(summary.archived_count(), 1);
    assert_eq!(summary.skipped_count(), 1);
    assert_eq!(summary.accounts.len(), 2);

    // Only the decodable invoice ever triggered a download.
    assert_eq!(portal.download_requests(), 1);

    let archived: Vec<_> = std::fs::read_dir(&archive)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        archived,
        vec!["conta_111_ref_2024-03_venc_2024-03-05_2024-03-10_fatura.pdf".to_string()]
    );

    // The skip is recorded against account 222, not swallowed.
    let second = &summary.accounts[1];
    assert_eq!(second.account, "222");
    match &second.outcome {
        AccountOutcome::Completed { invoices } => {
            assert_eq!(invoices.len(), 1);
            assert!(matches!(
                invoices[0].outcome,
                InvoiceOutcome::SkippedUnparseable(_)
            ));
        }
        other => panic!("expected completed account, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn archives_every_invoice_of_every_account() -> Result<()> {
    let dir = TempDir::new()?;
    let staging = dir.path().join("staging");
    let archive = dir.path().join("archive");
    std::fs::create_dir_all(&staging)?;

    let portal = FakePortal::new(
        &staging,
        vec![
            FakeAccount::new(
                "111",
                vec![
                    FakeInvoice::new(
                        "5/3/2024|3|2024",
                        "05/03/2024",
                        FakeDownload::File {
                            name: "fatura.pdf".to_string(),
                            delay: Duration::from_millis(20),
                        },
                    ),
                    FakeInvoice::new(
                        "5/4/2024|4|2024",
                        "05/04/2024",
                        FakeDownload::File {
                            name: "fatura.pdf".to_string(),
                            delay: Duration::from_millis(20),
                        },
                    ),
                ],
            ),
            FakeAccount::new(
                "222",
                vec![FakeInvoice::new(
                    "10/3/2024|2|2024",
                    "10/03/2024",
                    FakeDownload::File {
                        name: "fatura.pdf".to_string(),
                        delay: Duration::from_millis(20),
                    },
                )],
            ),
        ],
    );

    let summary = harvester(&staging, &archive)?.run(&portal).await;

    assert!(summary.is_success());
    assert_eq!(summary.archived_count(), 3);
    assert_eq!(portal.download_requests(), 3);

    let mut archived: Vec<_> = std::fs::read_dir(&archive)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    archived.sort();
    assert_eq!(
        archived,
        vec![
            "conta_111_ref_2024-03_venc_2024-03-05_2024-03-10_fatura.pdf".to_string(),
            "conta_111_ref_2024-04_venc_2024-04-05_2024-03-10_fatura.pdf".to_string(),
            "conta_222_ref_2024-02_venc_2024-03-10_2024-03-10_fatura.pdf".to_string(),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn empty_account_list_completes_without_failure() -> Result<()> {
    let dir = TempDir::new()?;
    let staging = dir.path().join("staging");
    let archive = dir.path().join("archive");
    std::fs::create_dir_all(&staging)?;

    let portal = FakePortal::new(&staging, Vec::new());
    let summary = harvester(&staging, &archive)?.run(&portal).await;

    assert!(summary.is_success());
    assert!(summary.accounts.is_empty());
    assert_eq!(summary.archived_count(), 0);

    Ok(())
}
