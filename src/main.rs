use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use contafetch::archive::FileArchiver;
use contafetch::browser::Session;
use contafetch::config::{default_config_path, Credentials, ResolvedConfig};
use contafetch::download::DownloadWatcher;
use contafetch::harvest::{AccountOutcome, Harvester, LivePortal, RunSummary};
use contafetch::retry::RetryPolicy;

#[derive(Parser)]
#[command(name = "contafetch")]
#[command(about = "Invoice harvester for the Conta Online billing portal")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and download every available invoice
    Run {
        /// Show the browser window while harvesting
        #[arg(long)]
        headed: bool,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = ResolvedConfig::load_or_default(&config_path)?;

    match cli.command.unwrap_or(Command::Run { headed: false }) {
        Command::Config => {
            println!("Config file: {}", config_path.display());
            println!("Data directory: {}", config.data_dir.display());
            println!("Staging directory: {}", config.staging_dir.display());
            println!("Archive directory: {}", config.archive_dir.display());
            println!("Portal login: {}", config.portal.login_url);
            Ok(())
        }
        Command::Run { headed } => {
            if headed {
                config.browser.headless = false;
            }
            let _log_guard = init_tracing(&config.logs_dir)?;
            run(config).await
        }
    }
}

fn init_tracing(logs_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "contafetch.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off",
            )
        }))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    Ok(guard)
}

async fn run(config: ResolvedConfig) -> Result<()> {
    let credentials = Credentials::from_env()?;

    let watcher = DownloadWatcher::new(&config.staging_dir);
    watcher.prepare()?;
    let archiver = FileArchiver::new(&config.archive_dir);
    archiver.prepare()?;

    let mut session = Session::launch(&config.browser, &config.staging_dir).await?;

    // Teardown must run on every path, so the harvest result is held
    // rather than propagated past the close.
    let outcome = harvest(&mut session, &config, &credentials, watcher, archiver).await;
    session.close().await;

    let summary = outcome?;
    report(&summary);

    if summary.is_success() {
        Ok(())
    } else {
        anyhow::bail!("harvest finished with failures");
    }
}

async fn harvest(
    session: &mut Session,
    config: &ResolvedConfig,
    credentials: &Credentials,
    watcher: DownloadWatcher,
    archiver: FileArchiver,
) -> Result<RunSummary> {
    if !session
        .login(&config.portal, &config.timeouts, credentials)
        .await?
    {
        return Ok(RunSummary::failed("login did not reach the landing page"));
    }

    let portal = LivePortal::new(session, config.portal.clone(), config.timeouts.clone());
    let harvester = Harvester::new(watcher, archiver)
        .with_retry_policy(RetryPolicy {
            max_attempts: config.timeouts.retry_attempts,
            delay: config.timeouts.retry_delay,
        })
        .with_settle(config.timeouts.settle)
        .with_download_start(config.timeouts.download_start)
        .with_download_timeout(config.timeouts.download);

    Ok(harvester.run(&portal).await)
}

fn report(summary: &RunSummary) {
    info!(
        archived = summary.archived_count(),
        skipped = summary.skipped_count(),
        accounts = summary.accounts.len(),
        "harvest finished"
    );

    if let Some(reason) = &summary.failure {
        error!(reason = %reason, "run never reached the account loop");
    }

    for report in &summary.accounts {
        match &report.outcome {
            AccountOutcome::Completed { invoices } => {
                info!(
                    account = %report.account,
                    invoices = invoices.len(),
                    "account completed"
                );
            }
            AccountOutcome::Failed { error, .. } => {
                error!(account = %report.account, error = %error, "account failed");
            }
            AccountOutcome::NotReached { reason } => {
                warn!(account = %report.account, reason = %reason, "account not reached");
            }
        }
    }
}
