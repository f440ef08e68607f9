//! Command-line entry point.
//!
//! Exit codes: 0 when the queue drained (even with terminally-failed
//! records), 2 when portal login was rejected, 1 for any other startup
//! failure (missing input, no browser, unwritable output).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, warn};

use portal_runner::artifacts::{export_failed_rows, merge_pdfs, ArtifactError, ArtifactStore};
use portal_runner::browser::{BrowserSession, ChromeSessionManager};
use portal_runner::captcha::{HttpTranscriber, RecaptchaSolver};
use portal_runner::config::RunConfig;
use portal_runner::controller::{Controller, RunSummary};
use portal_runner::error::PortalError;
use portal_runner::input::read_records;
use portal_runner::ledger::ResultLedger;
use portal_runner::portal::{
    BillTrackingPortal, ExportRegistryPortal, PortTrackingPortal, PortalDriver, PortalKind,
};
use portal_runner::record::Record;
use portal_runner::snapshot::SnapshotSink;
use portal_runner::{init_logging, RunContext};

/// Batch document retrieval/submission against government and shipping
/// portals.
#[derive(Debug, Parser)]
#[command(name = "portal-runner", version, about)]
struct Cli {
    /// Portal variant to drive.
    #[arg(value_enum)]
    portal: PortalKind,

    /// Input CSV with a header row.
    input_file: PathBuf,

    /// Directory receiving PDFs, reports, ledgers, and logs.
    output_dir: PathBuf,

    /// Job identifier namespacing this run's outputs.
    job_id: String,

    /// Directory holding attachment PDFs (export registry only).
    #[arg(long)]
    pdf_dir: Option<PathBuf>,

    /// Portal username (export registry only).
    #[arg(long)]
    username: Option<String>,

    /// Portal password (export registry only).
    #[arg(long)]
    password: Option<String>,

    /// Shrink inter-record delays for trusted portals.
    #[arg(long)]
    fast_mode: bool,

    /// Run with a visible browser window.
    #[arg(long)]
    headed: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let ctx = RunContext::new(&cli.job_id, &cli.output_dir);
    if let Err(e) = ctx.ensure_layout() {
        eprintln!("Cannot create output layout under {}: {e}", ctx.output_dir.display());
        return ExitCode::from(1);
    }
    let _log_guard = init_logging(&ctx);

    info!("Input: {}", cli.input_file.display());
    info!("Output: {}", cli.output_dir.display());
    info!("Job ID: {}", cli.job_id);

    match run(&cli, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {e:#}");
            let auth_failure = e
                .chain()
                .any(|cause| matches!(cause.downcast_ref(), Some(PortalError::Auth(_))));
            ExitCode::from(if auth_failure { 2 } else { 1 })
        }
    }
}

async fn run(cli: &Cli, ctx: &RunContext) -> anyhow::Result<()> {
    let mut config = RunConfig::default();
    config.headless = !cli.headed;
    if cli.fast_mode {
        config = config.fast_mode();
    }

    let records = read_records(&cli.input_file)?;
    if records.is_empty() {
        bail!("no records found in {}", cli.input_file.display());
    }
    let headers: Vec<String> = records[0].headers().to_vec();

    let summary = match cli.portal {
        PortalKind::BillTracking => {
            let transcriber = HttpTranscriber::new(config.transcriber_endpoint.clone())
                .context("building audio transcriber")?;
            let solver = RecaptchaSolver::new(
                Box::new(transcriber),
                config.max_audio_rounds,
                SnapshotSink::new(ctx.snapshots_dir()),
            )
            .context("building challenge solver")?;
            let driver =
                BillTrackingPortal::new(solver, SnapshotSink::new(ctx.snapshots_dir()));
            drive(driver, ctx, &config, records).await?
        }
        PortalKind::PortTracking => {
            drive(PortTrackingPortal::new(), ctx, &config, records).await?
        }
        PortalKind::ExportRegistry => {
            let username = cli
                .username
                .clone()
                .context("--username is required for the export registry portal")?;
            let password = cli
                .password
                .clone()
                .context("--password is required for the export registry portal")?;
            let pdf_dir = cli
                .pdf_dir
                .clone()
                .context("--pdf-dir is required for the export registry portal")?;
            if !pdf_dir.is_dir() {
                bail!("PDF directory not found: {}", pdf_dir.display());
            }
            let driver = ExportRegistryPortal::new(
                username,
                password,
                pdf_dir,
                SnapshotSink::new(ctx.snapshots_dir()),
            );
            drive(driver, ctx, &config, records).await?
        }
    };

    finish(cli, ctx, &headers, &summary)?;
    Ok(())
}

/// Run the controller against one driver.
async fn drive<D>(
    driver: D,
    ctx: &RunContext,
    config: &RunConfig,
    records: Vec<Record>,
) -> Result<RunSummary, PortalError>
where
    D: PortalDriver<BrowserSession>,
{
    let mut manager = ChromeSessionManager::new(config.session_config());
    let mut ledger = ResultLedger::open(&ctx.ledger_path())?;
    let store = ArtifactStore::new(ctx.pdfs_dir())?;

    let mut controller = Controller::new(&mut manager, &driver, &mut ledger, &store, config);
    controller.run(records).await
}

/// Post-drain bookkeeping: merged report, failed-rows export, summary.
fn finish(
    cli: &Cli,
    ctx: &RunContext,
    headers: &[String],
    summary: &RunSummary,
) -> anyhow::Result<()> {
    let portal_name = match cli.portal {
        PortalKind::BillTracking => "bill_tracking",
        PortalKind::PortTracking => "port_tracking",
        PortalKind::ExportRegistry => "export_registry",
    };

    if summary.artifacts.is_empty() {
        warn!("No PDFs generated, skipping combined report");
    } else {
        let combined = ctx.combined_report_path(portal_name);
        match merge_pdfs(&summary.artifacts, &combined) {
            Ok(count) => info!("Combined report: {} ({} documents)", combined.display(), count),
            Err(ArtifactError::NothingToMerge) => {
                warn!("All artifacts vanished before merge, skipping combined report")
            }
            Err(e) => return Err(e).context("merging artifacts"),
        }
    }

    if !summary.failed_records.is_empty() {
        let failed_path = ctx.failed_rows_path();
        export_failed_rows(&failed_path, headers, &summary.failed_records)
            .context("exporting failed rows")?;
        warn!(
            "{} records failed after retries, saved to {}",
            summary.failed_records.len(),
            failed_path.display()
        );
    }

    info!(
        "Completed: {}/{} succeeded, {} failed. Ledger: {}",
        summary.succeeded,
        summary.total,
        summary.failed_terminal,
        ctx.ledger_path().display()
    );
    Ok(())
}
