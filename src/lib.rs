//! portal-runner
//!
//! Batch automation for document portals: drives a portal UI record by
//! record, solves challenge gates, retries failures without losing queue
//! progress, and produces one PDF per record plus a merged report and a
//! durable result ledger.

pub mod artifacts;
pub mod browser;
pub mod captcha;
pub mod config;
pub mod controller;
pub mod error;
pub mod input;
pub mod ledger;
pub mod pacing;
pub mod portal;
pub mod record;
pub mod snapshot;

use std::path::PathBuf;

use tracing::info;

/// Where one job's files live. Built once at startup and passed explicitly
/// into the components that write output; there are no process-wide paths.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: String,
    pub output_dir: PathBuf,
}

impl RunContext {
    pub fn new(job_id: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn pdfs_dir(&self) -> PathBuf {
        self.output_dir.join("pdfs")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.output_dir.join("snapshots")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.output_dir.join(format!("results_{}.csv", self.job_id))
    }

    pub fn failed_rows_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("failed_rows_{}.csv", self.job_id))
    }

    pub fn combined_report_path(&self, portal: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_report_{}.pdf", portal, self.job_id))
    }

    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(self.pdfs_dir())?;
        std::fs::create_dir_all(self.snapshots_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

/// Initialize logging: console plus a rolling file in the job's logs dir.
/// The returned guard must be held for the lifetime of the process.
pub fn init_logging(ctx: &RunContext) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    let log_dir = ctx.logs_dir();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::daily(
            &log_dir,
            format!("portal-runner_{}.log", ctx.job_id),
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Log files saved to: {}", log_dir.display());
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_namespaces_outputs_by_job_id() {
        let ctx = RunContext::new("job42", "/tmp/out");
        assert_eq!(
            ctx.ledger_path(),
            PathBuf::from("/tmp/out/results_job42.csv")
        );
        assert_eq!(
            ctx.failed_rows_path(),
            PathBuf::from("/tmp/out/failed_rows_job42.csv")
        );
        assert_eq!(
            ctx.combined_report_path("port_tracking"),
            PathBuf::from("/tmp/out/port_tracking_report_job42.pdf")
        );
        assert_eq!(ctx.pdfs_dir(), PathBuf::from("/tmp/out/pdfs"));
    }

    #[test]
    fn ensure_layout_creates_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new("j", dir.path().join("out"));
        ctx.ensure_layout().unwrap();
        assert!(ctx.pdfs_dir().is_dir());
        assert!(ctx.snapshots_dir().is_dir());
        assert!(ctx.logs_dir().is_dir());
    }
}
