//! Failure forensics.
//!
//! On-demand screenshot + page-HTML capture. Snapshots are diagnostics, not
//! deliverables: every error here is logged and swallowed so forensics can
//! never make a failing record fail harder.

use std::path::PathBuf;

use chrono::Local;
use tracing::{error, info};

use crate::artifacts::sanitize_component;
use crate::browser::BrowserSession;

/// Sink for debug snapshots, scoped to one job's output directory.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    dir: PathBuf,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Save a screenshot and the page markup under `name`. Best-effort.
    pub async fn capture(&self, session: &BrowserSession, name: &str) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            error!("Snapshot dir creation failed: {}", e);
            return;
        }

        let stem = format!(
            "{}_{}",
            sanitize_component(name),
            Local::now().format("%Y%m%d_%H%M%S")
        );

        match session.screenshot_png().await {
            Ok(png) => {
                let path = self.dir.join(format!("{stem}.png"));
                match std::fs::write(&path, png) {
                    Ok(()) => info!("Screenshot saved: {}", path.display()),
                    Err(e) => error!("Screenshot write failed: {}", e),
                }
            }
            Err(e) => error!("Screenshot failed: {}", e),
        }

        match session.content().await {
            Ok(html) => {
                let path = self.dir.join(format!("{stem}.html"));
                match std::fs::write(&path, html) {
                    Ok(()) => info!("HTML saved: {}", path.display()),
                    Err(e) => error!("HTML save failed: {}", e),
                }
            }
            Err(e) => error!("HTML capture failed: {}", e),
        }
    }
}
