//! Portal drivers.
//!
//! Each target site gets one [`PortalDriver`] implementation covering the
//! same capability set: navigate, fill, submit, await completion, extract
//! the artifact, and return to the entry point for the next record. The
//! controller depends only on this interface.

mod bill_tracking;
mod export_registry;
mod port_tracking;

pub use bill_tracking::BillTrackingPortal;
pub use export_registry::ExportRegistryPortal;
pub use port_tracking::PortTrackingPortal;

use async_trait::async_trait;
use serde_json::Value;

use crate::browser::BrowserSession;
use crate::error::PortalError;
use crate::record::Record;

/// Which portal variant a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PortalKind {
    /// Customs bill-status tracking (reCAPTCHA gated).
    BillTracking,
    /// Port-authority container tracking.
    PortTracking,
    /// Export-registry statement submission (credentialed).
    ExportRegistry,
}

/// The interaction adapter for one target site.
///
/// Generic over the session type so the controller's retry semantics can be
/// exercised without a browser.
#[async_trait]
pub trait PortalDriver<S: Send + Sync>: Send + Sync {
    /// Short portal name used in output file names and logs.
    fn name(&self) -> &'static str;

    /// Human-readable key identifying one record in ledgers and artifacts.
    fn record_key(&self, record: &Record) -> String;

    /// Check the record carries every field this portal needs. Failures are
    /// terminal and consume no retry budget.
    fn validate(&self, record: &Record) -> Result<(), PortalError>;

    /// Authenticate, when the portal requires it. Called once at startup
    /// and again after every session recreation.
    async fn login(&self, _session: &S) -> Result<(), PortalError> {
        Ok(())
    }

    /// Load the entry page.
    async fn navigate(&self, session: &S) -> Result<(), PortalError>;

    /// Populate all required fields for one record.
    async fn fill(&self, session: &S, record: &Record) -> Result<(), PortalError>;

    /// Trigger the action that produces the result. Solves the challenge
    /// gate first when one is present.
    async fn submit(&self, session: &S) -> Result<(), PortalError>;

    /// Block (bounded) until the result is ready.
    async fn await_completion(&self, session: &S) -> Result<(), PortalError>;

    /// Capture the rendered result as a single PDF payload.
    async fn extract_artifact(&self, session: &S) -> Result<Vec<u8>, PortalError>;

    /// Best-effort navigation back to a known state for the next record.
    async fn return_to_entry(&self, session: &S) -> Result<(), PortalError>;
}

/// Click the first element of `tag` whose trimmed text equals `text`.
///
/// Some portals only expose actions as text-labelled spans/links, so
/// selector-based clicking is not enough.
pub(crate) async fn click_by_text(
    session: &BrowserSession,
    tag: &str,
    text: &str,
) -> Result<(), PortalError> {
    let script = format!(
        "(() => {{ const els = Array.from(document.querySelectorAll({tag})); \
         const el = els.find(e => e.textContent.trim() === {txt}); \
         if (!el) return false; el.click(); return true; }})()",
        tag = serde_json::to_string(tag).unwrap_or_default(),
        txt = serde_json::to_string(text).unwrap_or_default()
    );
    match session.evaluate(&script).await.map_err(PortalError::from)? {
        Value::Bool(true) => Ok(()),
        _ => Err(PortalError::Navigation(format!(
            "no {tag} element with text '{text}'"
        ))),
    }
}

/// Poll until an element of `tag` with exactly `text` exists, bounded by
/// the session timeout.
pub(crate) async fn wait_for_text(
    session: &BrowserSession,
    tag: &str,
    text: &str,
) -> Result<(), PortalError> {
    let script = format!(
        "!!Array.from(document.querySelectorAll({tag})).find(e => e.textContent.trim() === {txt})",
        tag = serde_json::to_string(tag).unwrap_or_default(),
        txt = serde_json::to_string(text).unwrap_or_default()
    );
    let deadline = tokio::time::Instant::now() + session.timeout();
    loop {
        if let Value::Bool(true) = session.evaluate(&script).await.map_err(PortalError::from)? {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(PortalError::Timeout(format!(
                "waiting for {tag} with text '{text}'"
            )));
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }
}
