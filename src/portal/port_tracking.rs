//! Port-authority container tracking portal.
//!
//! Keyed by the first input column (container number). The search result
//! opens in a separate window; that target is captured to PDF and closed
//! before the next record.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::PortalDriver;
use crate::browser::BrowserSession;
use crate::error::PortalError;
use crate::record::Record;

const ENTRY_URL: &str = "https://cpatos.gov.bd/pcs/";
const CONTAINER_INPUT: &str = "#containerLocation";
const SEARCH_BUTTON: &str = "input#submit[type='submit']";

pub struct PortTrackingPortal {
    /// Result window discovered by `await_completion`, consumed by
    /// `extract_artifact`.
    result_page: Mutex<Option<Page>>,
}

impl PortTrackingPortal {
    pub fn new() -> Self {
        Self {
            result_page: Mutex::new(None),
        }
    }

    fn container_no(record: &Record) -> Result<&str, PortalError> {
        match record.values().first().map(|v| v.trim()) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(PortalError::RecordData(format!(
                "row {}: container number (first column) is missing or empty",
                record.index + 1
            ))),
        }
    }
}

impl Default for PortTrackingPortal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortalDriver<BrowserSession> for PortTrackingPortal {
    fn name(&self) -> &'static str {
        "port_tracking"
    }

    fn record_key(&self, record: &Record) -> String {
        record
            .values()
            .first()
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    fn validate(&self, record: &Record) -> Result<(), PortalError> {
        Self::container_no(record).map(|_| ())
    }

    async fn navigate(&self, session: &BrowserSession) -> Result<(), PortalError> {
        session.goto(ENTRY_URL).await?;
        session.wait_for_element(CONTAINER_INPUT).await?;
        Ok(())
    }

    async fn fill(&self, session: &BrowserSession, record: &Record) -> Result<(), PortalError> {
        let container = Self::container_no(record)?;
        // Clear any value left from the previous record before typing.
        session
            .evaluate(
                "(() => { const el = document.querySelector('#containerLocation'); \
                 if (el) el.value = ''; })()",
            )
            .await?;
        session.type_into(CONTAINER_INPUT, container).await?;
        Ok(())
    }

    async fn submit(&self, session: &BrowserSession) -> Result<(), PortalError> {
        session.click(SEARCH_BUTTON).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        // The portal raises a confirm dialog for unknown containers.
        session.dismiss_dialog().await;
        Ok(())
    }

    async fn await_completion(&self, session: &BrowserSession) -> Result<(), PortalError> {
        let entry_url = session.current_url().await.unwrap_or_default();
        let deadline = tokio::time::Instant::now() + session.timeout();

        // The tracking result opens in a new window. Wait for a second
        // http(s) target to appear; when none does, the result rendered in
        // the main window instead.
        loop {
            for page in session.pages().await? {
                if let Ok(Some(url)) = page.url().await {
                    if url.starts_with("http")
                        && url != entry_url
                        && !url.contains("recaptcha")
                    {
                        info!("Result window: {}", url);
                        // Give the window time to finish rendering.
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        *self.result_page.lock().await = Some(page);
                        return Ok(());
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                debug!("No result window appeared, capturing the main window");
                *self.result_page.lock().await = None;
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn extract_artifact(&self, session: &BrowserSession) -> Result<Vec<u8>, PortalError> {
        let popup = self.result_page.lock().await.take();
        match popup {
            Some(page) => {
                let bytes = BrowserSession::print_page_to_pdf(&page)
                    .await
                    .map_err(PortalError::from)?;
                let _ = page.close().await;
                Ok(bytes)
            }
            None => session.print_to_pdf().await.map_err(PortalError::from),
        }
    }

    async fn return_to_entry(&self, session: &BrowserSession) -> Result<(), PortalError> {
        session.goto(ENTRY_URL).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(values: &[&str]) -> Record {
        let headers: Arc<Vec<String>> = Arc::new(vec!["containerNo".into()]);
        Record::new(0, headers, values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn container_number_comes_from_first_column() {
        let r = record(&["  MSKU1234567  "]);
        assert_eq!(PortTrackingPortal::container_no(&r).unwrap(), "MSKU1234567");
    }

    #[test]
    fn blank_container_is_record_data_error() {
        let r = record(&["   "]);
        let err = PortTrackingPortal::container_no(&r).unwrap_err();
        assert!(matches!(err, PortalError::RecordData(_)));
    }
}
