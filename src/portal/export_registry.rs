//! Export-registry statement submission portal.
//!
//! Credentialed variant: logs in, opens a new statement for each record,
//! fills the declaration form, uploads the commercial invoice and bill of
//! lading PDFs, and saves. The artifact is a PDF print of the saved state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{click_by_text, PortalDriver};
use crate::browser::BrowserSession;
use crate::error::PortalError;
use crate::record::Record;
use crate::snapshot::SnapshotSink;

const ENTRY_URL: &str = "https://epb-exporttracker.gov.bd/#/login";
const STATEMENT_LIST_LINK: &str = "div.tile a[href*='sooList']";
const BACK_LINK: &str = "a[href*='sooList'].navigate-link";

/// Text inputs filled straight from record columns.
const TEXT_FIELDS: &[(&str, &str)] = &[
    ("#inputBLNo", "BLNo"),
    ("#inputBLDate", "BLDate"),
    ("#inputContainerNo", "ContainerNo"),
    ("#adCode", "AdCode"),
    ("#serial", "Serial"),
    ("#inputEXPDate", "EXPDate"),
    ("#inputBillOfExportNo", "BillOfExportNo"),
    ("#inputBillOfExportDate", "BillOfExportDate"),
];

/// Selects driven by option value.
const VALUE_SELECTS: &[(&str, &str)] = &[
    ("#RexImporterId", "RexImporterId"),
    ("#DestinationCountryId", "DestinationCountryId"),
];

/// Selects driven by visible option text.
const TEXT_SELECTS: &[(&str, &str)] = &[
    ("#inputFreightRoute", "FreightRoute"),
    ("#year", "Year"),
];

pub struct ExportRegistryPortal {
    username: String,
    password: String,
    pdf_dir: PathBuf,
    snapshots: SnapshotSink,
}

impl ExportRegistryPortal {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        pdf_dir: impl Into<PathBuf>,
        snapshots: SnapshotSink,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            pdf_dir: pdf_dir.into(),
            snapshots,
        }
    }

    /// Locate an attachment for the record by invoice number and kind
    /// ("invoice" or "bol"), trying the conventional name patterns first and
    /// a contains-scan as fallback.
    fn find_pdf_file(&self, invoice_no: &str, kind: &str) -> Option<PathBuf> {
        let patterns = [
            format!("{invoice_no}_{kind}.pdf"),
            format!("{invoice_no}-{kind}.pdf"),
            format!("{kind}_{invoice_no}.pdf"),
            format!("{kind}-{invoice_no}.pdf"),
        ];
        for pattern in &patterns {
            let candidate = self.pdf_dir.join(pattern);
            if candidate.exists() {
                return Some(candidate);
            }
        }

        let entries = std::fs::read_dir(&self.pdf_dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name.contains(&invoice_no.to_lowercase()) && name.contains(kind) {
                return Some(entry.path());
            }
        }
        None
    }

    async fn upload_attachment(
        &self,
        session: &BrowserSession,
        tab_label: &str,
        path: &Path,
    ) -> Result<(), PortalError> {
        click_by_text(session, "a", tab_label).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;

        session
            .wait_for_element("input[type='file'][accept*='.pdf']")
            .await?;
        session
            .set_file_input(
                "input[type='file'][accept*='.pdf']",
                &path.to_string_lossy(),
            )
            .await?;
        info!("{} uploaded: {}", tab_label, path.display());
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(())
    }
}

#[async_trait]
impl PortalDriver<BrowserSession> for ExportRegistryPortal {
    fn name(&self) -> &'static str {
        "export_registry"
    }

    fn record_key(&self, record: &Record) -> String {
        record.get("InvoiceNo").unwrap_or("").to_string()
    }

    fn validate(&self, record: &Record) -> Result<(), PortalError> {
        let invoice_no = record.require("InvoiceNo")?;
        if self.find_pdf_file(invoice_no, "invoice").is_none() {
            return Err(PortalError::RecordData(format!(
                "no commercial invoice PDF for {invoice_no} in {}",
                self.pdf_dir.display()
            )));
        }
        if self.find_pdf_file(invoice_no, "bol").is_none() {
            return Err(PortalError::RecordData(format!(
                "no bill of lading PDF for {invoice_no} in {}",
                self.pdf_dir.display()
            )));
        }
        Ok(())
    }

    async fn login(&self, session: &BrowserSession) -> Result<(), PortalError> {
        info!("Logging in to the export registry");
        session.goto(ENTRY_URL).await?;
        session.wait_for_element("#inputUserName").await?;

        session.type_into("#inputUserName", &self.username).await?;
        session.type_into("#inputPassword", &self.password).await?;
        session
            .evaluate(
                "document.querySelector('button.btn i.icon-lock')?.closest('button')?.click()",
            )
            .await?;

        // The dashboard tile is the login-success signal.
        if let Err(e) = session.wait_for_element(STATEMENT_LIST_LINK).await {
            self.snapshots.capture(session, "login_fail").await;
            return Err(PortalError::Auth(format!(
                "login as '{}' failed: {e}",
                self.username
            )));
        }
        info!("Login successful");
        Ok(())
    }

    async fn navigate(&self, session: &BrowserSession) -> Result<(), PortalError> {
        session.click(STATEMENT_LIST_LINK).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(())
    }

    async fn fill(&self, session: &BrowserSession, record: &Record) -> Result<(), PortalError> {
        let invoice_no = record.require("InvoiceNo")?;

        // Open a fresh statement and its first draft row.
        session
            .click("button[ng-click='checkSooFormEligibility()']")
            .await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        session
            .click("button.btn.btn-primary[ng-click*='yes']")
            .await?;
        tokio::time::sleep(Duration::from_secs(3)).await;
        session
            .click("div.k-grid-content tbody tr:first-child a")
            .await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        click_by_text(session, "a", "SoO Form Details").await?;
        tokio::time::sleep(Duration::from_secs(2)).await;

        for (selector, column) in VALUE_SELECTS {
            session
                .select_value(selector, record.require(column)?)
                .await?;
        }
        for (selector, column) in TEXT_SELECTS {
            session.select_text(selector, record.require(column)?).await?;
        }
        for (selector, column) in TEXT_FIELDS {
            session
                .type_into(selector, record.get(column).unwrap_or(""))
                .await?;
        }

        // Commodity line: HS code, quantity, unit, then add the line.
        session
            .select_text("#inputHSCode", record.require("HSCode")?)
            .await?;
        session
            .type_into("#inputQnty", record.get("Quantity").unwrap_or(""))
            .await?;
        session
            .select_text("#inputUnitType", record.require("UnitType")?)
            .await?;
        session.click("a[ng-click^='addHsCodeInfo']").await?;
        tokio::time::sleep(Duration::from_secs(1)).await;

        session.type_into("#inputInvoiceNo", invoice_no).await?;
        session
            .type_into("#inputInvoiceDate", record.get("InvoiceDate").unwrap_or(""))
            .await?;
        session
            .select_text("#currency", record.require("Currency")?)
            .await?;
        session
            .type_into("#inputInvoiceValue", record.get("InvoiceValue").unwrap_or(""))
            .await?;
        session
            .type_into("#inputDate", record.get("DeclarationDate").unwrap_or(""))
            .await?;
        info!("Form fields filled for invoice {}", invoice_no);

        // Attachments. validate() proved both files exist.
        let invoice_pdf = self
            .find_pdf_file(invoice_no, "invoice")
            .ok_or_else(|| PortalError::RecordData(format!("invoice PDF vanished for {invoice_no}")))?;
        self.upload_attachment(session, "Commercial Invoice", &invoice_pdf)
            .await?;

        let bol_pdf = self
            .find_pdf_file(invoice_no, "bol")
            .ok_or_else(|| PortalError::RecordData(format!("bill of lading PDF vanished for {invoice_no}")))?;
        self.upload_attachment(session, "Bill of Lading", &bol_pdf)
            .await?;

        Ok(())
    }

    async fn submit(&self, session: &BrowserSession) -> Result<(), PortalError> {
        session
            .click("a.control-bar-save-btn[ng-click*='save']")
            .await?;
        Ok(())
    }

    async fn await_completion(&self, session: &BrowserSession) -> Result<(), PortalError> {
        tokio::time::sleep(Duration::from_secs(4)).await;
        session.wait_for_element(BACK_LINK).await?;
        Ok(())
    }

    async fn extract_artifact(&self, session: &BrowserSession) -> Result<Vec<u8>, PortalError> {
        session.print_to_pdf().await.map_err(PortalError::from)
    }

    async fn return_to_entry(&self, session: &BrowserSession) -> Result<(), PortalError> {
        session.click(BACK_LINK).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal(pdf_dir: &Path) -> ExportRegistryPortal {
        ExportRegistryPortal::new(
            "user",
            "pass",
            pdf_dir,
            SnapshotSink::new(pdf_dir.join("snapshots")),
        )
    }

    #[test]
    fn finds_attachment_by_pattern_then_contains() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("INV-9_invoice.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("scan of INV-9 BOL.pdf"), b"%PDF").unwrap();

        let portal = portal(dir.path());
        assert_eq!(
            portal.find_pdf_file("INV-9", "invoice").unwrap(),
            dir.path().join("INV-9_invoice.pdf")
        );
        // No conventional name; falls back to the contains-scan.
        assert!(portal.find_pdf_file("INV-9", "bol").is_some());
        assert!(portal.find_pdf_file("INV-9", "packing").is_none());
    }

    #[test]
    fn validate_requires_both_attachments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("INV-1_invoice.pdf"), b"%PDF").unwrap();

        let headers = std::sync::Arc::new(vec!["InvoiceNo".to_string()]);
        let record = Record::new(0, headers, vec!["INV-1".into()]);

        let err = portal(dir.path()).validate(&record).unwrap_err();
        assert!(matches!(err, PortalError::RecordData(_)));

        std::fs::write(dir.path().join("INV-1_bol.pdf"), b"%PDF").unwrap();
        assert!(portal(dir.path()).validate(&record).is_ok());
    }
}
