//! Input records.
//!
//! One [`Record`] is one row of the input file: an immutable set of
//! portal-specific key fields. The header is shared across all records of a
//! run so the failed-rows export can reproduce the input schema exactly.

use std::sync::Arc;

use crate::error::PortalError;

/// One unit of work, identified by portal-specific key fields.
#[derive(Debug, Clone)]
pub struct Record {
    /// Zero-based position in the input file (after blank-row skipping).
    pub index: usize,
    headers: Arc<Vec<String>>,
    values: Vec<String>,
}

impl Record {
    pub fn new(index: usize, headers: Arc<Vec<String>>, values: Vec<String>) -> Self {
        Self {
            index,
            headers,
            values,
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Look up a field by column name. Returns `None` when the column is
    /// absent; a present-but-blank field returns `Some("")`.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|i| self.values.get(i))
            .map(|v| v.trim())
    }

    /// Fetch a required field, failing with `RecordData` when it is missing
    /// or blank.
    pub fn require(&self, column: &str) -> Result<&str, PortalError> {
        match self.get(column) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(PortalError::RecordData(format!(
                "row {}: required field '{}' is missing or empty",
                self.index + 1,
                column
            ))),
        }
    }

    /// True when every cell of the row is blank or whitespace.
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|v| v.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(headers: &[&str], values: &[&str]) -> Record {
        Record::new(
            0,
            Arc::new(headers.iter().map(|s| s.to_string()).collect()),
            values.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn get_trims_whitespace() {
        let r = record(&["containerNo"], &["  MSKU123  "]);
        assert_eq!(r.get("containerNo"), Some("MSKU123"));
        assert_eq!(r.get("missing"), None);
    }

    #[test]
    fn require_rejects_blank_fields() {
        let r = record(&["serial", "year"], &["", "2024"]);
        let err = r.require("serial").unwrap_err();
        assert!(matches!(err, PortalError::RecordData(_)));
        assert_eq!(r.require("year").unwrap(), "2024");
    }

    #[test]
    fn blank_row_detection() {
        assert!(record(&["a", "b"], &["  ", ""]).is_blank());
        assert!(!record(&["a", "b"], &["", "x"]).is_blank());
    }
}
