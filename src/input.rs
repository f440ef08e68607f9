//! Input file ingestion.
//!
//! Reads the CSV work list (header row required). Rows whose cells are all
//! blank are skipped outright: they are noise from spreadsheet exports, not
//! records. Rows with data but a missing required key field are still
//! yielded; the portal driver fails them terminally during validation.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::PortalError;
use crate::record::Record;

/// Read all records from `path`.
///
/// Fails (startup-fatal) when the file is absent, unreadable, or has no
/// header row.
pub fn read_records(path: &Path) -> Result<Vec<Record>, PortalError> {
    if !path.exists() {
        return Err(PortalError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("input file not found: {}", path.display()),
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| io_error(format!("cannot open {}: {}", path.display(), e)))?;

    let headers: Arc<Vec<String>> = Arc::new(
        reader
            .headers()
            .map_err(|e| io_error(format!("cannot read header row: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect(),
    );

    if headers.iter().all(|h| h.is_empty()) {
        return Err(io_error("input file has an empty header row".to_string()));
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (row_no, row) in reader.records().enumerate() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping unparseable input row {}: {}", row_no + 2, e);
                skipped += 1;
                continue;
            }
        };

        let mut values: Vec<String> = row.iter().map(|v| v.trim().to_string()).collect();
        // Pad short rows so column lookups stay positional.
        values.resize(headers.len(), String::new());

        let record = Record::new(records.len(), headers.clone(), values);
        if record.is_blank() {
            skipped += 1;
            continue;
        }
        records.push(record);
    }

    info!(
        "Loaded {} records from {} ({} blank/unparseable rows skipped)",
        records.len(),
        path.display(),
        skipped
    );

    Ok(records)
}

fn io_error(msg: String) -> PortalError {
    PortalError::Io(std::io::Error::other(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_input(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_records_and_skips_blank_rows() {
        let file = write_input(
            "containerNo,note\nMSKU111,first\n  ,  \nMSKU222,second\n,,\n",
        );
        let records = read_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("containerNo"), Some("MSKU111"));
        assert_eq!(records[1].get("containerNo"), Some("MSKU222"));
        assert_eq!(records[1].index, 1);
    }

    #[test]
    fn keeps_rows_with_blank_key_but_other_data() {
        // Validation (not ingestion) decides these are RecordData failures.
        let file = write_input("serial,number\n,77\n");
        let records = read_records(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("serial"), Some(""));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = read_records(Path::new("/nonexistent/input.csv")).unwrap_err();
        assert!(matches!(err, PortalError::Io(_)));
    }

    #[test]
    fn pads_short_rows_to_header_width() {
        let file = write_input("a,b,c\n1,2\n");
        let records = read_records(file.path()).unwrap();
        assert_eq!(records[0].get("c"), Some(""));
    }
}
