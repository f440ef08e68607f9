//! Result ledger.
//!
//! Append-only CSV of terminal outcomes, one row per record. The ledger is
//! the durable source of truth for what happened: every row is flushed as
//! it is written, so a crash mid-run leaves a file consistent with all
//! records processed so far.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use chrono::Local;

/// Terminal outcome recorded per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerStatus::Succeeded => write!(f, "Success"),
            LedgerStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Append-only status ledger.
pub struct ResultLedger {
    writer: csv::Writer<File>,
}

impl ResultLedger {
    /// Open (or create) the ledger at `path`. The header row is written
    /// exactly once, when the file is first created.
    pub fn open(path: &Path) -> io::Result<Self> {
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer
                .write_record(["record_key", "status", "message", "timestamp"])
                .map_err(csv_to_io)?;
            writer.flush()?;
        }

        Ok(Self { writer })
    }

    /// Append one terminal outcome and flush it to disk.
    pub fn append(
        &mut self,
        record_key: &str,
        status: LedgerStatus,
        message: &str,
    ) -> io::Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.writer
            .write_record([record_key, &status.to_string(), message, &timestamp])
            .map_err(csv_to_io)?;
        self.writer.flush()
    }
}

fn csv_to_io(e: csv::Error) -> io::Error {
    io::Error::other(e.to_string())
}
