//! The correction ledger: one entry per job attempted, each holding every
//! correction applied to that job.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SupervisorError;

/// File name the ledger is persisted under, inside the working directory.
pub const LEDGER_FILE: &str = "custodian.json";

/// One detected-and-processed error event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub errors: Vec<String>,
    /// `None` (or empty) means the handler could not fix what it found.
    pub actions: Option<Vec<Value>>,
    pub handler: String,
}

impl CorrectionRecord {
    /// Whether the handler actually changed something.
    pub fn is_actionable(&self) -> bool {
        self.actions.as_ref().is_some_and(|a| !a.is_empty())
    }
}

/// Everything recorded about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub job: String,
    pub job_index: usize,
    pub corrections: Vec<CorrectionRecord>,
    /// Handler that ended the run, if any.
    pub handler: Option<String>,
    /// Validator that ended the run, if any.
    pub validator: Option<String>,
    pub max_errors: bool,
    pub max_errors_per_job: bool,
    pub max_errors_per_handler: bool,
    pub nonzero_return_code: bool,
}

impl LedgerEntry {
    pub fn new(job: impl Into<String>, job_index: usize) -> Self {
        Self {
            job: job.into(),
            job_index,
            corrections: Vec::new(),
            handler: None,
            validator: None,
            max_errors: false,
            max_errors_per_job: false,
            max_errors_per_handler: false,
            nonzero_return_code: false,
        }
    }
}

/// Append-only history of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Open the entry for a job that is about to start.
    pub fn begin_job(&mut self, job: impl Into<String>, job_index: usize) -> &mut LedgerEntry {
        let slot = self.entries.len();
        self.entries.push(LedgerEntry::new(job, job_index));
        &mut self.entries[slot]
    }

    pub fn current(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut LedgerEntry> {
        self.entries.last_mut()
    }

    /// Append a correction to the entry of the job currently running.
    pub fn record(&mut self, record: CorrectionRecord) {
        if let Some(entry) = self.entries.last_mut() {
            entry.corrections.push(record);
        }
    }

    /// Total number of corrections across every job.
    pub fn total_corrections(&self) -> usize {
        self.entries.iter().map(|e| e.corrections.len()).sum()
    }

    /// Drop entries past `len`; used when resuming from a checkpoint.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Write the ledger as pretty JSON to `directory/custodian.json`.
    pub fn save(&self, directory: &Path) -> Result<(), SupervisorError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(directory.join(LEDGER_FILE), json)?;
        Ok(())
    }

    /// Read the ledger from `directory`, accepting a gzipped copy left by
    /// `gzipped_output`. Returns `None` if neither file exists.
    pub fn load(directory: &Path) -> Result<Option<Self>, SupervisorError> {
        let plain = directory.join(LEDGER_FILE);
        if plain.exists() {
            let reader = BufReader::new(File::open(plain)?);
            return Ok(Some(serde_json::from_reader(reader)?));
        }

        let gzipped = directory.join(format!("{LEDGER_FILE}.gz"));
        if gzipped.exists() {
            let mut contents = String::new();
            GzDecoder::new(File::open(gzipped)?).read_to_string(&mut contents)?;
            return Ok(Some(serde_json::from_str(&contents)?));
        }

        Ok(None)
    }
}
