use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ledger::Ledger;

/// Everything the supervisor needs to resume a run.
///
/// Counters live here rather than on the handlers so the whole state can be
/// written into a checkpoint. Per-handler counters are indexed by the
/// handler's registration slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    /// Number of jobs that have advanced; also the index of the next job.
    pub completed_jobs: usize,
    pub ledger: Ledger,
    pub total_errors: u32,
    pub errors_current_job: u32,
    pub handler_corrections: Vec<u32>,
}

impl RunState {
    pub fn new(handler_count: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            completed_jobs: 0,
            ledger: Ledger::new(),
            total_errors: 0,
            errors_current_job: 0,
            handler_corrections: vec![0; handler_count],
        }
    }

    /// Rebuild counters from a persisted ledger. Per-handler counts are
    /// matched by handler name, in slot order.
    pub fn from_ledger(ledger: Ledger, handler_names: &[String]) -> Self {
        let mut state = Self::new(handler_names.len());
        for entry in ledger.entries() {
            for record in entry.corrections.iter().filter(|r| r.is_actionable()) {
                state.total_errors += 1;
                if let Some(slot) = handler_names.iter().position(|n| *n == record.handler) {
                    state.handler_corrections[slot] += 1;
                }
            }
        }
        state.errors_current_job = ledger
            .current()
            .map(|e| e.corrections.iter().filter(|r| r.is_actionable()).count() as u32)
            .unwrap_or(0);
        state.completed_jobs = ledger.len().saturating_sub(1);
        state.ledger = ledger;
        state
    }

    /// Open a ledger entry for the next job and reset per-job counters.
    /// `resets` flags the handler slots whose counters restart with each job.
    pub fn begin_job(&mut self, job: impl Into<String>, job_index: usize, resets: &[bool]) {
        self.ledger.begin_job(job, job_index);
        self.errors_current_job = 0;
        for (count, reset) in self.handler_corrections.iter_mut().zip(resets) {
            if *reset {
                *count = 0;
            }
        }
    }

    pub fn handler_count(&self, slot: usize) -> u32 {
        self.handler_corrections.get(slot).copied().unwrap_or(0)
    }

    /// Make room for handlers registered after a restore.
    pub fn ensure_handler_slots(&mut self, handler_count: usize) {
        if self.handler_corrections.len() < handler_count {
            self.handler_corrections.resize(handler_count, 0);
        }
    }
}
