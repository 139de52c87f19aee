use crate::contracts::HandlerTraits;

use super::run_state::RunState;

/// Ceilings on corrections: global, per job, and (through the handler's
/// traits) per handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_errors: u32,
    pub max_errors_per_job: u32,
}

/// Decision for a handler whose `check` came back positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Go ahead and correct.
    Allow,
    /// The handler used up its own ceiling and does not raise; ignore it.
    SkipHandler,
}

/// Which ceiling a would-be correction runs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExceeded {
    Total { limit: u32, corrections: u32 },
    PerJob { limit: u32, corrections: u32 },
    PerHandler { limit: u32 },
}

impl RetryBudget {
    /// An unset per-job ceiling falls back to the global one.
    pub fn new(max_errors: u32, max_errors_per_job: Option<u32>) -> Self {
        Self {
            max_errors,
            max_errors_per_job: max_errors_per_job.unwrap_or(max_errors),
        }
    }

    /// Decide whether the handler in `slot` may apply another correction.
    ///
    /// The handler's own ceiling is consulted first, so a handler that is
    /// silently skipped never trips the shared ceilings.
    pub fn admit(
        &self,
        state: &RunState,
        slot: usize,
        traits: &HandlerTraits,
    ) -> Result<Admission, BudgetExceeded> {
        if let Some(limit) = traits.max_num_corrections
            && state.handler_count(slot) >= limit
        {
            if traits.raise_on_max {
                return Err(BudgetExceeded::PerHandler { limit });
            }
            return Ok(Admission::SkipHandler);
        }

        if state.errors_current_job >= self.max_errors_per_job {
            return Err(BudgetExceeded::PerJob {
                limit: self.max_errors_per_job,
                corrections: state.errors_current_job,
            });
        }

        if state.total_errors >= self.max_errors {
            return Err(BudgetExceeded::Total {
                limit: self.max_errors,
                corrections: state.total_errors,
            });
        }

        Ok(Admission::Allow)
    }

    /// Count an applied correction against every ceiling at once.
    pub fn charge(&self, state: &mut RunState, slot: usize) {
        state.total_errors += 1;
        state.errors_current_job += 1;
        state.ensure_handler_slots(slot + 1);
        state.handler_corrections[slot] += 1;
    }
}
