use std::fmt;

use serde::{Deserialize, Serialize};

/// The phases a job moves through under supervision.
///
/// Each job flows through: PENDING_JOB → SETUP → RUNNING_MONITORED →
/// TERMINAL_CHECK → VALIDATING → ADVANCE, looping back to SETUP through
/// RETRY whenever a handler applies a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    PendingJob,
    Setup,
    RunningMonitored,
    TerminalCheck,
    Validating,
    Advance,
    Retry,
    Done,
    Fatal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PendingJob => write!(f, "PENDING_JOB"),
            Phase::Setup => write!(f, "SETUP"),
            Phase::RunningMonitored => write!(f, "RUNNING_MONITORED"),
            Phase::TerminalCheck => write!(f, "TERMINAL_CHECK"),
            Phase::Validating => write!(f, "VALIDATING"),
            Phase::Advance => write!(f, "ADVANCE"),
            Phase::Retry => write!(f, "RETRY"),
            Phase::Done => write!(f, "DONE"),
            Phase::Fatal => write!(f, "FATAL"),
        }
    }
}

/// What the work done in a phase produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The phase finished cleanly.
    Proceed,
    /// A handler applied a correction; the same job must run again.
    Corrected,
    /// The job sequence has no more jobs.
    Exhausted,
    /// A fatal condition unwound the run.
    Failed,
}

impl Phase {
    /// Compute the phase that follows `self` given the outcome of its work.
    ///
    /// - Any `Failed` outcome leads to `Fatal`.
    /// - `Corrected` is only meaningful while the job runs or is checked
    ///   afterwards; both lead to `Retry`, which always re-enters `Setup`.
    /// - `Exhausted` only ends the run from `PendingJob`.
    /// - `Done` and `Fatal` are terminal.
    pub fn next(self, outcome: Outcome) -> Phase {
        if outcome == Outcome::Failed {
            return match self {
                Phase::Done => Phase::Done,
                _ => Phase::Fatal,
            };
        }

        match (self, outcome) {
            (Phase::PendingJob, Outcome::Exhausted) => Phase::Done,
            (Phase::PendingJob, _) => Phase::Setup,
            (Phase::Setup, _) => Phase::RunningMonitored,
            (Phase::RunningMonitored, Outcome::Corrected) => Phase::Retry,
            (Phase::RunningMonitored, _) => Phase::TerminalCheck,
            (Phase::TerminalCheck, Outcome::Corrected) => Phase::Retry,
            (Phase::TerminalCheck, _) => Phase::Validating,
            (Phase::Validating, _) => Phase::Advance,
            (Phase::Retry, _) => Phase::Setup,
            (Phase::Advance, _) => Phase::PendingJob,
            (Phase::Done, _) => Phase::Done,
            (Phase::Fatal, _) => Phase::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_all_phases() {
        let mut phase = Phase::PendingJob;
        let mut seen = vec![phase];
        while phase != Phase::PendingJob || seen.len() == 1 {
            phase = phase.next(Outcome::Proceed);
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                Phase::PendingJob,
                Phase::Setup,
                Phase::RunningMonitored,
                Phase::TerminalCheck,
                Phase::Validating,
                Phase::Advance,
                Phase::PendingJob,
            ]
        );
    }

    #[test]
    fn correction_while_running_retries_from_setup() {
        let phase = Phase::RunningMonitored.next(Outcome::Corrected);
        assert_eq!(phase, Phase::Retry);
        assert_eq!(phase.next(Outcome::Proceed), Phase::Setup);
    }

    #[test]
    fn correction_after_exit_retries_from_setup() {
        assert_eq!(Phase::TerminalCheck.next(Outcome::Corrected), Phase::Retry);
    }

    #[test]
    fn validators_cannot_request_a_retry() {
        assert_eq!(Phase::Validating.next(Outcome::Corrected), Phase::Advance);
    }

    #[test]
    fn exhausted_sequence_finishes_the_run() {
        assert_eq!(Phase::PendingJob.next(Outcome::Exhausted), Phase::Done);
    }

    #[test]
    fn failure_is_fatal_from_anywhere() {
        for phase in [
            Phase::PendingJob,
            Phase::Setup,
            Phase::RunningMonitored,
            Phase::TerminalCheck,
            Phase::Validating,
            Phase::Advance,
            Phase::Retry,
        ] {
            assert_eq!(phase.next(Outcome::Failed), Phase::Fatal);
        }
    }

    #[test]
    fn terminal_phases_stay_put() {
        assert_eq!(Phase::Done.next(Outcome::Proceed), Phase::Done);
        assert_eq!(Phase::Fatal.next(Outcome::Proceed), Phase::Fatal);
    }

    #[test]
    fn phase_display() {
        assert_eq!(Phase::PendingJob.to_string(), "PENDING_JOB");
        assert_eq!(Phase::RunningMonitored.to_string(), "RUNNING_MONITORED");
        assert_eq!(Phase::TerminalCheck.to_string(), "TERMINAL_CHECK");
        assert_eq!(Phase::Fatal.to_string(), "FATAL");
    }
}
