//! The three roles the supervisor drives: [`Job`], [`ErrorHandler`] and
//! [`Validator`], plus the [`ProcessHandle`] a job hands over from `run`.
//!
//! None of them share an implementation. Every call receives a
//! [`JobContext`] naming the active working directory, so collaborators
//! resolve their files the same way whether or not a scratch copy is in use.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where and what the supervisor is currently running.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    /// Active working directory (the scratch copy when scratch is enabled).
    pub directory: &'a Path,
    /// Zero-based position of the job in the sequence.
    pub job_index: usize,
    /// One-based attempt number of this job.
    pub attempt: u32,
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn with_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn signaled() -> Self {
        Self { code: None }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running process owned exclusively by the supervisor from the moment
/// `Job::run` returns it until it exits or is terminated.
pub trait ProcessHandle: Send {
    /// Non-blocking poll; `Some` once the process has exited.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Send the standard termination signal.
    fn terminate(&mut self) -> io::Result<()>;

    /// OS process id, for logging.
    fn id(&self) -> Option<u32> {
        None
    }
}

/// A unit of work executed in the working directory.
pub trait Job: Send {
    fn name(&self) -> String {
        short_type_name::<Self>()
    }

    /// Prepare inputs. Runs before every attempt, including retries.
    fn setup(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<()>;

    /// Launch the work and hand its process over to the supervisor.
    fn run(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<Box<dyn ProcessHandle>>;

    /// Post-processing once the process has exited.
    fn postprocess(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<()>;

    /// Stop a running attempt. Jobs that need a gentler shutdown override this.
    fn terminate(&mut self, process: &mut dyn ProcessHandle) -> io::Result<()> {
        process.terminate()
    }
}

/// What a handler reports from `correct`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub errors: Vec<String>,
    /// `None` signals an error the handler cannot fix.
    pub actions: Option<Vec<Value>>,
}

impl Correction {
    pub fn fixed(errors: Vec<String>, actions: Vec<Value>) -> Self {
        Self {
            errors,
            actions: Some(actions),
        }
    }

    pub fn unfixable(errors: Vec<String>) -> Self {
        Self {
            errors,
            actions: None,
        }
    }
}

/// Static description of how the supervisor treats a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerTraits {
    /// Checked while the job's process is still running.
    pub is_monitor: bool,
    /// The running job is stopped before `correct` is called.
    pub is_terminating: bool,
    /// Ceiling on corrections from this handler across the run.
    pub max_num_corrections: Option<u32>,
    /// Exceeding `max_num_corrections` is fatal instead of silently skipped.
    pub raise_on_max: bool,
    /// An unfixable correction aborts the run.
    pub raises_runtime_error: bool,
    /// Reset this handler's correction counter whenever a new job starts.
    pub reset_per_job: bool,
    /// File patterns archived with `backup` before `correct` runs.
    pub backup: Vec<String>,
}

impl Default for HandlerTraits {
    fn default() -> Self {
        Self {
            is_monitor: false,
            is_terminating: true,
            max_num_corrections: None,
            raise_on_max: false,
            raises_runtime_error: true,
            reset_per_job: false,
            backup: Vec::new(),
        }
    }
}

impl HandlerTraits {
    pub fn monitor() -> Self {
        Self {
            is_monitor: true,
            ..Self::default()
        }
    }
}

/// Detects an error in the job's files and knows how to fix it.
pub trait ErrorHandler: Send {
    fn name(&self) -> String {
        short_type_name::<Self>()
    }

    fn traits(&self) -> HandlerTraits {
        HandlerTraits::default()
    }

    /// Whether the error this handler looks for is present.
    fn check(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<bool>;

    /// Fix the error, reporting what was wrong and what changed.
    fn correct(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<Correction>;
}

/// A post-job check that can only fail the run, never repair it.
pub trait Validator: Send {
    fn name(&self) -> String {
        short_type_name::<Self>()
    }

    /// True means the job's output is invalid.
    fn check(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<bool>;
}

fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MixingHandler;

    impl ErrorHandler for MixingHandler {
        fn check(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn correct(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<Correction> {
            Ok(Correction::default())
        }
    }

    #[test]
    fn default_name_is_the_type_name() {
        assert_eq!(MixingHandler.name(), "MixingHandler");
    }

    #[test]
    fn default_traits() {
        let traits = MixingHandler.traits();
        assert!(!traits.is_monitor);
        assert!(traits.is_terminating);
        assert!(traits.raises_runtime_error);
        assert!(!traits.raise_on_max);
        assert!(!traits.reset_per_job);
        assert_eq!(traits.max_num_corrections, None);
        assert!(traits.backup.is_empty());
    }

    #[test]
    fn monitor_traits_keep_other_defaults() {
        let traits = HandlerTraits::monitor();
        assert!(traits.is_monitor);
        assert!(traits.is_terminating);
    }

    #[test]
    fn process_exit_success() {
        assert!(ProcessExit::with_code(0).success());
        assert!(!ProcessExit::with_code(1).success());
        assert!(!ProcessExit::signaled().success());
    }

    #[test]
    fn correction_constructors() {
        let fixed = Correction::fixed(vec!["e".into()], vec![serde_json::json!("a")]);
        assert_eq!(fixed.actions.map(|a| a.len()), Some(1));
        assert!(Correction::unfixable(vec!["e".into()]).actions.is_none());
    }
}
