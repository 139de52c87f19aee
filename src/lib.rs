//! Supervises long-running external jobs: detects errors while and after
//! they run, applies corrections through pluggable handlers and resubmits,
//! bounded by retry budgets.

pub mod archive;
pub mod config;
pub mod contracts;
pub mod error;
pub mod handlers;
pub mod modder;
pub mod process;
pub mod scratch;
pub mod state_machine;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use contracts::{
    Correction, ErrorHandler, HandlerTraits, Job, JobContext, ProcessExit, ProcessHandle, Validator,
};
pub use error::SupervisorError;
pub use state_machine::{Ledger, Phase, RunState};
pub use supervisor::{Singleshot, Supervisor, TerminateFn};
