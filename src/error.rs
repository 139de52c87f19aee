use thiserror::Error;

use crate::state_machine::Phase;

/// Every way a supervised run can end early.
///
/// Callers match on the variant to tell "the job logic needs a human"
/// (`NonRecoverable`, `ReturnCode`) from "this ran out of retries"
/// (the `MaxCorrections*` family) from "the output is simply invalid"
/// (`Validation`).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation failed: {validator} (job {job})")]
    Validation { validator: String, job: String },

    #[error("Unrecoverable error for handler: {handler} (job {job})")]
    NonRecoverable {
        handler: String,
        job: String,
        /// False when the handler opted out of raising; the run stops quietly.
        raises: bool,
    },

    #[error("Job {job} return code is {}. Terminating...", display_code(.code))]
    ReturnCode { job: String, code: Option<i32> },

    #[error("Max errors reached: {limit} ({corrections} corrections recorded)")]
    MaxCorrections { limit: u32, corrections: u32 },

    #[error("Max errors per job reached: {limit} (job {job}, {corrections} corrections)")]
    MaxCorrectionsPerJob {
        limit: u32,
        job: String,
        corrections: u32,
    },

    #[error("Maximum number of corrections {limit} reached for handler {handler}")]
    MaxCorrectionsPerHandler { handler: String, limit: u32 },

    #[error("Bad handler {handler}: {source}")]
    Handler {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Bad validator {validator}: {source}")]
    ValidatorFault {
        validator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Job {job} failed during {phase}: {source}")]
    Job {
        job: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl SupervisorError {
    /// Whether this condition must surface to the caller of `run`.
    pub fn raises(&self) -> bool {
        !matches!(self, SupervisorError::NonRecoverable { raises: false, .. })
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (killed by signal)".to_string(),
    }
}
