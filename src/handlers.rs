//! Handlers that are useful for any kind of job.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use crate::contracts::{Correction, ErrorHandler, HandlerTraits, JobContext};
use crate::modder::apply_action;

/// Environment variable carrying the start time of the allocation (RFC 3339).
pub const WALLTIME_START_ENV: &str = "CUSTODIAN_WALLTIME_START";

const WALLTIME_ENV: [&str; 2] = ["PBS_WALLTIME", "SBATCH_TIMELIMIT"];

/// Fires when the run is about to exceed its wall time.
///
/// With a stop file the job is asked to stop cooperatively and the handler
/// does not terminate it; without one the job is terminated. Either way the
/// run then ends quietly.
#[derive(Debug, Clone)]
pub struct WalltimeHandler {
    wall_time: Duration,
    buffer: Duration,
    stop_file: Option<(String, String)>,
    start: DateTime<Utc>,
}

impl WalltimeHandler {
    pub fn new(wall_time: Duration) -> Self {
        Self {
            wall_time,
            buffer: Duration::from_secs(300),
            stop_file: None,
            start: start_time(),
        }
    }

    /// Wall time advertised by the batch system, if any.
    pub fn from_env() -> Option<Self> {
        WALLTIME_ENV
            .iter()
            .find_map(|var| std::env::var(var).ok()?.trim().parse::<u64>().ok())
            .map(|secs| Self::new(Duration::from_secs(secs)))
    }

    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    /// Write `name` with `contents` instead of terminating the job.
    pub fn with_stop_file(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.stop_file = Some((name.into(), contents.into()));
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    fn elapsed(&self) -> Duration {
        (Utc::now() - self.start).to_std().unwrap_or_default()
    }
}

fn start_time() -> DateTime<Utc> {
    std::env::var(WALLTIME_START_ENV)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

impl ErrorHandler for WalltimeHandler {
    fn traits(&self) -> HandlerTraits {
        HandlerTraits {
            is_monitor: true,
            is_terminating: self.stop_file.is_none(),
            max_num_corrections: Some(1),
            raises_runtime_error: false,
            ..HandlerTraits::default()
        }
    }

    fn check(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<bool> {
        Ok(self.elapsed() + self.buffer >= self.wall_time)
    }

    fn correct(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<Correction> {
        if let Some((name, contents)) = &self.stop_file {
            apply_action(
                ctx.directory,
                &json!({"file": name, "action": {"_file_create": {"content": contents}}}),
            )?;
            info!(file = %name, "stop file written");
        }
        Ok(Correction::unfixable(vec![format!(
            "Walltime reached after {}s",
            self.elapsed().as_secs()
        )]))
    }
}
