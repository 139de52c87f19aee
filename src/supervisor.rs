use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::archive::{self, BACKUP_PREFIX};
use crate::config::SupervisorConfig;
use crate::contracts::{ErrorHandler, HandlerTraits, Job, JobContext, ProcessExit, ProcessHandle, Validator};
use crate::error::SupervisorError;
use crate::scratch::ScratchSpace;
use crate::state_machine::{
    Admission, BudgetExceeded, CorrectionRecord, LEDGER_FILE, Ledger, Outcome, Phase, RetryBudget,
    RunState,
};

/// Replacement for `Job::terminate` applied to every running process.
pub type TerminateFn = Box<dyn Fn(&mut dyn ProcessHandle) -> io::Result<()> + Send + Sync>;

/// Where a singleshot pipeline stands after one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Singleshot {
    /// A job is set up and waiting to be launched externally.
    Pending { remaining: usize },
    /// Every job ran and validated.
    Finished,
    /// A handler that does not raise found an error it could not fix.
    Halted,
}

struct HandlerSlot {
    handler: Box<dyn ErrorHandler>,
    name: String,
    traits: HandlerTraits,
    disabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Monitors,
    Terminal,
    All,
}

impl Scope {
    fn includes(self, traits: &HandlerTraits) -> bool {
        match self {
            Scope::Monitors => traits.is_monitor,
            Scope::Terminal => !traits.is_monitor,
            Scope::All => true,
        }
    }
}

enum MonitorOutcome {
    Exited(ProcessExit),
    Corrected,
}

/// Runs a sequence of jobs, correcting errors with the registered handlers
/// and recording everything in a [`Ledger`].
pub struct Supervisor {
    config: SupervisorConfig,
    directory: PathBuf,
    budget: RetryBudget,
    handlers: Vec<HandlerSlot>,
    validators: Vec<Box<dyn Validator>>,
    terminate_fn: Option<TerminateFn>,
    state: RunState,
}

impl Supervisor {
    /// Create a supervisor working in `directory`. Fails if the
    /// configuration would stall the polling loop.
    pub fn new(config: SupervisorConfig, directory: impl Into<PathBuf>) -> Result<Self, SupervisorError> {
        config.validate()?;
        Ok(Self {
            budget: config.budget(),
            config,
            directory: directory.into(),
            handlers: Vec::new(),
            validators: Vec::new(),
            terminate_fn: None,
            state: RunState::new(0),
        })
    }

    /// Register a handler. Handlers are evaluated in registration order.
    pub fn with_handler<H: ErrorHandler + 'static>(mut self, handler: H) -> Self {
        self.add_handler(Box::new(handler));
        self
    }

    /// Register an already boxed handler, as [`Supervisor::with_handler`] does.
    pub fn add_handler(&mut self, handler: Box<dyn ErrorHandler>) {
        self.handlers.push(HandlerSlot {
            name: handler.name(),
            traits: handler.traits(),
            handler,
            disabled: false,
        });
        self.state.ensure_handler_slots(self.handlers.len());
    }

    /// Register a validator. Validators run in registration order once a
    /// job has passed its terminal handlers.
    pub fn with_validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.add_validator(Box::new(validator));
        self
    }

    /// Register an already boxed validator.
    pub fn add_validator(&mut self, validator: Box<dyn Validator>) {
        self.validators.push(validator);
    }

    /// Stop processes with `terminate` instead of each job's own `terminate`.
    pub fn with_terminate_fn<F>(mut self, terminate: F) -> Self
    where
        F: Fn(&mut dyn ProcessHandle) -> io::Result<()> + Send + Sync + 'static,
    {
        self.terminate_fn = Some(Box::new(terminate));
        self
    }

    /// Counters and ledger of the current or most recent run.
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Corrections recorded so far.
    pub fn ledger(&self) -> &Ledger {
        &self.state.ledger
    }

    /// Run every job, returning the ledger.
    ///
    /// Jobs are pulled from `jobs` one at a time, so the sequence may be
    /// generated on demand. With checkpointing enabled, a checkpoint left by
    /// an earlier run is restored first and its completed jobs are skipped.
    /// A handler that cannot fix its error and does not raise stops the run
    /// early without an error.
    pub async fn run<I>(&mut self, jobs: I) -> Result<Ledger, SupervisorError>
    where
        I: IntoIterator<Item = Box<dyn Job>>,
    {
        self.state = RunState::new(self.handlers.len());
        if self.config.checkpoint
            && let Some(state) = archive::restore_checkpoint(&self.directory)?
        {
            info!(completed_jobs = state.completed_jobs, "resuming from checkpoint");
            self.state = state;
            self.state.ensure_handler_slots(self.handlers.len());
        }

        let span = info_span!("run", run_id = %self.state.run_id);
        self.supervise(jobs.into_iter()).instrument(span).await
    }

    async fn supervise(
        &mut self,
        jobs: impl Iterator<Item = Box<dyn Job>>,
    ) -> Result<Ledger, SupervisorError> {
        let start = Utc::now();
        let (host, cluster) = execution_host_info();
        info!(
            directory = %self.directory.display(),
            started = %start.to_rfc3339(),
            "run started"
        );
        info!(%host, %cluster, "execution host");

        let scratch = match &self.config.scratch_dir {
            Some(root) => Some(ScratchSpace::enter(root, &self.directory)?),
            None => None,
        };
        let workdir = scratch
            .as_ref()
            .map(|s| s.path().to_path_buf())
            .unwrap_or_else(|| self.directory.clone());

        let result = self.run_jobs(jobs, &workdir).await;

        info!(file = %workdir.join(LEDGER_FILE).display(), "logging corrections");
        if let Err(e) = self.state.ledger.save(&workdir) {
            warn!(error = %e, "could not write the ledger");
        }
        let end = Utc::now();
        info!(
            ended = %end.to_rfc3339(),
            duration_secs = (end - start).num_seconds(),
            "run ended"
        );
        if self.config.gzipped_output {
            match archive::gzip_dir(&workdir) {
                Ok(count) => info!(files = count, "compressed outputs"),
                Err(e) => warn!(error = %e, "could not compress outputs"),
            }
        }
        if let Some(scratch) = scratch {
            scratch.leave()?;
        }

        match result {
            Ok(()) => {
                archive::delete_checkpoints(&self.directory)?;
                Ok(self.state.ledger.clone())
            }
            Err(e) if !e.raises() => {
                info!(reason = %e, "run stopped");
                archive::delete_checkpoints(&self.directory)?;
                Ok(self.state.ledger.clone())
            }
            Err(e) => {
                error!(error = %e, "run aborted");
                Err(e)
            }
        }
    }

    async fn run_jobs(
        &mut self,
        jobs: impl Iterator<Item = Box<dyn Job>>,
        workdir: &Path,
    ) -> Result<(), SupervisorError> {
        let skip = self.state.completed_jobs;
        self.state.ledger.truncate(skip);

        for (job_index, mut job) in jobs.enumerate().skip(skip) {
            self.run_job(job.as_mut(), job_index, workdir).await?;
            self.state.completed_jobs = job_index + 1;
            self.state.ledger.save(workdir)?;

            if self.config.checkpoint
                && let Err(e) = archive::save_checkpoint(&self.directory, workdir, &self.state)
            {
                warn!(error = %e, "checkpoint failed; continuing without it");
            }
            debug!(from = %Phase::Advance, to = %Phase::Advance.next(Outcome::Proceed), "phase transition");
        }

        debug!(
            from = %Phase::PendingJob,
            to = %Phase::PendingJob.next(Outcome::Exhausted),
            "phase transition"
        );
        Ok(())
    }

    async fn run_job(
        &mut self,
        job: &mut dyn Job,
        job_index: usize,
        workdir: &Path,
    ) -> Result<(), SupervisorError> {
        let name = job.name();
        let resets: Vec<bool> = self.handlers.iter().map(|h| h.traits.reset_per_job).collect();
        self.state.begin_job(name.clone(), job_index, &resets);

        let mut phase = Phase::PendingJob.next(Outcome::Proceed);
        let mut attempt = 0;
        let mut exit = None;

        while phase != Phase::Advance {
            if phase == Phase::Setup {
                attempt += 1;
            }
            let ctx = JobContext {
                directory: workdir,
                job_index,
                attempt,
            };
            let job_fault = |source: anyhow::Error| SupervisorError::Job {
                job: name.clone(),
                phase,
                source,
            };

            let step = match phase {
                Phase::Setup => {
                    info!(
                        job = %name,
                        job_index,
                        attempt,
                        total_errors = self.state.total_errors,
                        errors_current_job = self.state.errors_current_job,
                        "starting job"
                    );
                    job.setup(&ctx).map_err(job_fault).map(|()| Outcome::Proceed)
                }
                Phase::RunningMonitored => match job.run(&ctx) {
                    Ok(process) => match self.monitor(job, process, &ctx).await {
                        Ok(MonitorOutcome::Exited(code)) => {
                            exit = Some(code);
                            Ok(Outcome::Proceed)
                        }
                        Ok(MonitorOutcome::Corrected) => Ok(Outcome::Corrected),
                        Err(e) => Err(e),
                    },
                    Err(source) => Err(job_fault(source)),
                },
                Phase::TerminalCheck => {
                    info!(job = %name, "job completed; checking remaining handlers");
                    match job.postprocess(&ctx) {
                        Ok(()) => self
                            .correct_first(Scope::Terminal, &ctx, &name)
                            .map(|corrected| if corrected { Outcome::Corrected } else { Outcome::Proceed }),
                        Err(source) => Err(job_fault(source)),
                    }
                }
                Phase::Validating => self
                    .validate(&ctx, &name)
                    .and_then(|()| self.check_return_code(exit, &name))
                    .map(|()| Outcome::Proceed),
                _ => Ok(Outcome::Proceed),
            };

            let outcome = match step {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(job = %name, from = %phase, to = %phase.next(Outcome::Failed), "phase transition");
                    return Err(e);
                }
            };
            let next = phase.next(outcome);
            debug!(job = %name, from = %phase, to = %next, "phase transition");
            phase = next;
        }
        Ok(())
    }

    /// Poll the process until it exits or a monitor corrects something.
    /// On a fatal condition a still-running process is terminated, except
    /// after a quiet stop, where it is left to finish on its own.
    async fn monitor(
        &mut self,
        job: &mut dyn Job,
        mut process: Box<dyn ProcessHandle>,
        ctx: &JobContext<'_>,
    ) -> Result<MonitorOutcome, SupervisorError> {
        if let Some(pid) = process.id() {
            debug!(pid, "monitoring process");
        }
        let result = self.watch(job, process.as_mut(), ctx).await;
        if let Err(e) = &result
            && process.try_wait()?.is_none()
        {
            if e.raises() {
                self.terminate(job, process.as_mut())?;
            }
            self.wait_for_exit(process.as_mut()).await?;
        }
        result
    }

    async fn watch(
        &mut self,
        job: &mut dyn Job,
        process: &mut dyn ProcessHandle,
        ctx: &JobContext<'_>,
    ) -> Result<MonitorOutcome, SupervisorError> {
        let name = job.name();
        let has_monitors = self.handlers.iter().any(|h| h.traits.is_monitor);
        let mut polls: u32 = 0;

        loop {
            sleep(self.config.polling_interval()).await;
            if let Some(exit) = process.try_wait()? {
                return Ok(MonitorOutcome::Exited(exit));
            }
            polls = polls.wrapping_add(1);
            if !has_monitors || polls % self.config.monitor_freq != 0 {
                continue;
            }

            let mut start = 0;
            while let Some(slot) = self.first_positive(Scope::Monitors, ctx, &name, start)? {
                start = slot + 1;
                if let Some(exit) = process.try_wait()?
                    && !exit.success()
                    && self.config.terminate_on_nonzero_returncode
                {
                    return Err(self.return_code_fault(exit, &name));
                }

                if self.handlers[slot].traits.is_terminating {
                    info!(handler = %self.handlers[slot].name, job = %name, "terminating job");
                    self.terminate(job, process)?;
                    self.wait_for_exit(process).await?;
                    self.apply_correction(slot, ctx, &name)?;
                    return Ok(MonitorOutcome::Corrected);
                }
                if self.apply_correction(slot, ctx, &name)? {
                    break;
                }
            }
        }
    }

    fn terminate(&self, job: &mut dyn Job, process: &mut dyn ProcessHandle) -> Result<(), SupervisorError> {
        match &self.terminate_fn {
            Some(terminate) => terminate(process)?,
            None => job.terminate(process)?,
        }
        Ok(())
    }

    async fn wait_for_exit(&self, process: &mut dyn ProcessHandle) -> Result<ProcessExit, SupervisorError> {
        loop {
            if let Some(exit) = process.try_wait()? {
                return Ok(exit);
            }
            sleep(self.config.polling_interval()).await;
        }
    }

    /// Slot of the first enabled handler in `scope`, at or after `start`,
    /// whose check is positive and whose budget admits a correction.
    fn first_positive(
        &mut self,
        scope: Scope,
        ctx: &JobContext<'_>,
        job_name: &str,
        start: usize,
    ) -> Result<Option<usize>, SupervisorError> {
        for slot in start..self.handlers.len() {
            let entry = &mut self.handlers[slot];
            if entry.disabled || !scope.includes(&entry.traits) {
                continue;
            }
            match entry.handler.check(ctx) {
                Ok(false) => {}
                Ok(true) => match self.budget.admit(&self.state, slot, &self.handlers[slot].traits) {
                    Ok(Admission::Allow) => return Ok(Some(slot)),
                    Ok(Admission::SkipHandler) => warn!(
                        handler = %self.handlers[slot].name,
                        corrections = self.state.handler_count(slot),
                        "handler reached its maximum number of corrections; skipping"
                    ),
                    Err(exceeded) => return Err(self.budget_fault(exceeded, slot, job_name)),
                },
                Err(source) => self.handler_fault(slot, source)?,
            }
        }
        Ok(None)
    }

    /// Correct with the first positive handler in `scope`. A handler that
    /// faults under `skip_over_errors` is disabled and the scan continues.
    fn correct_first(&mut self, scope: Scope, ctx: &JobContext<'_>, job_name: &str) -> Result<bool, SupervisorError> {
        let mut start = 0;
        while let Some(slot) = self.first_positive(scope, ctx, job_name, start)? {
            if self.apply_correction(slot, ctx, job_name)? {
                return Ok(true);
            }
            start = slot + 1;
        }
        Ok(false)
    }

    /// Back up, correct, record and charge. Returns false if the handler
    /// faulted and was disabled instead.
    fn apply_correction(&mut self, slot: usize, ctx: &JobContext<'_>, job_name: &str) -> Result<bool, SupervisorError> {
        let patterns = self.handlers[slot].traits.backup.clone();
        if !patterns.is_empty() {
            archive::backup(&patterns, BACKUP_PREFIX, ctx.directory)?;
        }

        let correction = match self.handlers[slot].handler.correct(ctx) {
            Ok(correction) => correction,
            Err(source) => {
                self.handler_fault(slot, source)?;
                return Ok(false);
            }
        };

        let handler = self.handlers[slot].name.clone();
        let record = CorrectionRecord {
            errors: correction.errors,
            actions: correction.actions,
            handler: handler.clone(),
        };
        let actionable = record.is_actionable();
        if actionable {
            info!(%handler, job = %job_name, errors = ?record.errors, "correction applied");
        } else {
            warn!(%handler, job = %job_name, errors = ?record.errors, "handler could not fix the error");
        }

        self.state.ledger.record(record);
        if actionable {
            self.budget.charge(&mut self.state, slot);
        }
        self.state.ledger.save(ctx.directory)?;

        if !actionable {
            if let Some(entry) = self.state.ledger.current_mut() {
                entry.handler = Some(handler.clone());
            }
            return Err(SupervisorError::NonRecoverable {
                handler,
                job: job_name.to_string(),
                raises: self.handlers[slot].traits.raises_runtime_error,
            });
        }
        Ok(true)
    }

    fn handler_fault(&mut self, slot: usize, source: anyhow::Error) -> Result<(), SupervisorError> {
        let entry = &mut self.handlers[slot];
        if self.config.skip_over_errors {
            warn!(handler = %entry.name, error = %source, "handler failed; disabling it");
            entry.disabled = true;
            return Ok(());
        }
        Err(SupervisorError::Handler {
            handler: entry.name.clone(),
            source,
        })
    }

    fn budget_fault(&mut self, exceeded: BudgetExceeded, slot: usize, job_name: &str) -> SupervisorError {
        let handler = self.handlers[slot].name.clone();
        let entry = self.state.ledger.current_mut();
        match exceeded {
            BudgetExceeded::Total { limit, corrections } => {
                if let Some(entry) = entry {
                    entry.max_errors = true;
                }
                SupervisorError::MaxCorrections { limit, corrections }
            }
            BudgetExceeded::PerJob { limit, corrections } => {
                if let Some(entry) = entry {
                    entry.max_errors_per_job = true;
                }
                SupervisorError::MaxCorrectionsPerJob {
                    limit,
                    job: job_name.to_string(),
                    corrections,
                }
            }
            BudgetExceeded::PerHandler { limit } => {
                if let Some(entry) = entry {
                    entry.max_errors_per_handler = true;
                    entry.handler = Some(handler.clone());
                }
                SupervisorError::MaxCorrectionsPerHandler { handler, limit }
            }
        }
    }

    fn validate(&mut self, ctx: &JobContext<'_>, job_name: &str) -> Result<(), SupervisorError> {
        for validator in &mut self.validators {
            let name = validator.name();
            match validator.check(ctx) {
                Ok(false) => {}
                Ok(true) => {
                    if let Some(entry) = self.state.ledger.current_mut() {
                        entry.validator = Some(name.clone());
                    }
                    return Err(SupervisorError::Validation {
                        validator: name,
                        job: job_name.to_string(),
                    });
                }
                Err(source) => {
                    return Err(SupervisorError::ValidatorFault {
                        validator: name,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_return_code(&mut self, exit: Option<ProcessExit>, job_name: &str) -> Result<(), SupervisorError> {
        match exit {
            Some(exit) if !exit.success() => {
                if self.config.terminate_on_nonzero_returncode {
                    return Err(self.return_code_fault(exit, job_name));
                }
                warn!(job = %job_name, code = ?exit.code, "job returned a non-zero return code; check outputs carefully");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn return_code_fault(&mut self, exit: ProcessExit, job_name: &str) -> SupervisorError {
        if let Some(entry) = self.state.ledger.current_mut() {
            entry.nonzero_return_code = true;
        }
        SupervisorError::ReturnCode {
            job: job_name.to_string(),
            code: exit.code,
        }
    }

    /// Advance a pipeline whose executable is launched by someone else
    /// between calls. Progress is carried from call to call by the ledger on
    /// disk; jobs must be passed in the same order every time.
    pub fn run_interrupted(&mut self, jobs: &mut [Box<dyn Job>]) -> Result<Singleshot, SupervisorError> {
        let start = Utc::now();
        let directory = self.directory.clone();
        info!(directory = %directory.display(), started = %start.to_rfc3339(), "singleshot run started");

        let ledger = Ledger::load(&directory)?.unwrap_or_default();
        let names: Vec<String> = self.handlers.iter().map(|h| h.name.clone()).collect();
        self.state = RunState::from_ledger(ledger, &names);

        let result = self.singleshot_step(jobs, &directory);

        if let Err(e) = self.state.ledger.save(&directory) {
            warn!(error = %e, "could not write the ledger");
        }
        let end = Utc::now();
        info!(
            ended = %end.to_rfc3339(),
            duration_secs = (end - start).num_seconds(),
            "singleshot run ended"
        );
        if self.config.gzipped_output && matches!(result, Ok(Singleshot::Finished)) {
            archive::gzip_dir(&directory)?;
        }

        match result {
            Err(e) if !e.raises() => {
                info!(reason = %e, "pipeline halted");
                Ok(Singleshot::Halted)
            }
            Err(e) => {
                error!(error = %e, "singleshot run aborted");
                Err(e)
            }
            ok => ok,
        }
    }

    fn singleshot_step(&mut self, jobs: &mut [Box<dyn Job>], directory: &Path) -> Result<Singleshot, SupervisorError> {
        let resets: Vec<bool> = self.handlers.iter().map(|h| h.traits.reset_per_job).collect();
        let current = self
            .state
            .ledger
            .current()
            .map(|entry| (entry.job_index, entry.corrections.len()));

        let Some((job_index, corrections)) = current else {
            let Some(job) = jobs.first_mut() else {
                return Ok(Singleshot::Finished);
            };
            let name = job.name();
            info!(job = %name, job_index = 0, "setting up first job");
            self.state.begin_job(name.clone(), 0, &resets);
            setup_job(job.as_mut(), &name, directory, 0)?;
            return Ok(Singleshot::Pending { remaining: jobs.len() });
        };

        let total = jobs.len();
        let Some(job) = jobs.get_mut(job_index) else {
            return Err(SupervisorError::Config(format!(
                "ledger refers to job {job_index} but only {total} jobs were given"
            )));
        };
        let name = job.name();
        let ctx = JobContext {
            directory,
            job_index,
            attempt: u32::try_from(corrections).unwrap_or(u32::MAX).saturating_add(1),
        };
        if corrections > 0 {
            info!(job = %name, "job was re-run after fixable errors");
        }

        if self.correct_first(Scope::All, &ctx, &name)? {
            info!(job = %name, "corrected input; job must run again");
            return Ok(Singleshot::Pending {
                remaining: total - job_index,
            });
        }
        self.validate(&ctx, &name)?;
        job.postprocess(&ctx).map_err(|source| SupervisorError::Job {
            job: name.clone(),
            phase: Phase::TerminalCheck,
            source,
        })?;

        let next = job_index + 1;
        if next == total {
            return Ok(Singleshot::Finished);
        }
        let job = &mut jobs[next];
        let name = job.name();
        info!(job = %name, job_index = next, "setting up next job");
        self.state.completed_jobs = next;
        self.state.begin_job(name.clone(), next, &resets);
        setup_job(job.as_mut(), &name, directory, next)?;
        Ok(Singleshot::Pending {
            remaining: total - next,
        })
    }
}

fn setup_job(job: &mut dyn Job, name: &str, directory: &Path, job_index: usize) -> Result<(), SupervisorError> {
    let ctx = JobContext {
        directory,
        job_index,
        attempt: 1,
    };
    job.setup(&ctx).map_err(|source| SupervisorError::Job {
        job: name.to_string(),
        phase: Phase::Setup,
        source,
    })
}

/// Host name and submitting cluster of the current execution environment.
fn execution_host_info() -> (String, String) {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let cluster = std::env::var("SGE_O_HOST")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    (host, cluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Correction;
    use crate::process::FinishedProcess;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Trace(Arc<Mutex<Vec<String>>>);

    impl Trace {
        fn push(&self, event: impl Into<String>) {
            self.0.lock().unwrap().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, event: &str) -> usize {
            self.events().iter().filter(|e| *e == event).count()
        }

        fn position(&self, event: &str) -> Option<usize> {
            self.events().iter().position(|e| e == event)
        }
    }

    /// Exits with `code` after `polls` unanswered polls, or with a signal
    /// once terminated.
    struct ScriptedProcess {
        polls: u32,
        code: i32,
        terminated: bool,
        trace: Trace,
    }

    impl ProcessHandle for ScriptedProcess {
        fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
            if self.terminated {
                return Ok(Some(ProcessExit::signaled()));
            }
            if self.polls == 0 {
                return Ok(Some(ProcessExit::with_code(self.code)));
            }
            self.polls -= 1;
            Ok(None)
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.trace.push("terminate");
            self.terminated = true;
            Ok(())
        }
    }

    struct ScriptedJob {
        name: String,
        attempts: VecDeque<(u32, i32)>,
        trace: Trace,
    }

    fn job(name: &str, trace: &Trace) -> Box<dyn Job> {
        job_with(name, &[], trace)
    }

    fn job_with(name: &str, attempts: &[(u32, i32)], trace: &Trace) -> Box<dyn Job> {
        Box::new(ScriptedJob {
            name: name.to_string(),
            attempts: attempts.iter().copied().collect(),
            trace: trace.clone(),
        })
    }

    impl Job for ScriptedJob {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn setup(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
            self.trace.push(format!("setup:{}", self.name));
            Ok(())
        }

        fn run(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<Box<dyn ProcessHandle>> {
            self.trace.push(format!("run:{}", self.name));
            let (polls, code) = self.attempts.pop_front().unwrap_or((2, 0));
            Ok(Box::new(ScriptedProcess {
                polls,
                code,
                terminated: false,
                trace: self.trace.clone(),
            }))
        }

        fn postprocess(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
            self.trace.push(format!("postprocess:{}", self.name));
            Ok(())
        }
    }

    /// Writes a file into its working directory and finishes at once.
    struct FileJob {
        seen: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl Job for FileJob {
        fn setup(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }

        fn run(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<Box<dyn ProcessHandle>> {
            std::fs::write(ctx.directory.join("OUTPUT"), "energy = -1.0")?;
            self.seen.lock().unwrap().push(ctx.directory.to_path_buf());
            Ok(Box::new(FinishedProcess::success()))
        }

        fn postprocess(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Positive `fires[job_index]` times for each job.
    struct ScriptedHandler {
        name: &'static str,
        traits: HandlerTraits,
        fires: HashMap<usize, u32>,
        fixable: bool,
        trace: Trace,
    }

    impl ScriptedHandler {
        fn new(name: &'static str, fires: &[(usize, u32)], trace: &Trace) -> Self {
            Self {
                name,
                traits: HandlerTraits::default(),
                fires: fires.iter().copied().collect(),
                fixable: true,
                trace: trace.clone(),
            }
        }

        fn with_traits(mut self, traits: HandlerTraits) -> Self {
            self.traits = traits;
            self
        }

        fn unfixable(mut self) -> Self {
            self.fixable = false;
            self
        }
    }

    impl ErrorHandler for ScriptedHandler {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn traits(&self) -> HandlerTraits {
            self.traits.clone()
        }

        fn check(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<bool> {
            match self.fires.get_mut(&ctx.job_index) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        fn correct(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<Correction> {
            self.trace.push(format!("correct:{}", self.name));
            if ctx.directory.join("error.1.tar.gz").exists() {
                self.trace.push("backup-present");
            }
            if self.fixable {
                Ok(Correction::fixed(
                    vec![format!("{} error", self.name)],
                    vec![json!({"dict": "params.json", "action": {"_inc": {"NELM": 10}}})],
                ))
            } else {
                Ok(Correction::unfixable(vec![format!("{} error", self.name)]))
            }
        }
    }

    struct FaultyHandler;

    impl ErrorHandler for FaultyHandler {
        fn check(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<bool> {
            anyhow::bail!("could not parse output")
        }

        fn correct(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<Correction> {
            unreachable!()
        }
    }

    struct ScriptedValidator {
        fail_on: Option<usize>,
    }

    impl Validator for ScriptedValidator {
        fn check(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<bool> {
            Ok(self.fail_on == Some(ctx.job_index))
        }
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            max_errors: 5,
            polling_time_step: 0.001,
            monitor_freq: 1,
            ..SupervisorConfig::default()
        }
    }

    fn correction_counts(ledger: &Ledger) -> Vec<usize> {
        ledger.entries().iter().map(|e| e.corrections.len()).collect()
    }

    fn monitor_traits() -> HandlerTraits {
        HandlerTraits::monitor()
    }

    #[tokio::test]
    async fn clean_pipeline_runs_every_job_once() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("never", &[], &trace));

        let ledger = supervisor
            .run(vec![job("a", &trace), job("b", &trace)])
            .await
            .unwrap();

        assert_eq!(correction_counts(&ledger), vec![0, 0]);
        assert_eq!(
            trace.events(),
            vec!["setup:a", "run:a", "postprocess:a", "setup:b", "run:b", "postprocess:b"]
        );
        assert_eq!(supervisor.state().completed_jobs, 2);
        assert_eq!(Ledger::load(dir.path()).unwrap().unwrap(), ledger);
    }

    #[tokio::test]
    async fn terminating_monitor_retries_the_same_job() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("monitor", &[(1, 2)], &trace).with_traits(monitor_traits()));

        let ledger = supervisor
            .run(vec![job("a", &trace), job("b", &trace), job("c", &trace)])
            .await
            .unwrap();

        assert_eq!(correction_counts(&ledger), vec![0, 2, 0]);
        assert_eq!(supervisor.state().total_errors, 2);
        assert_eq!(trace.count("setup:b"), 3);
        assert_eq!(trace.count("setup:a"), 1);

        let events = trace.events();
        for (i, event) in events.iter().enumerate() {
            if event == "correct:monitor" {
                assert_eq!(events[i - 1], "terminate");
            }
        }
        assert_eq!(trace.count("terminate"), 2);
    }

    #[tokio::test]
    async fn per_job_budget_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let config = SupervisorConfig {
            max_errors_per_job: Some(1),
            ..config()
        };
        let mut supervisor = Supervisor::new(config, dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("terminal", &[(0, 2)], &trace));

        let err = supervisor
            .run(vec![job("a", &trace), job("b", &trace)])
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::MaxCorrectionsPerJob { limit: 1, .. }));
        let ledger = supervisor.ledger();
        assert_eq!(correction_counts(ledger), vec![1]);
        assert!(ledger.entries()[0].max_errors_per_job);
        assert_eq!(trace.count("setup:b"), 0);

        let persisted = Ledger::load(dir.path()).unwrap().unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn global_budget_spans_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let config = SupervisorConfig {
            max_errors: 1,
            max_errors_per_job: Some(5),
            ..config()
        };
        let mut supervisor = Supervisor::new(config, dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("terminal", &[(0, 1), (1, 1)], &trace));

        let err = supervisor
            .run(vec![job("a", &trace), job("b", &trace)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SupervisorError::MaxCorrections {
                limit: 1,
                corrections: 1
            }
        ));
        assert!(supervisor.ledger().entries()[1].max_errors);
        assert!(supervisor.ledger().total_corrections() <= 1);
    }

    #[tokio::test]
    async fn capped_handler_is_skipped_across_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let traits = HandlerTraits {
            max_num_corrections: Some(2),
            ..HandlerTraits::default()
        };
        let mut supervisor = Supervisor::new(SupervisorConfig { max_errors: 10, ..config() }, dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("capped", &[(0, 3), (1, 1)], &trace).with_traits(traits));

        let ledger = supervisor
            .run(vec![job("a", &trace), job("b", &trace)])
            .await
            .unwrap();

        assert_eq!(correction_counts(&ledger), vec![2, 0]);
        assert_eq!(trace.count("correct:capped"), 2);
        assert_eq!(supervisor.state().handler_corrections, vec![2]);
    }

    #[tokio::test]
    async fn capped_handler_raises_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let traits = HandlerTraits {
            max_num_corrections: Some(1),
            raise_on_max: true,
            ..HandlerTraits::default()
        };
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("capped", &[(0, 2)], &trace).with_traits(traits));

        let err = supervisor.run(vec![job("a", &trace)]).await.unwrap_err();
        assert!(matches!(err, SupervisorError::MaxCorrectionsPerHandler { limit: 1, .. }));
        let entry = &supervisor.ledger().entries()[0];
        assert!(entry.max_errors_per_handler);
        assert_eq!(entry.handler.as_deref(), Some("capped"));
    }

    #[tokio::test]
    async fn failed_validation_never_corrects() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("terminal", &[], &trace))
            .with_validator(ScriptedValidator { fail_on: Some(0) });

        let err = supervisor
            .run(vec![job("a", &trace), job("b", &trace)])
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::Validation { ref validator, .. } if validator == "ScriptedValidator"));
        assert_eq!(trace.count("correct:terminal"), 0);
        assert_eq!(supervisor.state().handler_corrections, vec![0]);
        assert_eq!(
            supervisor.ledger().entries()[0].validator.as_deref(),
            Some("ScriptedValidator")
        );
    }

    #[tokio::test]
    async fn unfixable_error_raises() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("fatal", &[(0, 1)], &trace).unfixable());

        let err = supervisor.run(vec![job("a", &trace)]).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NonRecoverable { raises: true, .. }));
        assert_eq!(supervisor.ledger().entries()[0].handler.as_deref(), Some("fatal"));
        assert_eq!(supervisor.state().total_errors, 0);
    }

    #[tokio::test]
    async fn unfixable_error_from_quiet_handler_stops_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let traits = HandlerTraits {
            raises_runtime_error: false,
            ..HandlerTraits::default()
        };
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("quiet", &[(0, 1)], &trace).unfixable().with_traits(traits));

        let ledger = supervisor
            .run(vec![job("a", &trace), job("b", &trace)])
            .await
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entries()[0].handler.as_deref(), Some("quiet"));
        assert_eq!(trace.count("setup:b"), 0);
    }

    #[tokio::test]
    async fn nonzero_return_code_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut supervisor = Supervisor::new(config(), dir.path()).unwrap();

        let err = supervisor
            .run(vec![job_with("a", &[(1, 3)], &trace)])
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ReturnCode { code: Some(3), .. }));
        assert!(supervisor.ledger().entries()[0].nonzero_return_code);
    }

    #[tokio::test]
    async fn nonzero_return_code_only_warns_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let config = SupervisorConfig {
            terminate_on_nonzero_returncode: false,
            ..config()
        };
        let mut supervisor = Supervisor::new(config, dir.path()).unwrap();
        let ledger = supervisor
            .run(vec![job_with("a", &[(1, 3)], &trace)])
            .await
            .unwrap();
        assert!(!ledger.entries()[0].nonzero_return_code);
    }

    #[tokio::test]
    async fn handler_can_claim_a_failed_exit() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("crash", &[(0, 1)], &trace));

        let ledger = supervisor
            .run(vec![job_with("a", &[(1, 3), (1, 0)], &trace)])
            .await
            .unwrap();
        assert_eq!(correction_counts(&ledger), vec![1]);
        assert_eq!(trace.count("run:a"), 2);
    }

    /// Monitor that never fires, counting how often it is asked.
    struct CountingMonitor {
        trace: Trace,
    }

    impl ErrorHandler for CountingMonitor {
        fn traits(&self) -> HandlerTraits {
            HandlerTraits::monitor()
        }

        fn check(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<bool> {
            self.trace.push("check");
            Ok(false)
        }

        fn correct(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<Correction> {
            Ok(Correction::default())
        }
    }

    #[tokio::test]
    async fn monitors_run_every_monitor_freq_polls() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let config = SupervisorConfig {
            monitor_freq: 3,
            ..config()
        };
        let mut supervisor = Supervisor::new(config, dir.path())
            .unwrap()
            .with_handler(CountingMonitor { trace: trace.clone() });

        supervisor
            .run(vec![job_with("a", &[(7, 0)], &trace)])
            .await
            .unwrap();
        assert_eq!(trace.count("check"), 2);
    }

    #[tokio::test]
    async fn monitor_positive_after_failed_exit_is_a_return_code_error() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("watch", &[(0, 1)], &trace).with_traits(monitor_traits()));

        let err = supervisor
            .run(vec![job_with("a", &[(1, 3)], &trace)])
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ReturnCode { code: Some(3), .. }));
        assert_eq!(trace.count("correct:watch"), 0);
        assert_eq!(trace.count("terminate"), 0);
        assert!(supervisor.ledger().entries()[0].nonzero_return_code);
    }

    #[tokio::test]
    async fn non_terminating_monitor_keeps_the_job_running() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let traits = HandlerTraits {
            is_terminating: false,
            ..HandlerTraits::monitor()
        };
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("flag", &[(0, 1)], &trace).with_traits(traits));

        let ledger = supervisor
            .run(vec![job_with("a", &[(4, 0)], &trace)])
            .await
            .unwrap();
        assert_eq!(correction_counts(&ledger), vec![1]);
        assert_eq!(trace.count("terminate"), 0);
        assert_eq!(trace.count("run:a"), 1);
        assert!(trace.position("correct:flag") < trace.position("postprocess:a"));
    }

    #[tokio::test]
    async fn cooperative_quiet_stop_lets_the_job_finish() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let traits = HandlerTraits {
            is_terminating: false,
            raises_runtime_error: false,
            ..HandlerTraits::monitor()
        };
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("walltime", &[(0, 1)], &trace).unfixable().with_traits(traits));

        let ledger = supervisor
            .run(vec![job_with("a", &[(3, 0)], &trace), job("b", &trace)])
            .await
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entries()[0].handler.as_deref(), Some("walltime"));
        assert_eq!(trace.count("terminate"), 0);
        assert_eq!(trace.count("setup:b"), 0);
    }

    #[tokio::test]
    async fn faulty_handler_is_fatal_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(FaultyHandler);

        let err = supervisor.run(vec![job("a", &trace)]).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Handler { ref handler, .. } if handler == "FaultyHandler"));
    }

    #[tokio::test]
    async fn skip_over_errors_disables_faulty_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let config = SupervisorConfig {
            skip_over_errors: true,
            ..config()
        };
        let mut supervisor = Supervisor::new(config, dir.path())
            .unwrap()
            .with_handler(FaultyHandler)
            .with_handler(ScriptedHandler::new("terminal", &[(0, 1)], &trace));

        let ledger = supervisor
            .run(vec![job("a", &trace), job("b", &trace)])
            .await
            .unwrap();
        assert_eq!(correction_counts(&ledger), vec![1, 0]);
        assert_eq!(ledger.entries()[0].corrections[0].handler, "terminal");
    }

    #[tokio::test]
    async fn custom_terminate_function_replaces_job_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let custom = trace.clone();
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("monitor", &[(0, 1)], &trace).with_traits(monitor_traits()))
            .with_terminate_fn(move |process| {
                custom.push("custom-terminate");
                process.terminate()
            });

        supervisor.run(vec![job("a", &trace)]).await.unwrap();
        let custom_at = trace.position("custom-terminate").unwrap();
        let correct_at = trace.position("correct:monitor").unwrap();
        assert!(custom_at < correct_at);
    }

    #[tokio::test]
    async fn backup_is_taken_before_correct() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("INCAR"), "ALGO = Fast").unwrap();
        let trace = Trace::default();
        let traits = HandlerTraits {
            backup: vec!["INCAR".to_string()],
            ..HandlerTraits::default()
        };
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("terminal", &[(0, 1)], &trace).with_traits(traits));

        supervisor.run(vec![job("a", &trace)]).await.unwrap();
        assert_eq!(trace.count("backup-present"), 1);
    }

    #[tokio::test]
    async fn resume_from_checkpoint_skips_completed_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig {
            checkpoint: true,
            ..config()
        };

        let first = Trace::default();
        let mut supervisor = Supervisor::new(config.clone(), dir.path())
            .unwrap()
            .with_validator(ScriptedValidator { fail_on: Some(2) });
        let err = supervisor
            .run(vec![job("a", &first), job("b", &first), job("c", &first)])
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Validation { .. }));
        assert!(dir.path().join("custodian.chk.2.tar.gz").exists());

        let second = Trace::default();
        let mut supervisor = Supervisor::new(config, dir.path()).unwrap();
        let ledger = supervisor
            .run(vec![job("a", &second), job("b", &second), job("c", &second)])
            .await
            .unwrap();

        assert_eq!(ledger.len(), 3);
        assert_eq!(second.events(), vec!["setup:c", "run:c", "postprocess:c"]);
        assert!(archive::latest_checkpoint(dir.path()).unwrap().is_none());
    }

    #[tokio::test]
    async fn scratch_copy_is_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let config = SupervisorConfig {
            scratch_dir: Some(root.path().to_path_buf()),
            ..config()
        };
        let mut supervisor = Supervisor::new(config, dir.path()).unwrap();

        let jobs: Vec<Box<dyn Job>> = vec![Box::new(FileJob { seen: seen.clone() })];
        supervisor.run(jobs).await.unwrap();

        let seen = seen.lock().unwrap();
        let root = std::fs::canonicalize(root.path()).unwrap();
        assert!(seen[0].starts_with(&root));
        assert!(dir.path().join("OUTPUT").exists());
        assert!(dir.path().join(LEDGER_FILE).exists());
        assert!(dir.path().join(crate::scratch::SCRATCH_LINK).symlink_metadata().is_err());
    }

    #[tokio::test]
    async fn gzipped_output_compresses_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig {
            gzipped_output: true,
            ..config()
        };
        let mut supervisor = Supervisor::new(config, dir.path()).unwrap();
        let jobs: Vec<Box<dyn Job>> = vec![Box::new(FileJob {
            seen: Arc::default(),
        })];
        let ledger = supervisor.run(jobs).await.unwrap();

        assert!(dir.path().join("OUTPUT.gz").exists());
        assert!(!dir.path().join("OUTPUT").exists());
        assert_eq!(Ledger::load(dir.path()).unwrap().unwrap(), ledger);
    }

    #[tokio::test]
    async fn jobs_are_generated_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let generator = trace.clone();
        let mut made = 0;
        let jobs = std::iter::from_fn(move || {
            if made == 3 {
                return None;
            }
            generator.push(format!("make:{made}"));
            let next = job(&format!("relax{made}"), &generator);
            made += 1;
            Some(next)
        });

        let mut supervisor = Supervisor::new(config(), dir.path()).unwrap();
        let ledger = supervisor.run(jobs).await.unwrap();

        assert_eq!(ledger.len(), 3);
        assert!(trace.position("postprocess:relax0") < trace.position("make:1"));
    }

    #[test]
    fn singleshot_walks_the_pipeline_one_call_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut jobs = vec![job("a", &trace), job("b", &trace)];
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("terminal", &[(0, 1)], &trace));

        assert_eq!(
            supervisor.run_interrupted(&mut jobs).unwrap(),
            Singleshot::Pending { remaining: 2 }
        );
        assert_eq!(
            supervisor.run_interrupted(&mut jobs).unwrap(),
            Singleshot::Pending { remaining: 2 }
        );
        assert_eq!(
            supervisor.run_interrupted(&mut jobs).unwrap(),
            Singleshot::Pending { remaining: 1 }
        );
        assert_eq!(supervisor.run_interrupted(&mut jobs).unwrap(), Singleshot::Finished);

        assert_eq!(
            trace.events(),
            vec!["setup:a", "correct:terminal", "postprocess:a", "setup:b", "postprocess:b"]
        );
        let ledger = Ledger::load(dir.path()).unwrap().unwrap();
        assert_eq!(correction_counts(&ledger), vec![1, 0]);
    }

    #[test]
    fn singleshot_halts_on_quiet_unfixable_error() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let traits = HandlerTraits {
            raises_runtime_error: false,
            ..HandlerTraits::default()
        };
        let mut jobs = vec![job("a", &trace)];
        let mut supervisor = Supervisor::new(config(), dir.path())
            .unwrap()
            .with_handler(ScriptedHandler::new("quiet", &[(0, 1)], &trace).unfixable().with_traits(traits));

        supervisor.run_interrupted(&mut jobs).unwrap();
        assert_eq!(supervisor.run_interrupted(&mut jobs).unwrap(), Singleshot::Halted);
    }

    #[test]
    fn execution_host_comes_from_the_system() {
        let (host, cluster) = execution_host_info();
        let system = hostname::get().ok().and_then(|h| h.into_string().ok());
        match system {
            Some(name) if !name.trim().is_empty() => assert_eq!(host, name),
            _ => assert_eq!(host, "unknown"),
        }
        assert!(!cluster.is_empty());
    }
}
