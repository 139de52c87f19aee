//! Process handles and a generic command-running job.

use std::fs::File;
use std::io;
use std::process::{Child, Command, Stdio};

use anyhow::Context;
use tracing::debug;

use crate::contracts::{Job, JobContext, ProcessExit, ProcessHandle};

/// Handle over a spawned OS process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl ProcessHandle for ChildProcess {
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ProcessExit { code: status.code() }))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let pid = i32::try_from(self.child.id()).map_err(io::Error::other)?;
        kill(Pid::from_raw(pid), Signal::SIGTERM)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }
}

/// Handle for work that already finished inside `Job::run`.
#[derive(Debug, Clone, Copy)]
pub struct FinishedProcess {
    exit: ProcessExit,
}

impl FinishedProcess {
    pub fn new(exit: ProcessExit) -> Self {
        Self { exit }
    }

    pub fn success() -> Self {
        Self::new(ProcessExit::with_code(0))
    }
}

impl ProcessHandle for FinishedProcess {
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(Some(self.exit))
    }

    fn terminate(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs an arbitrary program in the working directory.
#[derive(Debug, Clone)]
pub struct CommandJob {
    name: String,
    program: String,
    args: Vec<String>,
    stdout: Option<String>,
    stderr: Option<String>,
}

impl CommandJob {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            name: program.clone(),
            program,
            args,
            stdout: None,
            stderr: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Redirect output to files inside the working directory.
    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self.stderr = Some(stderr.into());
        self
    }
}

impl Job for CommandJob {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn setup(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<()> {
        if !ctx.directory.is_dir() {
            anyhow::bail!("working directory {} does not exist", ctx.directory.display());
        }
        Ok(())
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<Box<dyn ProcessHandle>> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).current_dir(ctx.directory);
        command.stdout(redirect(ctx, self.stdout.as_deref())?);
        command.stderr(redirect(ctx, self.stderr.as_deref())?);

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;
        debug!(pid = child.id(), program = %self.program, "spawned job process");
        Ok(Box::new(ChildProcess::new(child)))
    }

    fn postprocess(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

fn redirect(ctx: &JobContext<'_>, file: Option<&str>) -> anyhow::Result<Stdio> {
    match file {
        Some(name) => {
            let path = ctx.directory.join(name);
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Stdio::from(file))
        }
        None => Ok(Stdio::inherit()),
    }
}
