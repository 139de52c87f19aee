mod cli;
mod ui;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use custodian::config::CONFIG_FILE;
use custodian::handlers::WalltimeHandler;
use custodian::process::CommandJob;
use custodian::{Job, Ledger, Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run {
            config,
            dir,
            walltime,
            stop_file,
            checkpoint,
            max_errors,
            command,
        } => {
            let config = config.unwrap_or_else(|| dir.join(CONFIG_FILE));
            let mut settings =
                SupervisorConfig::load(Some(&config)).context("failed to load configuration")?;
            settings.checkpoint |= checkpoint;
            if let Some(max_errors) = max_errors {
                settings.max_errors = max_errors;
            }
            run(settings, dir, walltime, stop_file, command).await
        }
        Command::Status { dir } => status(&dir),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(
    settings: SupervisorConfig,
    dir: PathBuf,
    walltime: Option<u64>,
    stop_file: Option<String>,
    command: Vec<String>,
) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        anyhow::bail!("no command given");
    };
    let display = command.join(" ");

    let mut supervisor = Supervisor::new(settings, &dir)?;
    let walltime = match walltime {
        Some(secs) => Some(WalltimeHandler::new(Duration::from_secs(secs))),
        None => WalltimeHandler::from_env(),
    };
    if let Some(mut handler) = walltime {
        if let Some(name) = stop_file {
            handler = handler.with_stop_file(name, "LSTOP = .TRUE.\n");
        }
        supervisor.add_handler(Box::new(handler));
    }

    let job: Box<dyn Job> = Box::new(
        CommandJob::new(program.clone(), args.to_vec())
            .with_name(display.clone())
            .with_output("custodian.out", "custodian.err"),
    );

    let progress = ui::RunProgress::start(&display);
    let result = supervisor.run(vec![job]).await;
    progress.complete(&result);
    ui::print_ledger(supervisor.ledger());

    result.map(|_| ()).map_err(Into::into)
}

fn status(dir: &Path) -> Result<()> {
    match Ledger::load(dir)? {
        Some(ledger) => ui::print_ledger(&ledger),
        None => println!("No ledger found in {}", dir.display()),
    }
    Ok(())
}
