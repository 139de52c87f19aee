//! Interface de linha de comando do custodian baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status)
//! e a flag global --verbose.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// custodian: supervisiona jobs longos, corrige erros e reexecuta.
#[derive(Debug, Parser)]
#[command(name = "custodian", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa um comando sob supervisão.
    Run {
        /// Arquivo de configuração TOML (padrão: custodian.toml).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Diretório de trabalho (padrão: diretório atual).
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Tempo de parede disponível, em segundos. Sem ele, usa
        /// PBS_WALLTIME ou SBATCH_TIMELIMIT quando definidos.
        #[arg(long)]
        walltime: Option<u64>,

        /// Arquivo de parada escrito quando o tempo de parede se esgota,
        /// em vez de terminar o processo.
        #[arg(long)]
        stop_file: Option<String>,

        /// Grava checkpoints e retoma a partir deles.
        #[arg(long, default_value_t = false)]
        checkpoint: bool,

        /// Máximo de correções em toda a execução.
        #[arg(long)]
        max_errors: Option<u32>,

        /// Programa e argumentos a executar.
        #[arg(last = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Mostra o ledger de correções gravado no diretório.
    Status {
        /// Diretório de trabalho (padrão: diretório atual).
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from([
            "custodian",
            "run",
            "--walltime",
            "3600",
            "--stop-file",
            "STOPCAR",
            "--max-errors",
            "5",
            "--",
            "mpirun",
            "vasp_std",
        ]);
        match cli.command {
            Command::Run {
                walltime,
                stop_file,
                max_errors,
                command,
                checkpoint,
                dir,
                ..
            } => {
                assert_eq!(walltime, Some(3600));
                assert_eq!(stop_file.as_deref(), Some("STOPCAR"));
                assert_eq!(max_errors, Some(5));
                assert_eq!(command, vec!["mpirun", "vasp_std"]);
                assert!(!checkpoint);
                assert_eq!(dir, PathBuf::from("."));
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_requires_a_command_to_run() {
        assert!(Cli::try_parse_from(["custodian", "run"]).is_err());
    }

    #[test]
    fn cli_parses_global_verbose() {
        let cli = Cli::parse_from(["custodian", "status", "--verbose", "--dir", "calc"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Status { ref dir } if dir == &PathBuf::from("calc")));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
