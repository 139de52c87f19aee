//! Interface de terminal do custodian: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner enquanto o job roda e `console` para
//! estilizar o resumo do ledger.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use custodian::{Ledger, SupervisorError};

/// Indicador visual de uma execução supervisionada.
pub struct RunProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    /// Inicia o spinner com o comando supervisionado.
    pub fn start(command: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Supervising: {command}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e exibe o resultado da execução.
    pub fn complete(&self, result: &Result<Ledger, SupervisorError>) {
        self.pb.finish_and_clear();
        match result {
            Ok(ledger) if ledger.entries().iter().any(|e| e.handler.is_some()) => {
                println!(
                    "  {} Run stopped by a handler that does not raise",
                    self.yellow.apply_to("■")
                );
            }
            Ok(_) => println!("  {} Run completed successfully", self.green.apply_to("✓")),
            Err(e) => println!("  {} Run failed: {e}", self.red.apply_to("✗")),
        }
    }
}

/// Imprime o ledger: uma linha por job e uma por correção.
pub fn print_ledger(ledger: &Ledger) {
    let header = Style::new().bold();
    let dim = Style::new().dim();
    let red = Style::new().red();
    let yellow = Style::new().yellow();

    println!();
    println!("{}", header.apply_to("─── Correction Ledger ───"));
    if ledger.is_empty() {
        println!("  {}", dim.apply_to("(no jobs recorded)"));
        return;
    }
    for entry in ledger.entries() {
        println!(
            "  #{} {} {}",
            entry.job_index,
            header.apply_to(&entry.job),
            dim.apply_to(format!("({} corrections)", entry.corrections.len()))
        );
        for record in &entry.corrections {
            let marker = if record.is_actionable() {
                yellow.apply_to("↻")
            } else {
                red.apply_to("✗")
            };
            println!("      {marker} {}: {}", record.handler, record.errors.join("; "));
        }
        let flags = [
            (entry.max_errors, "max errors reached"),
            (entry.max_errors_per_job, "max errors per job reached"),
            (entry.max_errors_per_handler, "max errors per handler reached"),
            (entry.nonzero_return_code, "non-zero return code"),
        ];
        for (_, label) in flags.iter().filter(|(set, _)| *set) {
            println!("      {}", red.apply_to(label));
        }
        if let Some(validator) = &entry.validator {
            println!("      {}", red.apply_to(format!("validation failed: {validator}")));
        }
    }
    println!(
        "  {}",
        dim.apply_to(format!("{} corrections in total", ledger.total_corrections()))
    );
}
