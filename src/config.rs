//! Configuração do supervisor carregada a partir de `custodian.toml`.
//!
//! A struct [`SupervisorConfig`] contém todos os parâmetros de execução.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `CUSTODIAN_SCRATCH_DIR` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SupervisorError;
use crate::state_machine::RetryBudget;

/// Nome padrão do arquivo de configuração.
pub const CONFIG_FILE: &str = "custodian.toml";

/// Configuração de nível superior de uma execução supervisionada.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Máximo de correções em toda a execução.
    pub max_errors: u32,

    /// Máximo de correções por job; usa `max_errors` quando ausente.
    pub max_errors_per_job: Option<u32>,

    /// Intervalo, em segundos, entre verificações de término do processo.
    pub polling_time_step: f64,

    /// Número de verificações entre duas passagens dos monitores.
    pub monitor_freq: u32,

    /// Desabilita handlers que falham em vez de abortar a execução.
    pub skip_over_errors: bool,

    /// Raiz onde uma cópia temporária do diretório de trabalho é criada.
    pub scratch_dir: Option<PathBuf>,

    /// Compacta com gzip os arquivos de saída ao final.
    pub gzipped_output: bool,

    /// Grava um checkpoint após cada job concluído e retoma a partir dele.
    pub checkpoint: bool,

    /// Código de retorno diferente de zero encerra a execução.
    pub terminate_on_nonzero_returncode: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_errors: 1,
            max_errors_per_job: None,
            polling_time_step: 10.0,
            monitor_freq: 30,
            skip_over_errors: false,
            scratch_dir: None,
            gzipped_output: false,
            checkpoint: false,
            terminate_on_nonzero_returncode: true,
        }
    }
}

impl SupervisorConfig {
    /// Carrega a configuração de `path`, ou de `custodian.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self, SupervisorError> {
        let path = path.unwrap_or(Path::new(CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<SupervisorConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para o scratch.
        if let Ok(dir) = std::env::var("CUSTODIAN_SCRATCH_DIR")
            && !dir.is_empty()
        {
            config.scratch_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejeita combinações que travariam o laço de monitoramento.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.monitor_freq == 0 {
            return Err(SupervisorError::Config(
                "monitor_freq must be at least 1".to_string(),
            ));
        }
        if !self.polling_time_step.is_finite() || self.polling_time_step <= 0.0 {
            return Err(SupervisorError::Config(format!(
                "polling_time_step must be a positive number of seconds, got {}",
                self.polling_time_step
            )));
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.polling_time_step)
    }

    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.max_errors, self.max_errors_per_job)
    }
}
