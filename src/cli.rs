//! Interface de linha de comando do rondo baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, demo, status)
//! e flags globais que sobrescrevem o `rondo.toml`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::Overrides;

/// rondo: processa lotes de itens em sessões paralelas, com retentativa e retomada.
#[derive(Debug, Parser)]
#[command(name = "rondo", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./rondo.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Número de sessões paralelas.
    #[arg(long, global = true)]
    pub pool_size: Option<usize>,

    /// Número máximo de tentativas por item.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Atraso base do backoff, em milissegundos.
    #[arg(long, global = true)]
    pub base_delay_ms: Option<u64>,

    /// Caminho do ledger de conclusões (JSON Lines).
    #[arg(long, global = true)]
    pub ledger: Option<PathBuf>,

    /// Cancela a execução após este número de segundos.
    #[arg(long, global = true)]
    pub deadline_secs: Option<u64>,

    /// Formato dos logs.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Formato de saída do `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Texto legível para terminal.
    Text,
    /// Uma linha JSON por evento.
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Processa os itens do arquivo usando sessões WebDriver.
    Run {
        /// Arquivo JSON ou TOML com os itens.
        #[arg(long)]
        items: PathBuf,

        /// Apenas mostra o plano de rodadas, sem abrir sessões.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Executa a demonstração com sessões simuladas em memória.
    Demo {
        /// Quantidade de itens gerados.
        #[arg(long, default_value_t = 24)]
        items: usize,

        /// Probabilidade de um passo falhar.
        #[arg(long, default_value_t = 0.2)]
        failure_rate: f64,

        /// Probabilidade de a sessão cair durante um item.
        #[arg(long, default_value_t = 0.05)]
        crash_rate: f64,

        /// Probabilidade de o item já estar tratado.
        #[arg(long, default_value_t = 0.1)]
        handled_rate: f64,

        /// Latência simulada de cada item, em milissegundos.
        #[arg(long, default_value_t = 150)]
        latency_ms: u64,
    },

    /// Compara os itens do arquivo com o ledger e mostra o que falta.
    Status {
        /// Arquivo JSON ou TOML com os itens.
        #[arg(long)]
        items: PathBuf,
    },
}

impl Cli {
    /// Flags que sobrescrevem valores do arquivo de configuração.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            pool_size: self.pool_size,
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            ledger: self.ledger.clone(),
        }
    }
}
