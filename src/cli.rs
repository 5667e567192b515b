//! Interface de linha de comando do fluentctl baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (validate, compile,
//! run, capabilities, demo) e flags globais (--role, --config, --verbose).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::policy::UserRole;

/// fluentctl: valida, compila e simula jobs de manipulação de líquidos.
#[derive(Debug, Parser)]
#[command(name = "fluentctl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Papel do usuário que submete os jobs.
    #[arg(long, global = true)]
    pub role: Option<RoleArg>,

    /// Caminho alternativo para o arquivo de configuração.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Papel aceito pela CLI, mapeado para [`UserRole`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// Executa apenas passos de risco `allow`.
    Operator,
    /// Pode confirmar passos de risco `confirm`.
    Supervisor,
    /// Mesmas permissões do supervisor.
    Admin,
}

impl From<RoleArg> for UserRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Operator => UserRole::Operator,
            RoleArg::Supervisor => UserRole::Supervisor,
            RoleArg::Admin => UserRole::Admin,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Valida um job contra o registro de capacidades e o deck.
    Validate {
        /// Arquivo JSON com o job IR.
        #[arg(long)]
        job: PathBuf,

        /// Arquivo JSON com o estado do deck.
        #[arg(long)]
        deck: Option<PathBuf>,
    },

    /// Compila um job para linhas de worklist `.gwl`.
    Compile {
        /// Arquivo JSON com o job IR.
        #[arg(long)]
        job: PathBuf,

        /// Grava o worklist neste arquivo em vez da saída padrão.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Submete jobs, drena a fila e mostra o resultado do dry run.
    Run {
        /// Arquivos JSON com jobs IR, na ordem de submissão.
        #[arg(long = "job", required = true)]
        jobs: Vec<PathBuf>,

        /// Arquivo JSON com o estado inicial do deck.
        #[arg(long)]
        deck: Option<PathBuf>,

        /// Confirma jobs em espera usando este papel.
        #[arg(long)]
        confirm_as: Option<RoleArg>,
    },

    /// Mostra o registro de capacidades carregado.
    Capabilities,

    /// Executa a demonstração embutida (transferência, lavagem, descontaminação).
    Demo,
}
