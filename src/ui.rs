//! Interface de terminal do fluentctl: spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente a
//! drenagem da fila no terminal.

use std::collections::BTreeMap;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::ValidationError;
use crate::orchestrator::RunOutcome;
use crate::state_machine::{AuditRecord, JobStatus};
use crate::worklist::WorklistRecord;

/// Indicador visual de progresso para a execução de jobs no terminal.
///
/// Exibe um spinner animado durante o processamento e mensagens
/// coloridas para conclusão (verde), aborto (vermelho) e espera (amarelo).
pub struct RunProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
}

impl RunProgress {
    /// Inicia o spinner com a mensagem dada.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    /// Finaliza o spinner e lista o resultado de cada job.
    pub fn finish(&self, outcomes: &[RunOutcome]) {
        self.pb.finish_and_clear();
        for outcome in outcomes {
            println!(
                "  {} {} {}",
                status_style(outcome.status).apply_to(status_icon(outcome.status)),
                outcome.job_id,
                outcome.status
            );
        }
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Completed => Style::new().green().bold(),
        JobStatus::Aborted => Style::new().red().bold(),
        _ => Style::new().yellow(),
    }
}

fn status_icon(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Completed => "✓",
        JobStatus::Aborted => "✗",
        _ => "…",
    }
}

/// Imprime os erros de validação, ou uma confirmação se não houver nenhum.
pub fn print_validation(errors: &[ValidationError]) {
    if errors.is_empty() {
        println!("  {} job is valid", Style::new().green().bold().apply_to("✓"));
        return;
    }
    let red = Style::new().red();
    for error in errors {
        println!("  {} {error}", red.apply_to("✗"));
    }
}

/// Imprime as linhas do worklist `.gwl`.
pub fn print_worklist(records: &[WorklistRecord]) {
    let dim = Style::new().dim();
    let liquid = Style::new().cyan();
    for (i, record) in records.iter().enumerate() {
        let line = if record.moves_liquid() {
            liquid.apply_to(record.to_string())
        } else {
            dim.apply_to(record.to_string())
        };
        println!("  {} {line}", dim.apply_to(format!("{:>3}", i + 1)));
    }
}

/// Imprime a variação de volume por labware.
pub fn print_deltas(deltas: &BTreeMap<String, f64>) {
    let cyan = Style::new().cyan();
    for (labware, delta) in deltas {
        println!("  {} {delta:+.2} uL", cyan.apply_to(format!("{labware:<8}")));
    }
}

/// Imprime o registro de auditoria formatado em JSON com estilo colorido.
pub fn print_audit(record: &AuditRecord) {
    println!();
    println!(
        "{}",
        status_style(record.status).apply_to("─── Audit Record ───")
    );
    println!(
        "{}",
        serde_json::to_string_pretty(record).unwrap_or_default()
    );
}

/// Imprime um título de seção.
pub fn heading(title: &str) {
    println!();
    println!("{}", Style::new().bold().apply_to(title));
}
