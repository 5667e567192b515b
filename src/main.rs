use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use fluentctl::capabilities::CapabilityRegistry;
use fluentctl::cli::{Cli, Command};
use fluentctl::compiler::Compiler;
use fluentctl::config::FluentConfig;
use fluentctl::deck::{DeckState, LabwareState, volume_deltas};
use fluentctl::ir::{IrJob, IrStep, Operation, TransferArgs, WashArgs};
use fluentctl::orchestrator::{JobManager, RunOutcome, drain};
use fluentctl::policy::UserRole;
use fluentctl::preflight::Validator;
use fluentctl::state_machine::JobStatus;
use fluentctl::ui::{self, RunProgress};
use fluentctl::worklist;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => FluentConfig::load_from(path)?,
        None => FluentConfig::load()?,
    };
    let role = cli.role.map(UserRole::from).unwrap_or(config.default_role);

    match cli.command {
        Command::Validate { job, deck } => {
            let job = load_job(&job)?;
            let deck = load_deck(deck.as_deref())?;
            let registry = CapabilityRegistry::load(&config.capabilities_path);
            let errors = Validator::new(&registry).check(&job, &deck);
            ui::print_validation(&errors);
            if !errors.is_empty() {
                bail!("job {} has {} validation error(s)", job.job_id, errors.len());
            }
        }
        Command::Compile { job, out } => {
            let job = load_job(&job)?;
            let records = Compiler::new(&config.default_liquid_class).compile(&job)?;
            let gwl = worklist::render(&records);
            match out {
                Some(path) => {
                    std::fs::write(&path, gwl)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), records = records.len(), "worklist written");
                }
                None => print!("{gwl}"),
            }
        }
        Command::Run {
            jobs,
            deck,
            confirm_as,
        } => {
            let deck = load_deck(deck.as_deref())?;
            let registry = CapabilityRegistry::load(&config.capabilities_path);
            let manager = build_manager(&config, registry, deck.clone());
            for path in &jobs {
                manager.submit_as(load_job(path)?, role);
            }
            run_queue(&manager, &config, confirm_as.map(UserRole::from)).await?;
            report(&manager, &deck);
        }
        Command::Capabilities => {
            let registry = CapabilityRegistry::load(&config.capabilities_path);
            println!("{}", serde_json::to_string_pretty(&registry)?);
        }
        Command::Demo => {
            let deck = demo_deck()?;
            let manager = build_manager(&config, CapabilityRegistry::builtin(), deck.clone());
            manager.submit_as(demo_job()?, role);
            run_queue(&manager, &config, Some(UserRole::Supervisor)).await?;
            report(&manager, &deck);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_manager(config: &FluentConfig, registry: CapabilityRegistry, deck: DeckState) -> JobManager {
    JobManager::new(Arc::new(registry), deck)
        .with_policy(config.policy.to_policy())
        .with_compiler(Compiler::new(&config.default_liquid_class))
        .with_deck_mode(config.deck_mode)
        .with_default_role(config.default_role)
}

fn load_job(path: &Path) -> Result<IrJob> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read job file {}", path.display()))?;
    IrJob::from_json(&contents).with_context(|| format!("invalid job in {}", path.display()))
}

fn load_deck(path: Option<&Path>) -> Result<DeckState> {
    match path {
        Some(path) => DeckState::load(path),
        None => Ok(DeckState::new()),
    }
}

/// Drain the queue; when `confirm_as` is given, confirm every waiting job
/// with that role and drain again.
async fn run_queue(
    manager: &JobManager,
    config: &FluentConfig,
    confirm_as: Option<UserRole>,
) -> Result<Vec<RunOutcome>> {
    let progress = RunProgress::start("running jobs");
    let mut outcomes = drain(manager, config.workers).await;

    if let Some(role) = confirm_as {
        let waiting: Vec<_> = outcomes
            .iter()
            .filter(|o| o.status == JobStatus::WaitingConfirmation)
            .map(|o| o.job_id.clone())
            .collect();
        for job_id in &waiting {
            manager.confirm(job_id, role)?;
        }
        if !waiting.is_empty() {
            outcomes.extend(drain(manager, config.workers).await);
        }
    }

    progress.finish(&outcomes);
    Ok(outcomes)
}

fn report(manager: &JobManager, start: &DeckState) {
    for job in manager.jobs() {
        ui::heading(&format!("{} ({})", job.id(), job.status));
        if let Some(failure) = &job.failure {
            println!("  {failure}");
        }
        if !job.worklist.is_empty() {
            ui::print_worklist(&job.worklist);
        }
        if let Some(result) = &job.result_deck {
            ui::print_deltas(&volume_deltas(start, result));
        }
        if job.status.is_terminal()
            && let Ok(audit) = manager.audit(job.id())
        {
            ui::print_audit(&audit);
        }
    }

    let snapshot = manager.robot_state();
    tracing::debug!(
        queued = snapshot.queued_job_count,
        last_status = ?snapshot.current_status,
        "queue drained"
    );
}

// Transfer 50 uL S1:A1 → D1:B1, wash, decontaminate.
fn demo_job() -> Result<IrJob> {
    Ok(IrJob::new(
        "demo-001",
        vec![
            IrStep::new(
                "s1",
                Operation::Transfer(TransferArgs {
                    source_labware: "S1".into(),
                    source_well: "A1".parse()?,
                    dest_labware: "D1".into(),
                    dest_well: "B1".parse()?,
                    volume_ul: 50.0,
                    liquid_class: None,
                    tip_type: None,
                }),
            ),
            IrStep::new("s2", Operation::Wash(WashArgs { scheme: Some(1) })),
            IrStep::new("s3", Operation::Decontaminate),
        ],
    ))
}

fn demo_deck() -> Result<DeckState> {
    Ok(DeckState::new()
        .with_labware("S1", LabwareState::with_capacity(300.0).with_volume("A1".parse()?, 200.0))
        .with_labware("D1", LabwareState::with_capacity(300.0)))
}
