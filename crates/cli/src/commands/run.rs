//! `conclave run` — Run one orchestrated session to completion.

use anyhow::Context;
use clap::Args;
use conclave_agent::{GuardedTools, ModelChain, RuntimeServices};
use conclave_bus::MessageBus;
use conclave_core::session::{OrchestrationPattern, SessionStatus};
use conclave_core::store::{MessageStore, SessionStore};
use conclave_memory::{InMemoryStore, JsonlMessageLog};
use conclave_orchestrator::{AutoApprove, OrchestrationEngine, SessionReport};
use conclave_security::PermissionGuard;
use conclave_veto::VetoManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::console::{StdinGate, spawn_printer};
use super::{load_config, load_roles};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Role catalog (TOML); defaults to roles_file from config
    #[arg(long)]
    pub roles: Option<PathBuf>,

    /// Orchestration pattern (sequential, parallel, hierarchical, ...)
    #[arg(short, long)]
    pub pattern: OrchestrationPattern,

    /// What the session should accomplish
    #[arg(short, long)]
    pub goal: String,

    /// Session name
    #[arg(short, long, default_value = "session")]
    pub name: String,

    /// Role to spawn, in order. Repeatable; defaults to the whole catalog
    #[arg(long = "role")]
    pub role_ids: Vec<String>,

    /// Workspace agents are sandboxed to
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Approve every human checkpoint without asking
    #[arg(long)]
    pub approve: bool,

    /// Append messages and sessions to this JSONL log (default: bus.message_log)
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Project the session belongs to
    #[arg(long)]
    pub project: Option<String>,

    /// Vision statement for --project, shown to organizer roles
    #[arg(long, requires = "project")]
    pub vision: Option<String>,

    /// Also print agent status transitions
    #[arg(long)]
    pub show_status: bool,
}

pub async fn run(config_path: &Path, args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(workspace) = &args.workspace {
        config.guard.workspace = Some(workspace.clone());
    }
    config.validate()?;

    let catalog = load_roles(&config, args.roles.clone())?;
    let role_ids = if args.role_ids.is_empty() {
        catalog.ids().into_iter().map(String::from).collect()
    } else {
        args.role_ids.clone()
    };
    if role_ids.is_empty() {
        anyhow::bail!("No roles to spawn: the catalog is empty");
    }

    let memory = Arc::new(InMemoryStore::new());
    let log_path = args.log.clone().or_else(|| config.bus.message_log.clone());
    let (messages, sessions): (Arc<dyn MessageStore>, Arc<dyn SessionStore>) = match log_path {
        Some(path) => {
            let log = Arc::new(JsonlMessageLog::new(path));
            (log.clone() as Arc<dyn MessageStore>, log as Arc<dyn SessionStore>)
        }
        None => (
            memory.clone() as Arc<dyn MessageStore>,
            memory.clone() as Arc<dyn SessionStore>,
        ),
    };
    if let (Some(project), Some(vision)) = (&args.project, &args.vision) {
        memory.set_vision(project, vision.clone()).await;
    }

    let workspace = config.workspace_root();
    let bus = Arc::new(MessageBus::with_config(messages, config.bus.clone()));
    let guard = Arc::new(PermissionGuard::from_config(&workspace, &config.guard));
    let vetoes = Arc::new(VetoManager::from_config(&config.veto).with_bus(bus.clone()));
    let tools = GuardedTools::new(guard.clone(), Arc::new(conclave_tools::default_registry(&workspace)));

    let remote = conclave_providers::from_config(&config.llm).context("Failed to set up the model provider")?;
    let local = conclave_providers::local_from_config(&config.llm).context("Failed to set up the local model")?;
    let models = Arc::new(ModelChain::from_config(remote, &config.llm, local));

    let services = RuntimeServices::new(bus.clone(), tools, vetoes.clone(), models)
        .with_memory(memory.clone())
        .with_config(config.runtime.clone());

    let engine = OrchestrationEngine::new(services, catalog, sessions, config.orchestrator.clone());
    let engine = if args.approve {
        engine.with_human_gate(Arc::new(AutoApprove))
    } else {
        engine.with_human_gate(Arc::new(StdinGate::new()))
    };

    let printer = spawn_printer(bus.observe(), args.show_status);

    let session = engine
        .create_session(&args.name, &args.goal, args.pattern, role_ids, args.project.clone())
        .await;
    println!(
        "Session {} ({}) with {} agents: {}",
        session.id,
        session.pattern,
        session.agents.len(),
        session.agents.join(", ")
    );

    let report = engine.run_session(&session.id).await?;

    // Observers never close while the bus lives; let queued events print first.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    printer.abort();

    print_report(&report);
    print_diagnostics(&bus, &vetoes, &guard);

    if report.session.status != SessionStatus::Completed {
        anyhow::bail!(
            "Session {}: {}",
            report.session.status,
            report.result.error.as_deref().unwrap_or("no result")
        );
    }
    Ok(())
}

fn print_report(report: &SessionReport) {
    println!();
    println!("== {} · {} ==", report.session.name, report.session.status);
    if let Some(output) = report.result.final_output() {
        println!();
        println!("{output}");
    }
    if let Some(error) = &report.result.error {
        println!();
        println!("error: {error}");
    }
}

fn print_diagnostics(bus: &MessageBus, vetoes: &VetoManager, guard: &PermissionGuard) {
    let stats = bus.stats();
    println!();
    println!(
        "bus: {} published, {} delivered, {} dead-lettered",
        stats.published, stats.delivered, stats.dead_lettered
    );
    for letter in bus.dead_letters() {
        println!(
            "  dead letter: {} → {} ({})",
            letter.message.from_agent, letter.recipient, letter.reason
        );
    }

    let veto = vetoes.stats();
    if veto.total > 0 {
        println!(
            "vetoes: {} total, {} active, {} overridden",
            veto.total, veto.active, veto.overridden
        );
    }

    let denials = guard.audit().denial_stats();
    if denials.total > 0 {
        println!("permission denials: {}", denials.total);
        for (tool, count) in denials.by_tool.iter().take(5) {
            println!("  {tool}: {count}");
        }
    }
}
