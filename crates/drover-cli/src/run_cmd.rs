//! The `drover run` command: wire up backends, stop signal, and live
//! rendering, then hand control to the orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::info;

use drover_core::backend::{BackendRegistry, ClaudeCodeBackend, CopilotBackend};
use drover_core::orchestrator::{OrchestratorConfig, RunMode, RunOutcome, run_autonomous};
use drover_core::services;
use drover_store::ProjectStore;

use crate::config;
use crate::render::EventRenderer;

pub struct RunArgs {
    pub project_dir: PathBuf,
    pub backend: Option<String>,
    pub model: Option<String>,
    pub max_iterations: Option<u64>,
    pub session_timeout: u64,
    pub initializer_timeout: u64,
    pub mode: String,
    pub spec: Option<PathBuf>,
    pub services: Option<PathBuf>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config_file = config::load_config()?;
    let backend = config::resolve_backend(args.backend, &config_file);
    let model = config::resolve_model(args.model, &config_file);
    let mode: RunMode = args.mode.parse()?;

    let store = ProjectStore::new(&args.project_dir);

    // Services: explicit flag wins; otherwise a project-local
    // services.toml is picked up when present.
    let service_map = match &args.services {
        Some(path) => services::load_services(path)?,
        None => {
            let project_services = store.root().join("services.toml");
            if project_services.exists() {
                services::load_services(&project_services)?
            } else {
                Default::default()
            }
        }
    };

    let mut registry = BackendRegistry::new();
    registry.register(ClaudeCodeBackend::new());
    registry.register(CopilotBackend::new());

    let orchestrator_config = OrchestratorConfig {
        backend,
        model,
        max_iterations: args.max_iterations,
        session_timeout: Duration::from_secs(args.session_timeout),
        initializer_timeout: Duration::from_secs(args.initializer_timeout),
        mode,
        services: service_map,
        spec_source: args.spec,
    };

    // Ctrl-C requests a graceful pause: the live session is cancelled
    // (SIGTERM, grace, SIGKILL) and the run checkpoints before exiting.
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nstop requested -- finishing the current checkpoint...");
            canceller.cancel();
        }
    });

    info!(
        project = %store.root().display(),
        backend = %orchestrator_config.backend,
        "starting autonomous run"
    );

    let mut renderer = EventRenderer::new();
    let outcome = run_autonomous(
        &store,
        &registry,
        &orchestrator_config,
        cancel,
        &mut |event| renderer.render(event),
    )
    .await
    .context("autonomous run failed")?;

    renderer.finish();
    crate::render::print_progress_summary(&store);

    match outcome {
        RunOutcome::AllPassing => {
            println!("\nall features passing -- run complete");
            Ok(())
        }
        RunOutcome::BudgetExhausted => {
            println!("\niteration budget exhausted; run again to continue");
            Ok(())
        }
        RunOutcome::Stopped => {
            println!("\nrun paused; run again with the same project dir to resume");
            Ok(())
        }
        RunOutcome::RateLimited => {
            println!("\nrate limit reached; run again after it resets");
            Ok(())
        }
        RunOutcome::InitializerFailed => {
            bail!("initializer session failed to produce a feature checklist; see the session output above")
        }
    }
}
