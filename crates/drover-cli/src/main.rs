mod config;
mod gate_cmd;
mod render;
mod run_cmd;
mod status_cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "drover", about = "Autonomous coding-agent harness", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a drover config file with defaults
    Init {
        /// Default backend to record in the config
        #[arg(long, default_value = "claude-code")]
        backend: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the autonomous loop against a project directory
    Run {
        /// Directory the agent works in (created if missing)
        project_dir: PathBuf,
        /// Backend adapter to drive (unknown names fail at startup)
        #[arg(long)]
        backend: Option<String>,
        /// Model override, for backends that support one
        #[arg(long)]
        model: Option<String>,
        /// Maximum number of coding sessions (unlimited if omitted)
        #[arg(long)]
        max_iterations: Option<u64>,
        /// Wall-clock budget per coding session, in seconds
        #[arg(long, default_value_t = 1800)]
        session_timeout: u64,
        /// Wall-clock budget for the initializer session, in seconds
        #[arg(long, default_value_t = 5400)]
        initializer_timeout: u64,
        /// Initializer selection: auto, greenfield, or enhancement
        #[arg(long, default_value = "auto")]
        mode: String,
        /// Spec file to copy into the project when it has none
        #[arg(long)]
        spec: Option<PathBuf>,
        /// TOML file declaring auxiliary tool services
        #[arg(long)]
        services: Option<PathBuf>,
    },
    /// Show checklist progress and checkpoint state for a project
    Status {
        /// Project directory to inspect
        project_dir: PathBuf,
    },
    /// Evaluate one command against the security gate
    GateCheck {
        /// The command line to evaluate
        command: String,
        /// Working directory context for the decision
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init { backend, force } => config::init_config(&backend, force),
        Commands::Run {
            project_dir,
            backend,
            model,
            max_iterations,
            session_timeout,
            initializer_timeout,
            mode,
            spec,
            services,
        } => {
            run_cmd::run(run_cmd::RunArgs {
                project_dir,
                backend,
                model,
                max_iterations,
                session_timeout,
                initializer_timeout,
                mode,
                spec,
                services,
            })
            .await
        }
        Commands::Status { project_dir } => status_cmd::show(&project_dir),
        Commands::GateCheck { command, dir } => gate_cmd::check(&command, &dir),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Dev diagnostics go to stderr via `RUST_LOG`; the live session
/// rendering on stdout is the product output.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
