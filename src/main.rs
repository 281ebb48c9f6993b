use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fixbuild::config::Config;
use fixbuild::pipeline::Pipeline;
use fixbuild::request::FixRequest;
use fixbuild::runner::ProcessRunner;
use fixbuild::server::{self, AppState, FixBuildResponse};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "fixbuild",
    about = "Repairs failing CI builds and pushes the fix back to the branch",
    version
)]
struct Cli {
    /// Config file (defaults to the per-user config dir, if present)
    #[arg(long, global = true, env = "FIXBUILD_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook server (default)
    Serve {
        /// Address to listen on, overriding the config file
        #[arg(long, env = "FIXBUILD_LISTEN")]
        listen: Option<String>,
    },
    /// Run one fix from a JSON payload file and print the response
    Run { payload: PathBuf },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn build_pipeline(config: Config) -> Arc<Pipeline> {
    let runner = ProcessRunner::new().with_drain_grace(config.runner.output_drain_grace());
    Arc::new(Pipeline::new(Arc::new(config), Arc::new(runner)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve { listen: None }) {
        Commands::Serve { listen } => serve(config, listen).await,
        Commands::Run { payload } => run_once(config, &payload).await,
    }
}

async fn serve(mut config: Config, listen: Option<String>) -> Result<()> {
    if let Some(listen) = listen {
        config.server.listen = listen;
    }
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;
    let max_concurrent = config.server.max_concurrent_fixes;
    let state = AppState::new(build_pipeline(config), max_concurrent);
    server::serve(listener, state).await
}

async fn run_once(config: Config, payload: &Path) -> Result<()> {
    let raw = std::fs::read(payload)
        .with_context(|| format!("Failed to read payload {}", payload.display()))?;
    let request: FixRequest = serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse payload {}", payload.display()))?;

    let outcome = build_pipeline(config).run(&request).await;
    let (_, response) = FixBuildResponse::from_outcome(&outcome);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
