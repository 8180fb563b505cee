use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod collab;
mod command;
mod config;
mod domain;
mod engine;
mod flow_log;
mod impact;
mod intent;
mod mcp;
mod recovery;
mod tasks;
mod validator;
mod workflow;

use cli::{Cli, Commands};
use collab::{HttpGenerator, SandboxToolkit};
use config::{EngineConfig, GenerationConfig};
use engine::ConstructorService;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let service = Arc::new(build_service(&cli)?);

    // If --mcp flag is set, run as MCP server
    if cli.mcp {
        return mcp::run_mcp_server(service).await;
    }

    match cli.command {
        Some(Commands::Send { user, message }) => {
            command::run_send(&service, &user, &message).await?;
        }
        Some(Commands::Chat { user }) => {
            command::run_chat(&service, &user).await?;
        }
        Some(Commands::Classify { message }) => {
            command::run_classify(&service, &message).await?;
        }
        Some(Commands::Impact { file, description }) => {
            command::run_impact(&service, &file, &description).await?;
        }
        Some(Commands::Checkpoints) => {
            command::run_checkpoints(&service).await?;
        }
        Some(Commands::Rollback { id }) => {
            command::run_rollback(&service, &id).await?;
        }
        None => {
            eprintln!("No command specified. Use --help for usage information.");
            eprintln!("Use 'constructor chat' to talk to the engine or 'constructor --mcp' to start the MCP server.");
        }
    }

    Ok(())
}

fn build_service(cli: &Cli) -> Result<ConstructorService> {
    let workspace_root = cli::resolve_workspace_root(cli.workspace_root.clone())?;
    let config = EngineConfig::new(&workspace_root, cli.data_dir.clone())?;

    let mut generation = GenerationConfig::from_env();
    if let Some(model) = &cli.model {
        generation.model = model.clone();
    }
    if generation.api_key.is_none() {
        info!(
            "{} is not set; requests to {} are sent without credentials",
            config::API_KEY_ENV,
            generation.base_url
        );
    }
    info!("📁 Workspace: {:?} (model {})", workspace_root, generation.model);

    let generator = HttpGenerator::new(generation)?;
    let toolkit = SandboxToolkit::new(&config.workspace_root, config.command_timeout)?;
    Ok(ConstructorService::new(
        config,
        Arc::new(generator),
        Arc::new(toolkit),
    )?)
}
