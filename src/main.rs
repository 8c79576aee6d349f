use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use deep_researcher::agents::ResearchCrew;
use deep_researcher::chat::run_chat;
use deep_researcher::cli::{
    Cli, Commands, McpCommands, ProfileCommands, ServerCommands, command_label,
};
use deep_researcher::config::{Credentials, load_profiles, resolve_runtime_config};
use deep_researcher::doctor::run_doctor;
use deep_researcher::error::{categorize_error, format_cli_error};
use deep_researcher::markdown::{RenderState, render_markdown};
use deep_researcher::mcp::serve_stdio;
use deep_researcher::profiles::{run_profiles_list, run_profiles_show};
use deep_researcher::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let credentials = Credentials::from_cli(&cli);
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err, &credentials));
        tracing::error!(category = %categorize_error(&err).code(), "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;
    let command = cli.command.unwrap_or(Commands::Chat);
    tracing::info!(command = %command_label(&command), profile = %cfg.profile, "running command");

    match command {
        Commands::Ask { query } => {
            let query = query.join(" ");
            let crew = ResearchCrew::from_config(&cfg)?;
            let outcome = crew.kickoff(&query).await?;
            let mut state = RenderState::terminal();
            render_markdown(&outcome.output, std::io::stdout().lock(), &mut state)?;
        }
        Commands::Chat => run_chat(cfg).await?,
        Commands::Doctor => run_doctor(&cfg)?,
        Commands::Profiles { command } => match command {
            ProfileCommands::List => run_profiles_list(&profiles, &cfg)?,
            ProfileCommands::Show => run_profiles_show(&cfg)?,
        },
        Commands::Mcp { command } => match command {
            McpCommands::Serve => serve_stdio(cfg).await?,
        },
        Commands::Server { command } => match command {
            ServerCommands::Serve { host, port } => run_server(cfg, host, port).await?,
        },
    }

    Ok(())
}

/// Logs go to stderr; stdout carries answers and, in `mcp serve`, the protocol.
fn init_tracing(log_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("error"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
