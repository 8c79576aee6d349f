use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::tools::linkup::{SearchDepth, SearchOutputMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Auto,
    Gemini,
    Openai,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum McpCommands {
    #[command(about = "Serve the crew_research tool over MCP stdio")]
    Serve,
}

#[derive(Debug, Subcommand)]
pub enum ServerCommands {
    #[command(about = "Run HTTP server mode for health and research endpoints")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8788)]
        port: u16,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  deep-researcher ask \"What is quantum computing?\"\n\
  deep-researcher --search-depth standard ask \"Latest Rust release highlights\"\n\
  deep-researcher --provider openai --model gpt-4o-mini chat\n\
  deep-researcher mcp serve\n\
  deep-researcher server serve --host 127.0.0.1 --port 8788\n\
  deep-researcher doctor\n\
  deep-researcher profiles show\n\
\n\
Credentials:\n\
  - LINKUP_API_KEY powers the web search stage (missing key = per-search error text).\n\
  - GEMINI_API_KEY or OPENAI_API_KEY powers the crew (missing key = configuration error).\n\
  - In chat, use /key linkup <value> or /key gemini <value> to enter keys for the session.";

#[derive(Debug, Parser)]
#[command(name = "deep-researcher")]
#[command(about = "Multi-stage research crew: web search, analysis and technical writing")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "DEEP_RESEARCHER_PROVIDER", value_enum, default_value_t = Provider::Auto)]
    pub provider: Provider,

    #[arg(long, env = "DEEP_RESEARCHER_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "DEEP_RESEARCHER_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(
        long,
        env = "DEEP_RESEARCHER_CONFIG",
        default_value = ".deep-researcher/config.toml"
    )]
    pub config_path: String,

    #[arg(long, env = "DEEP_RESEARCHER_MODEL_BASE_URL")]
    pub model_base_url: Option<String>,

    #[arg(long, env = "DEEP_RESEARCHER_SEARCH_ENDPOINT")]
    pub search_endpoint: Option<String>,

    #[arg(long, env = "DEEP_RESEARCHER_SEARCH_DEPTH", value_enum)]
    pub search_depth: Option<SearchDepth>,

    #[arg(long, env = "DEEP_RESEARCHER_SEARCH_OUTPUT", value_enum)]
    pub search_output: Option<SearchOutputMode>,

    #[arg(long, env = "DEEP_RESEARCHER_MODEL_TIMEOUT_SECS")]
    pub model_timeout_secs: Option<u64>,

    #[arg(long, env = "DEEP_RESEARCHER_SEARCH_TIMEOUT_SECS")]
    pub search_timeout_secs: Option<u64>,

    #[arg(long, env = "DEEP_RESEARCHER_MAX_STAGE_ITERATIONS")]
    pub max_stage_iterations: Option<usize>,

    #[arg(long, env = "LINKUP_API_KEY", hide_env_values = true)]
    pub linkup_api_key: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "error")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Research a query once and print the final response")]
    Ask {
        #[arg(required = true)]
        query: Vec<String>,
    },
    #[command(about = "Run interactive research chat")]
    Chat,
    #[command(about = "Validate credentials and resolved research settings")]
    Doctor,
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "MCP tool server mode")]
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
    #[command(about = "HTTP server mode")]
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Ask { .. } => "ask".to_string(),
        Commands::Chat => "chat".to_string(),
        Commands::Doctor => "doctor".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Mcp { command } => match command {
            McpCommands::Serve => "mcp.serve".to_string(),
        },
        Commands::Server { command } => match command {
            ServerCommands::Serve { .. } => "server.serve".to_string(),
        },
    }
}
