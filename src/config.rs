use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::*;
use crate::tools::linkup::{DEFAULT_LINKUP_ENDPOINT, SearchDepth, SearchOutputMode};

/// Fully resolved settings for one process. Cloned per research run, so a
/// run never observes credential changes made while it is in flight.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub model_base_url: Option<String>,
    pub search_endpoint: String,
    pub search_depth: SearchDepth,
    pub search_output: SearchOutputMode,
    pub model_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub max_stage_iterations: usize,
    pub max_query_chars: usize,
    pub credentials: Credentials,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub linkup_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Credentials {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            linkup_api_key: non_empty(cli.linkup_api_key.as_deref()),
            gemini_api_key: non_empty(cli.gemini_api_key.as_deref()),
            openai_api_key: non_empty(cli.openai_api_key.as_deref()),
        }
    }

    pub fn set(&mut self, target: CredentialTarget, value: &str) {
        let value = non_empty(Some(value));
        match target {
            CredentialTarget::Linkup => self.linkup_api_key = value,
            CredentialTarget::Gemini => self.gemini_api_key = value,
            CredentialTarget::Openai => self.openai_api_key = value,
        }
    }

    pub fn is_set(&self, target: CredentialTarget) -> bool {
        match target {
            CredentialTarget::Linkup => self.linkup_api_key.is_some(),
            CredentialTarget::Gemini => self.gemini_api_key.is_some(),
            CredentialTarget::Openai => self.openai_api_key.is_some(),
        }
    }

    pub fn secrets(&self) -> impl Iterator<Item = &str> {
        [
            self.linkup_api_key.as_deref(),
            self.gemini_api_key.as_deref(),
            self.openai_api_key.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |value: &Option<String>| if value.is_some() { "<set>" } else { "<missing>" };
        f.debug_struct("Credentials")
            .field("linkup_api_key", &mask(&self.linkup_api_key))
            .field("gemini_api_key", &mask(&self.gemini_api_key))
            .field("openai_api_key", &mask(&self.openai_api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialTarget {
    Linkup,
    Gemini,
    Openai,
}

impl CredentialTarget {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linkup" => Some(Self::Linkup),
            "gemini" | "google" => Some(Self::Gemini),
            "openai" => Some(Self::Openai),
            _ => None,
        }
    }

    pub fn env_key(self) -> &'static str {
        match self {
            Self::Linkup => "LINKUP_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Openai => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub model_base_url: Option<String>,
    pub search_endpoint: Option<String>,
    pub search_depth: Option<SearchDepth>,
    pub search_output: Option<SearchOutputMode>,
    pub model_timeout_secs: Option<u64>,
    pub search_timeout_secs: Option<u64>,
    pub max_stage_iterations: Option<usize>,
    pub max_query_chars: Option<usize>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    toml::from_str::<ProfilesFile>(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check provider/search values and field names.",
            path.display()
        )
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let provider = if cli.provider != Provider::Auto {
        cli.provider
    } else {
        profile.provider.unwrap_or(Provider::Auto)
    };

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        provider,
        model: non_empty(cli.model.as_deref()).or(profile.model),
        model_base_url: non_empty(cli.model_base_url.as_deref()).or(profile.model_base_url),
        search_endpoint: non_empty(cli.search_endpoint.as_deref())
            .or(profile.search_endpoint)
            .unwrap_or_else(|| DEFAULT_LINKUP_ENDPOINT.to_string()),
        search_depth: cli
            .search_depth
            .or(profile.search_depth)
            .unwrap_or(SearchDepth::Deep),
        search_output: cli
            .search_output
            .or(profile.search_output)
            .unwrap_or(SearchOutputMode::SearchResults),
        model_timeout_secs: cli
            .model_timeout_secs
            .or(profile.model_timeout_secs)
            .unwrap_or(120)
            .max(1),
        search_timeout_secs: cli
            .search_timeout_secs
            .or(profile.search_timeout_secs)
            .unwrap_or(60)
            .max(1),
        max_stage_iterations: cli
            .max_stage_iterations
            .or(profile.max_stage_iterations)
            .unwrap_or(6)
            .max(1),
        max_query_chars: profile.max_query_chars.unwrap_or(32_000),
        credentials: Credentials::from_cli(cli),
    })
}
