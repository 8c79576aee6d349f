use anyhow::Result;

use crate::cli::Provider;
use crate::config::{CredentialTarget, RuntimeConfig};
use crate::provider::{DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_MODEL, detect_provider, resolve_model};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorReport {
    pub lines: Vec<String>,
    /// False when the crew could not be built with this configuration.
    pub ready: bool,
}

/// Checks credentials and resolved settings without calling any remote API.
/// Credential values are never included, only their presence.
pub fn diagnose(cfg: &RuntimeConfig) -> DoctorReport {
    let mut lines = vec![format!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    )];

    lines.push("Credential check:".to_string());
    for target in [
        CredentialTarget::Linkup,
        CredentialTarget::Gemini,
        CredentialTarget::Openai,
    ] {
        let status = if cfg.credentials.is_set(target) {
            "set"
        } else {
            "missing"
        };
        lines.push(format!("- {}: {status}", target.env_key()));
    }

    match (cfg.provider, detect_provider(cfg)) {
        (Provider::Auto, Some(provider)) => {
            lines.push(format!("Auto provider resolution: {:?}", provider))
        }
        (Provider::Auto, None) => {
            lines.push("Auto provider resolution: none".to_string());
            lines.push("Tip: export GEMINI_API_KEY or OPENAI_API_KEY".to_string());
        }
        (provider, _) => lines.push(format!("Provider: {:?} (explicit)", provider)),
    }

    let ready = match resolve_model(cfg) {
        Ok((_, provider, model_name)) => {
            let default_model = match provider {
                Provider::Gemini => DEFAULT_GEMINI_MODEL,
                _ => DEFAULT_OPENAI_MODEL,
            };
            lines.push(format!(
                "Model: {} ({})",
                model_name,
                if model_name == default_model {
                    "provider default"
                } else {
                    "override"
                }
            ));
            true
        }
        Err(err) => {
            lines.push(format!("Model: unavailable ({err:#})"));
            false
        }
    };

    lines.push(format!(
        "Search: endpoint={} depth={} output={} timeout_secs={}",
        cfg.search_endpoint,
        cfg.search_depth.as_str(),
        cfg.search_output.as_str(),
        cfg.search_timeout_secs
    ));
    if !cfg.credentials.is_set(CredentialTarget::Linkup) {
        lines.push(
            "Warning: LINKUP_API_KEY is missing; the search stage will only see error text."
                .to_string(),
        );
    }
    lines.push(format!(
        "Crew: max_stage_iterations={} model_timeout_secs={} max_query_chars={}",
        cfg.max_stage_iterations, cfg.model_timeout_secs, cfg.max_query_chars
    ));

    DoctorReport { lines, ready }
}

pub fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    let report = diagnose(cfg);
    for line in &report.lines {
        println!("{line}");
    }
    if report.ready {
        println!("Doctor: ready");
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "doctor found no usable language-model provider credential"
        ))
    }
}
