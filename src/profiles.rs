use anyhow::Result;

use crate::config::{ProfilesFile, RuntimeConfig};

pub fn run_profiles_list(profiles: &ProfilesFile, cfg: &RuntimeConfig) -> Result<()> {
    let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
    if !names.iter().any(|name| name == "default") {
        names.push("default".to_string());
    }
    names.sort();

    println!("Configured profiles (active='{}'):", cfg.profile);
    for name in names {
        let marker = if name == cfg.profile { "*" } else { " " };
        let source = if profiles.profiles.contains_key(&name) {
            "configured"
        } else {
            "implicit"
        };
        println!("{marker} {name} ({source})");
    }

    Ok(())
}

pub fn profile_summary(cfg: &RuntimeConfig) -> Vec<(&'static str, String)> {
    vec![
        ("Active profile", cfg.profile.clone()),
        ("Config path", cfg.config_path.clone()),
        ("Provider", format!("{:?}", cfg.provider)),
        (
            "Model",
            cfg.model
                .clone()
                .unwrap_or_else(|| "<provider-default>".to_string()),
        ),
        (
            "Model base URL",
            cfg.model_base_url
                .clone()
                .unwrap_or_else(|| "<provider-default>".to_string()),
        ),
        ("Model timeout (secs)", cfg.model_timeout_secs.to_string()),
        ("Search endpoint", cfg.search_endpoint.clone()),
        ("Search depth", cfg.search_depth.as_str().to_string()),
        ("Search output", cfg.search_output.as_str().to_string()),
        ("Search timeout (secs)", cfg.search_timeout_secs.to_string()),
        ("Max stage iterations", cfg.max_stage_iterations.to_string()),
        ("Max query chars", cfg.max_query_chars.to_string()),
        ("Credentials", format!("{:?}", cfg.credentials)),
    ]
}

pub fn run_profiles_show(cfg: &RuntimeConfig) -> Result<()> {
    for (label, value) in profile_summary(cfg) {
        println!("{label}: {value}");
    }
    Ok(())
}
