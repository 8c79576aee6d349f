use crate::config::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Search,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Search => "SEARCH",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Provider => {
                "Set GEMINI_API_KEY (or OPENAI_API_KEY with --provider openai) and check --model."
            }
            ErrorCategory::Search => {
                "Set LINKUP_API_KEY and check --search-endpoint. Retry with RUST_LOG=info for details."
            }
            ErrorCategory::Input => "Run deep-researcher --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api_key")
        || msg.contains("credential")
        || msg.contains("provider")
        || msg.contains("model")
    {
        return ErrorCategory::Provider;
    }

    if msg.contains("query")
        || msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("failed to read input")
        || msg.contains("profile")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("linkup") || msg.contains("search") {
        return ErrorCategory::Search;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error, credentials: &Credentials) -> String {
    let category = categorize_error(err);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        redact_credentials(&format!("{err:#}"), credentials),
        category.hint()
    )
}

/// Masks every configured credential value that appears verbatim in `text`.
pub fn redact_credentials(text: &str, credentials: &Credentials) -> String {
    let mut out = text.to_string();
    for secret in credentials.secrets() {
        if secret.len() >= 4 {
            out = out.replace(secret, "[REDACTED]");
        }
    }
    out
}
