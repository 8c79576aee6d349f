use std::io;

use anyhow::{Context, Result};
use clap::ValueEnum;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::agents::run_research;
use crate::config::{CredentialTarget, RuntimeConfig};
use crate::markdown::{RenderState, render_markdown};
use crate::provider::detect_provider;
use crate::tools::linkup::SearchDepth;

pub const LINKUP_KEY_PROMPT: &str = "Please enter your Linkup API Key (use /key linkup <value>).";
pub const RESEARCHING_NOTICE: &str = "Researching... This may take a moment...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Exit,
    Help,
    Status,
    Clear,
    History,
    Key {
        target: CredentialTarget,
        value: String,
    },
    Depth(SearchDepth),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChatCommand {
    NotACommand,
    Command(ChatCommand),
    MissingArgument { usage: &'static str },
    InvalidArgument(String),
    UnknownCommand(String),
}

pub fn parse_chat_command(input: &str) -> ParsedChatCommand {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("/exit") {
        return ParsedChatCommand::Command(ChatCommand::Exit);
    }

    if !trimmed.starts_with('/') {
        return ParsedChatCommand::NotACommand;
    }

    let slashless = trimmed.trim_start_matches('/');
    if slashless.is_empty() {
        return ParsedChatCommand::UnknownCommand("/".to_string());
    }

    let mut parts = slashless.splitn(2, char::is_whitespace);
    let command = parts
        .next()
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match command.as_str() {
        "exit" | "quit" => ParsedChatCommand::Command(ChatCommand::Exit),
        "help" => ParsedChatCommand::Command(ChatCommand::Help),
        "status" => ParsedChatCommand::Command(ChatCommand::Status),
        "clear" => ParsedChatCommand::Command(ChatCommand::Clear),
        "history" => ParsedChatCommand::Command(ChatCommand::History),
        "key" => parse_key_command(arg),
        "depth" => {
            if arg.is_empty() {
                return ParsedChatCommand::MissingArgument {
                    usage: "/depth <standard|deep>",
                };
            }
            match SearchDepth::from_str(arg, true) {
                Ok(depth) => ParsedChatCommand::Command(ChatCommand::Depth(depth)),
                Err(_) => ParsedChatCommand::InvalidArgument(format!(
                    "unknown search depth '{arg}'. Use standard or deep."
                )),
            }
        }
        other => ParsedChatCommand::UnknownCommand(format!("/{other}")),
    }
}

fn parse_key_command(arg: &str) -> ParsedChatCommand {
    const USAGE: &str = "/key <linkup|gemini|openai> <value>";

    let mut parts = arg.splitn(2, char::is_whitespace);
    let target = parts.next().unwrap_or_default().trim();
    let value = parts.next().map(str::trim).unwrap_or_default();
    if target.is_empty() || value.is_empty() {
        return ParsedChatCommand::MissingArgument { usage: USAGE };
    }

    match CredentialTarget::parse(target) {
        Some(target) => ParsedChatCommand::Command(ChatCommand::Key {
            target,
            value: value.to_string(),
        }),
        None => ParsedChatCommand::InvalidArgument(format!(
            "unknown credential '{target}'. Usage: {USAGE}"
        )),
    }
}

pub fn chat_help() -> &'static str {
    "Chat commands:\n\
     - /help: show command quick reference\n\
     - /status: show profile, provider, search settings and credential presence\n\
     - /key <linkup|gemini|openai> <value>: set an API key for this session\n\
     - /depth <standard|deep>: set the default search depth\n\
     - /history: show this session's questions and answers\n\
     - /clear: forget this session's history\n\
     - /exit: end interactive chat\n\
     Anything else is researched as a question."
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Session history kept in memory for `/history`; never persisted.
#[derive(Debug, Clone, Default)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
}

impl ChatTranscript {
    pub fn push(&mut self, role: ChatRole, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn render(&self) -> String {
        if self.is_empty() {
            return "No messages yet.".to_string();
        }
        self.messages()
            .iter()
            .map(|message| {
                let label = match message.role {
                    ChatRole::User => "**You**",
                    ChatRole::Assistant => "**Researcher**",
                };
                format!("{label}\n\n{}", message.content)
            })
            .collect::<Vec<String>>()
            .join("\n\n---\n\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    Exit,
    /// Markdown to show the user.
    Message(String),
}

pub fn status_report(cfg: &RuntimeConfig) -> String {
    let presence = |target| {
        if cfg.credentials.is_set(target) {
            "set"
        } else {
            "missing"
        }
    };
    let provider = match detect_provider(cfg) {
        Some(detected) if matches!(cfg.provider, crate::cli::Provider::Auto) => {
            format!("auto ({detected:?})").to_ascii_lowercase()
        }
        _ => format!("{:?}", cfg.provider).to_ascii_lowercase(),
    };
    format!(
        "- profile: {}\n- provider: {}\n- model: {}\n- search depth: {}\n- search output: {}\n\
         - LINKUP_API_KEY: {}\n- GEMINI_API_KEY: {}\n- OPENAI_API_KEY: {}",
        cfg.profile,
        provider,
        cfg.model.as_deref().unwrap_or("<provider default>"),
        cfg.search_depth.as_str(),
        cfg.search_output.as_str(),
        presence(CredentialTarget::Linkup),
        presence(CredentialTarget::Gemini),
        presence(CredentialTarget::Openai),
    )
}

pub fn apply_chat_command(
    cfg: &mut RuntimeConfig,
    transcript: &mut ChatTranscript,
    command: ChatCommand,
) -> ChatOutcome {
    match command {
        ChatCommand::Exit => ChatOutcome::Exit,
        ChatCommand::Help => ChatOutcome::Message(chat_help().to_string()),
        ChatCommand::Status => ChatOutcome::Message(status_report(cfg)),
        ChatCommand::Clear => {
            transcript.clear();
            ChatOutcome::Message("History cleared.".to_string())
        }
        ChatCommand::History => ChatOutcome::Message(transcript.render()),
        ChatCommand::Key { target, value } => {
            cfg.credentials.set(target, &value);
            tracing::info!(credential = target.env_key(), "credential updated from chat");
            ChatOutcome::Message(format!("{} set for this session.", target.env_key()))
        }
        ChatCommand::Depth(depth) => {
            cfg.search_depth = depth;
            ChatOutcome::Message(format!("Search depth set to {}.", depth.as_str()))
        }
    }
}

/// Reply given instead of running the crew, if any.
pub fn precheck_query(cfg: &RuntimeConfig) -> Option<&'static str> {
    if cfg.credentials.is_set(CredentialTarget::Linkup) {
        None
    } else {
        Some(LINKUP_KEY_PROMPT)
    }
}

fn print_markdown(text: &str) -> Result<()> {
    let mut state = RenderState::terminal();
    render_markdown(text, io::stdout().lock(), &mut state).context("failed to write to stdout")
}

pub async fn run_chat(mut cfg: RuntimeConfig) -> Result<()> {
    let mut editor = DefaultEditor::new().context("failed to initialize line editor")?;
    let mut transcript = ChatTranscript::default();

    tracing::info!(profile = %cfg.profile, "chat started");
    println!("Deep researcher ready. Ask a question, or type /help for commands.");
    if let Some(reply) = precheck_query(&cfg) {
        println!("{reply}");
    }

    loop {
        let line = match editor.readline("research> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => return Err(err).context("failed to read input from terminal"),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let parsed = parse_chat_command(input);
        // Keys stay out of the editor history.
        if !matches!(parsed, ParsedChatCommand::Command(ChatCommand::Key { .. })) {
            let _ = editor.add_history_entry(input);
        }

        match parsed {
            ParsedChatCommand::NotACommand => {}
            ParsedChatCommand::MissingArgument { usage } => {
                println!("Usage: {usage}");
                continue;
            }
            ParsedChatCommand::InvalidArgument(message) => {
                println!("{message}");
                continue;
            }
            ParsedChatCommand::UnknownCommand(command) => {
                println!("Unknown command {command}. Type /help for commands.");
                continue;
            }
            ParsedChatCommand::Command(command) => {
                match apply_chat_command(&mut cfg, &mut transcript, command) {
                    ChatOutcome::Exit => break,
                    ChatOutcome::Message(message) => print_markdown(&message)?,
                }
                continue;
            }
        }

        transcript.push(ChatRole::User, input);
        if let Some(reply) = precheck_query(&cfg) {
            println!("{reply}");
            transcript.push(ChatRole::Assistant, reply);
            continue;
        }

        println!("{RESEARCHING_NOTICE}");
        // The run works on its own snapshot; later /key or /depth changes
        // apply to the next question.
        let snapshot = cfg.clone();
        let answer = run_research(&snapshot, input).await;
        print_markdown(&answer)?;
        transcript.push(ChatRole::Assistant, answer);
    }

    tracing::info!(messages = transcript.len(), "chat ended");
    Ok(())
}
