pub mod agents;
pub mod chat;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod error;
pub mod markdown;
pub mod mcp;
pub mod profiles;
pub mod provider;
pub mod server;
pub mod tools;
pub mod workflow;
