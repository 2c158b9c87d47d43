//! Process configuration, loaded from CLI flags or environment variables
//! via `clap`'s `env` feature (`spec.md` §10 ambient stack).

use std::collections::HashMap;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "antwort", about = "Responses API gateway over chat-completion backends")]
pub struct Config {
    /// Address the HTTP server binds to.
    #[arg(long, env = "ANTWORT_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Base URL of the upstream chat-completion backend.
    #[arg(long, env = "ANTWORT_BACKEND_URL", default_value = "http://localhost:11434/v1")]
    pub backend_url: String,

    /// Bearer token sent to the backend, if any.
    #[arg(long, env = "ANTWORT_BACKEND_API_KEY")]
    pub backend_api_key: Option<String>,

    /// Base URL of an MCP tool-execution server. Omit to run with no
    /// tool executors registered (unclaimed calls become `requires_action`).
    #[arg(long, env = "ANTWORT_MCP_URL")]
    pub mcp_url: Option<String>,

    /// Comma-separated `name` entries the MCP executor claims.
    #[arg(long, env = "ANTWORT_MCP_TOOLS", value_delimiter = ',')]
    pub mcp_tools: Vec<String>,

    /// Upper bound on backend/tool rounds per response
    /// (`spec.md` §9 open question "default max-rounds cap", see DESIGN.md).
    #[arg(long, env = "ANTWORT_MAX_ROUNDS", default_value_t = 16)]
    pub max_rounds: u32,

    /// `name=value` model aliases, repeatable, e.g.
    /// `--model-remap fast=llama3.1:8b`.
    #[arg(long = "model-remap", env = "ANTWORT_MODEL_REMAP", value_delimiter = ',')]
    pub model_remap_entries: Vec<String>,

    /// Port the `/metrics` Prometheus exporter listens on.
    #[arg(long, env = "ANTWORT_METRICS_PORT", default_value_t = 9464)]
    pub metrics_port: u16,
}

impl Config {
    pub fn model_remap(&self) -> HashMap<String, String> {
        self.model_remap_entries
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
