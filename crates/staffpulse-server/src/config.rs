//! Server configuration

use serde::{Deserialize, Serialize};
use staffpulse_core::PrincipalId;
use std::path::Path;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Capacity of each connection's outbound queue
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Static bearer tokens accepted at handshake
    #[serde(default)]
    pub tokens: Vec<TokenGrant>,

    /// Shared secret collaborator services present on `/internal/*`
    #[serde(default)]
    pub internal_token: Option<String>,

    /// Browser origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Broadcast `user-presence` when a user comes online or goes offline
    #[serde(default = "default_true")]
    pub presence: bool,

    /// Principals allowed into any support conversation
    #[serde(default)]
    pub support_agents: Vec<String>,
}

/// A bearer token and the principal it authenticates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub principal: String,
}

impl ServerConfig {
    /// Load configuration from an optional file, then `STAFFPULSE_*`
    /// environment variables (`__` separates nested keys)
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix("STAFFPULSE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Apply CLI overrides
    pub fn apply_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(listen) = &cli.listen {
            self.listen = listen.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
    }

    pub fn is_support_agent(&self, principal: &PrincipalId) -> bool {
        self.support_agents
            .iter()
            .any(|agent| agent == principal.as_str())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            outbound_queue: default_outbound_queue(),
            tokens: Vec::new(),
            internal_token: None,
            cors_origins: default_cors_origins(),
            presence: true,
            support_agents: Vec::new(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_outbound_queue() -> usize {
    256
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

fn default_true() -> bool {
    true
}
