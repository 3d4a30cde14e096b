//! Launch configuration for peer processes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

fn default_timeout() -> u64 {
    30_000
}

/// Configuration for a single peer process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Registry key for this peer; unique within a manager.
    pub name: String,
    /// Executable to run (e.g. "npx", "python3").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides, merged over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the process; inherited when absent.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Send deadline in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl PeerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            timeout_ms: default_timeout(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// Top-level configuration: the set of peers to launch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeersConfig {
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}
