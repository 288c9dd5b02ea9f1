//! Process configuration, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Coordinator endpoint handed to launched workers.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Shared execution context every worker runs under.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: Vec::new(),
            workspace_root: default_workspace_root(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations_per_subtask: u32,
    #[serde(default = "default_stuck_interval")]
    pub stuck_prompt_interval: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_subtask: default_max_iterations(),
            stuck_prompt_interval: default_stuck_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// In-memory tickets when unset.
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
}

fn default_bind() -> String {
    "127.0.0.1:9842".to_string()
}

fn default_public_url() -> String {
    "ws://127.0.0.1:9842/ws".to_string()
}

fn default_worker_command() -> String {
    "orch-worker".to_string()
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".orch/workers")
}

fn default_heartbeat_timeout_secs() -> u64 {
    120
}

fn default_max_iterations() -> u32 {
    20
}

fn default_stuck_interval() -> u32 {
    5
}

pub fn parse_config(contents: &str) -> Result<OrchConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<OrchConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_path(file_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{file_name}-{}.toml",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse_config("").expect("parse empty config");
        assert_eq!(config, OrchConfig::default());
        assert_eq!(config.server.bind, "127.0.0.1:9842");
        assert_eq!(config.workers.heartbeat_timeout_secs, 120);
        assert_eq!(config.orchestrator.max_iterations_per_subtask, 20);
        assert!(config.storage.sqlite_path.is_none());
    }

    #[test]
    fn parses_full_document() {
        let config = parse_config(
            r#"
[server]
bind = "0.0.0.0:8080"
public_url = "ws://coordinator:8080/ws"

[workers]
command = "docker"
args = ["run", "--rm", "orch-worker:latest"]
workspace_root = "/var/lib/orch"
heartbeat_timeout_secs = 45

[orchestrator]
max_iterations_per_subtask = 12
stuck_prompt_interval = 3

[storage]
sqlite_path = "/var/lib/orch/tickets.sqlite"
"#,
        )
        .expect("parse config");

        assert_eq!(config.server.public_url, "ws://coordinator:8080/ws");
        assert_eq!(config.workers.args, vec!["run", "--rm", "orch-worker:latest"]);
        assert_eq!(config.workers.heartbeat_timeout_secs, 45);
        assert_eq!(config.orchestrator.stuck_prompt_interval, 3);
        assert_eq!(
            config.storage.sqlite_path,
            Some(PathBuf::from("/var/lib/orch/tickets.sqlite"))
        );
    }

    #[test]
    fn load_config_classifies_read_and_parse_errors() {
        let missing_path = unique_temp_path("orch-missing-config");
        let err = load_config(&missing_path).expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Read { path, .. } if path == missing_path));

        let invalid_path = unique_temp_path("orch-invalid-config");
        fs::write(&invalid_path, "[server\nbind = ").expect("write invalid config fixture");
        let err = load_config(&invalid_path).expect_err("invalid config should fail");
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == invalid_path));
        let _ = fs::remove_file(invalid_path);
    }
}
