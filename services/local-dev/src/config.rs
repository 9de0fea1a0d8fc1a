//! Configuration types for the local development orchestrator

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_apps")]
    pub apps: Vec<AppConfig>,
    /// How long a stopping service may take to exit before it is killed
    #[serde(default = "default_stop_timeout_seconds")]
    pub stop_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apps: default_apps(),
            stop_timeout_seconds: default_stop_timeout_seconds(),
        }
    }
}

/// A sub-application managed by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Display name used in log output and error reports
    pub name: String,
    /// Working directory for both the install and the run command
    pub dir: PathBuf,
    /// Path, relative to `dir`, whose presence means dependencies are installed
    pub marker: PathBuf,
    pub install: CommandSpec,
    pub run: CommandSpec,
}

impl AppConfig {
    /// Absolute (or cwd-relative) location of the bootstrap marker
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(&self.marker)
    }
}

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn default_apps() -> Vec<AppConfig> {
    vec![
        AppConfig {
            name: "Placer Dashboard".to_string(),
            dir: PathBuf::from("./placer-dashboard"),
            marker: PathBuf::from("node_modules"),
            install: CommandSpec::new("deno", &["install", "--allow-scripts"]),
            run: CommandSpec::new("deno", &["task", "dev"]),
        },
        AppConfig {
            name: "Placer Service".to_string(),
            dir: PathBuf::from("./placer-service"),
            marker: PathBuf::from("poetry.lock"),
            install: CommandSpec::new("poetry", &["install"]),
            run: CommandSpec::new("poetry", &["run", "python3", "main.py"]),
        },
    ]
}

fn default_stop_timeout_seconds() -> u64 {
    10
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::LocalDevError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    if config.apps.is_empty() {
        return Err(crate::LocalDevError::Config(
            "At least one app must be configured".to_string(),
        ));
    }
    Ok(config)
}
