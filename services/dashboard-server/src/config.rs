//! Configuration types for the dashboard server

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub ssr: SsrConfig,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Pre-built client assets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Directory the request path is resolved against
    #[serde(default = "default_assets_root")]
    pub root: PathBuf,
    /// Request path prefix of fingerprinted bundles that never change
    #[serde(default = "default_immutable_prefix")]
    pub immutable_prefix: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: default_assets_root(),
            immutable_prefix: default_immutable_prefix(),
        }
    }
}

/// Server-rendering runtime that handles everything that is not a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsrConfig {
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Request bodies larger than this are rejected before forwarding
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

impl Default for SsrConfig {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
            max_request_body_bytes: default_max_request_body_bytes(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8000
}

fn default_assets_root() -> PathBuf {
    PathBuf::from("build/client")
}

fn default_immutable_prefix() -> String {
    "/assets/".to_string()
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_max_request_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Config {
    /// Check values serde cannot validate on its own
    pub fn validate(&self) -> crate::Result<()> {
        if !self.assets.immutable_prefix.starts_with('/') {
            return Err(crate::DashboardError::Config(format!(
                "immutable_prefix must start with '/': {:?}",
                self.assets.immutable_prefix
            )));
        }
        let url = &self.ssr.upstream_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(crate::DashboardError::Config(format!(
                "upstream_url must be an http(s) URL: {:?}",
                url
            )));
        }
        Ok(())
    }
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::DashboardError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.assets.root, PathBuf::from("build/client"));
        assert_eq!(config.assets.immutable_prefix, "/assets/");
        assert_eq!(config.ssr.upstream_url, "http://127.0.0.1:3000");
        assert_eq!(config.ssr.max_request_body_bytes, 10 * 1024 * 1024);
        config.validate().unwrap();
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "server": { "host": "127.0.0.1", "port": 9000 },
            "assets": { "root": "/srv/dashboard", "immutable_prefix": "/build/" },
            "ssr": { "upstream_url": "http://localhost:4000", "max_request_body_bytes": 1024 }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.assets.root, PathBuf::from("/srv/dashboard"));
        assert_eq!(config.assets.immutable_prefix, "/build/");
        assert_eq!(config.ssr.upstream_url, "http://localhost:4000");
        assert_eq!(config.ssr.max_request_body_bytes, 1024);
    }

    #[test]
    fn relative_immutable_prefix_is_rejected() {
        let mut config = Config::default();
        config.assets.immutable_prefix = "assets/".to_string();
        assert!(matches!(
            config.validate(),
            Err(crate::DashboardError::Config(_))
        ));
    }

    #[test]
    fn non_http_upstream_is_rejected() {
        let mut config = Config::default();
        config.ssr.upstream_url = "unix:///tmp/ssr.sock".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/dashboard.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("dashboard.json");
        std::fs::write(&config_path, r#"{"server": {"port": 8123}}"#).unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.server.port, 8123);
    }

    #[test]
    fn load_config_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("dashboard.json");
        std::fs::write(&config_path, "not json").unwrap();

        assert!(load_config(&config_path).is_err());
    }
}
