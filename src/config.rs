//! Configuration for the node agent
//!
//! CLI arguments (with environment variable support) locate a YAML file that
//! lists the panel nodes this process serves.

use clap::Parser;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::NodeType;
use crate::error::{ControllerError, Result};

/// Parse duration string (e.g., "60s", "2m", "1h") or plain seconds
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

/// Accept either a bare number of seconds or a humantime string
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Default config file location
pub const DEFAULT_CONFIG_FILE: &str = "/etc/server-node-r/config.yml";

/// Default directory for ACME certificates
const DEFAULT_CERT_DIR: &str = "/etc/server-node-r/cert";

/// CLI arguments for the node agent
///
/// Supports environment variables with X_PANDA_NODE_ prefix
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Panel-driven proxy node agent")]
#[command(rename_all = "snake_case")]
pub struct CliArgs {
    /// YAML config file listing the nodes to serve
    #[arg(long, short = 'c', env = "X_PANDA_NODE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log mode override: trace, debug, info, warn, error
    #[arg(long, env = "X_PANDA_NODE_LOG_MODE")]
    pub log_mode: Option<String>,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Certificate handling mode for TLS nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CertMode {
    #[default]
    None,
    File,
    Dns,
    Http,
}

impl CertMode {
    /// Modes whose certificates are issued and renewed through ACME
    pub fn is_acme(&self) -> bool {
        matches!(self, CertMode::Dns | CertMode::Http)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CertMode::None => "none",
            CertMode::File => "file",
            CertMode::Dns => "dns",
            CertMode::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertConfig {
    #[serde(default)]
    pub cert_mode: CertMode,
    #[serde(default)]
    pub cert_domain: String,
    #[serde(default)]
    pub cert_file: String,
    #[serde(default)]
    pub key_file: String,
    /// DNS provider name understood by lego
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub email: String,
    /// Environment passed to the DNS provider
    #[serde(default)]
    pub dns_env: BTreeMap<String, String>,
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CERT_DIR)
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            cert_mode: CertMode::None,
            cert_domain: String::new(),
            cert_file: String::new(),
            key_file: String::new(),
            provider: String::new(),
            email: String::new(),
            dns_env: BTreeMap::new(),
            cert_dir: default_cert_dir(),
        }
    }
}

impl CertConfig {
    /// Certificate and key paths the engine should load for this config
    pub fn cert_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match self.cert_mode {
            CertMode::None => None,
            CertMode::File => Some((
                PathBuf::from(&self.cert_file),
                PathBuf::from(&self.key_file),
            )),
            CertMode::Dns | CertMode::Http => {
                let dir = self.cert_dir.join("certificates");
                Some((
                    dir.join(format!("{}.crt", self.cert_domain)),
                    dir.join(format!("{}.key", self.cert_domain)),
                ))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self.cert_mode {
            CertMode::None => {}
            CertMode::File => {
                if self.cert_file.is_empty() || self.key_file.is_empty() {
                    return Err(ControllerError::Config(
                        "cert_mode 'file' requires cert_file and key_file".to_string(),
                    ));
                }
            }
            CertMode::Dns | CertMode::Http => {
                if self.cert_domain.is_empty() {
                    return Err(ControllerError::Config(format!(
                        "cert_mode '{}' requires cert_domain",
                        self.cert_mode.as_str()
                    )));
                }
                if self.cert_mode == CertMode::Dns && self.provider.is_empty() {
                    return Err(ControllerError::Config(
                        "cert_mode 'dns' requires provider".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Panel connection settings for one node
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub api_host: String,
    #[serde(default)]
    pub api_key: String,
    pub node_id: u32,
    pub node_type: NodeType,
    /// Request timeout (e.g., "15s", default: 15s)
    #[serde(default = "default_api_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Controller settings for one node
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    /// Source address for outbound connections
    #[serde(default)]
    pub send_ip: Option<String>,
    /// Interval for both periodic tasks (e.g., "60s", default: 60s)
    #[serde(default = "default_update_periodic", deserialize_with = "deserialize_duration")]
    pub update_periodic: Duration,
    /// Resolve destinations through the engine's DNS
    #[serde(default)]
    pub enable_dns: bool,
    #[serde(default)]
    pub cert_config: CertConfig,
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_update_periodic() -> Duration {
    Duration::from_secs(60)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            send_ip: None,
            update_periodic: default_update_periodic(),
            enable_dns: false,
            cert_config: CertConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub api_config: ApiConfig,
    #[serde(default)]
    pub controller_config: ControllerConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub level: Option<String>,
}

/// Contents of the YAML config file
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub log: LogConfig,
    pub nodes: Vec<NodeEntry>,
}

impl FileConfig {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(ControllerError::Config("no nodes configured".to_string()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let api = &node.api_config;
            if api.api_host.is_empty() {
                return Err(ControllerError::Config(format!("nodes[{}]: api_host is required", i)));
            }
            if api.node_id == 0 {
                return Err(ControllerError::Config(format!(
                    "nodes[{}]: node_id must be a positive integer",
                    i
                )));
            }
            if let NodeType::Unsupported(name) = &api.node_type {
                return Err(ControllerError::UnsupportedNodeType(name.clone()));
            }
            if node.controller_config.update_periodic.is_zero() {
                return Err(ControllerError::Config(format!(
                    "nodes[{}]: update_periodic must be greater than 0",
                    i
                )));
            }
            node.controller_config.cert_config.validate()?;
        }
        Ok(())
    }
}
