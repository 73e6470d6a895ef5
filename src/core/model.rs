//! Data model shared by the controller and its collaborators

use serde::{Deserialize, Serialize};
use std::fmt;

/// User ID type used throughout the system.
pub type UserId = i64;

/// Node type declared by the panel
///
/// Unknown panel values are kept as `Unsupported` so the error can be raised
/// where a user object or inbound is actually built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    V2ray,
    Trojan,
    Shadowsocks,
    Unsupported(String),
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "V2ray" => NodeType::V2ray,
            "Trojan" => NodeType::Trojan,
            "Shadowsocks" => NodeType::Shadowsocks,
            _ => NodeType::Unsupported(s),
        }
    }
}

impl From<NodeType> for String {
    fn from(t: NodeType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::V2ray => write!(f, "V2ray"),
            NodeType::Trojan => write!(f, "Trojan"),
            NodeType::Shadowsocks => write!(f, "Shadowsocks"),
            NodeType::Unsupported(name) => write!(f, "{}", name),
        }
    }
}

/// Declared node configuration. Replaced wholesale on change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_type: NodeType,
    pub node_id: u32,
    pub port: u16,
    /// Node-wide speed limit in bytes per second, 0 means unlimited
    #[serde(default)]
    pub speed_limit: u64,
    #[serde(default)]
    pub alter_id: u16,
    /// Transport network: tcp, ws or grpc
    #[serde(default = "default_transport")]
    pub transport_protocol: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub enable_vless: bool,
    /// Shadowsocks cipher used when a user carries none
    #[serde(default)]
    pub cypher_method: String,
}

fn default_transport() -> String {
    "tcp".to_string()
}

/// A provisioned user. Equality and hashing cover every field, so a changed
/// credential for the same uid is a different value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: UserId,
    pub email: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub passwd: String,
    #[serde(default)]
    pub method: String,
    /// Per-user speed limit in bytes per second, 0 means unlimited
    #[serde(default)]
    pub speed_limit: u64,
    /// Maximum concurrent source IPs, 0 means unlimited
    #[serde(default)]
    pub device_limit: u32,
}

/// Key identifying the active inbound/outbound pair and everything hung off it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Tag(String);

impl Tag {
    pub fn new(node_type: &NodeType, port: u16) -> Self {
        Tag(format!("{}_{}", node_type, port))
    }

    pub fn for_node(node: &NodeInfo) -> Self {
        Self::new(&node.node_type, node.port)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tag-qualified user key: `tag|email|uid`
    pub fn user_key(&self, user: &UserInfo) -> String {
        format!("{}|{}|{}", self.0, user.email, user.uid)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Tag(s.to_string())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A detection/block rule attached to a tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectRule {
    pub id: i64,
    /// Regular expression matched against the destination
    pub pattern: String,
}

/// Panel identity of this client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub api_host: String,
    pub node_id: u32,
    pub key: String,
    pub node_type: NodeType,
}

/// Host resource report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeStatus {
    /// CPU usage percent
    pub cpu: f64,
    /// Memory usage percent
    pub mem: f64,
    /// Disk usage percent
    pub disk: f64,
    /// Host uptime in seconds
    pub uptime: u64,
}

/// Per-user traffic consumed since the last report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTraffic {
    pub uid: UserId,
    pub email: String,
    pub upload: u64,
    pub download: u64,
}

/// An online device seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnlineUser {
    pub uid: UserId,
    pub ip: String,
}

/// A rule hit reported as illegal behaviour
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetectResult {
    pub uid: UserId,
    pub rule_id: i64,
}
