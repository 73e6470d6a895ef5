//! Collaborator traits
//!
//! The controller reaches the panel, the proxy engine, certificate renewal and
//! host sampling only through these traits.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

use super::model::{
    ClientInfo, DetectResult, DetectRule, NodeInfo, NodeStatus, OnlineUser, UserInfo, UserTraffic,
};
use super::objects::{EngineUser, InboundConfig, OutboundConfig};
use crate::config::CertConfig;

/// Remote control-plane client
#[async_trait]
pub trait PanelApi: Send + Sync {
    /// Identity of this client on the panel
    fn describe(&self) -> ClientInfo;

    async fn get_node_info(&self) -> Result<NodeInfo>;

    async fn get_user_list(&self) -> Result<Vec<UserInfo>>;

    async fn get_node_rule(&self) -> Result<Vec<DetectRule>>;

    async fn report_node_status(&self, status: &NodeStatus) -> Result<()>;

    async fn report_user_traffic(&self, traffic: &[UserTraffic]) -> Result<()>;

    async fn report_node_online_users(&self, online: &[OnlineUser]) -> Result<()>;

    async fn report_illegal(&self, results: &[DetectResult]) -> Result<()>;
}

/// Proxy engine adapter. Everything except `add_*` config calls is keyed by tag.
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    async fn add_inbound(&self, config: InboundConfig) -> Result<()>;

    async fn remove_inbound(&self, tag: &str) -> Result<()>;

    async fn add_outbound(&self, config: OutboundConfig) -> Result<()>;

    async fn remove_outbound(&self, tag: &str) -> Result<()>;

    async fn add_users(&self, users: Vec<EngineUser>, tag: &str) -> Result<()>;

    /// Remove users by tag-qualified key
    async fn remove_users(&self, keys: &[String], tag: &str) -> Result<()>;

    async fn add_inbound_limiter(&self, tag: &str, speed_limit: u64, users: &[UserInfo]) -> Result<()>;

    /// Add (or refresh) users in an existing limiter
    async fn update_inbound_limiter(&self, tag: &str, users: &[UserInfo]) -> Result<()>;

    async fn delete_inbound_limiter(&self, tag: &str) -> Result<()>;

    async fn update_rule(&self, tag: &str, rules: &[DetectRule]) -> Result<()>;

    /// Read and reset the `(upload, download)` counters of a user key.
    ///
    /// Implementations must make the read and the reset one step: a byte is
    /// returned by exactly one call.
    async fn get_traffic(&self, key: &str) -> (u64, u64);

    async fn get_online_devices(&self, tag: &str) -> Result<Vec<OnlineUser>>;

    async fn get_detect_results(&self, tag: &str) -> Result<Vec<DetectResult>>;
}

/// Best-effort certificate renewal
#[async_trait]
pub trait CertRenewal: Send + Sync {
    /// Renew the certificate described by `config`, returning `(cert, key)` paths
    async fn renew_cert(&self, config: &CertConfig) -> Result<(PathBuf, PathBuf)>;
}

/// Host resource sampling
pub trait StatusSampler: Send + Sync {
    fn sample(&self) -> Result<NodeStatus>;
}
