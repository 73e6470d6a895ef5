#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use server_node_r::business::LocalEngine;
use server_node_r::config::{CertConfig, ControllerConfig};
use server_node_r::core::objects::{EngineUser, InboundConfig, OutboundConfig};
use server_node_r::core::{
    CertRenewal, ClientInfo, DetectResult, DetectRule, NodeInfo, NodeStatus, NodeType, OnlineUser,
    PanelApi, ProxyEngine, StatusSampler, UserInfo, UserTraffic,
};
use server_node_r::{Collaborators, Controller};

pub fn node(node_type: NodeType, port: u16) -> NodeInfo {
    NodeInfo {
        node_type,
        node_id: 1,
        port,
        speed_limit: 0,
        alter_id: 0,
        transport_protocol: "tcp".to_string(),
        host: String::new(),
        path: String::new(),
        service_name: String::new(),
        enable_tls: false,
        enable_vless: false,
        cypher_method: String::new(),
    }
}

pub fn user(uid: i64) -> UserInfo {
    UserInfo {
        uid,
        email: format!("user{}@example.com", uid),
        uuid: format!("uuid-{}", uid),
        passwd: String::new(),
        method: String::new(),
        speed_limit: 0,
        device_limit: 0,
    }
}

pub fn rule(id: i64, pattern: &str) -> DetectRule {
    DetectRule {
        id,
        pattern: pattern.to_string(),
    }
}

/// Controller config whose periodic tasks never fire during a test
pub fn manual_config() -> ControllerConfig {
    ControllerConfig {
        update_periodic: Duration::from_secs(3600),
        ..ControllerConfig::default()
    }
}

#[derive(Debug, Default)]
pub struct PanelData {
    pub node: Option<NodeInfo>,
    pub users: Vec<UserInfo>,
    pub rules: Vec<DetectRule>,
    pub fail_node: bool,
    pub fail_users: bool,
    pub fail_rules: bool,
    pub fail_reports: bool,
    pub status_reports: Vec<NodeStatus>,
    pub traffic_reports: Vec<Vec<UserTraffic>>,
    pub online_reports: Vec<Vec<OnlineUser>>,
    pub illegal_reports: Vec<Vec<DetectResult>>,
}

/// In-memory panel whose declared state tests edit between ticks
#[derive(Debug, Default)]
pub struct FakePanel {
    pub data: Mutex<PanelData>,
}

impl FakePanel {
    pub fn new(node: NodeInfo, users: Vec<UserInfo>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(PanelData {
                node: Some(node),
                users,
                ..PanelData::default()
            }),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut PanelData) -> R) -> R {
        f(&mut self.data.lock().unwrap())
    }
}

#[async_trait]
impl PanelApi for FakePanel {
    fn describe(&self) -> ClientInfo {
        ClientInfo {
            api_host: "http://panel.test".to_string(),
            node_id: 1,
            key: "key".to_string(),
            node_type: NodeType::V2ray,
        }
    }

    async fn get_node_info(&self) -> Result<NodeInfo> {
        self.with(|d| {
            if d.fail_node {
                return Err(anyhow!("panel unavailable"));
            }
            d.node.clone().ok_or_else(|| anyhow!("no node"))
        })
    }

    async fn get_user_list(&self) -> Result<Vec<UserInfo>> {
        self.with(|d| {
            if d.fail_users {
                Err(anyhow!("panel unavailable"))
            } else {
                Ok(d.users.clone())
            }
        })
    }

    async fn get_node_rule(&self) -> Result<Vec<DetectRule>> {
        self.with(|d| {
            if d.fail_rules {
                Err(anyhow!("panel unavailable"))
            } else {
                Ok(d.rules.clone())
            }
        })
    }

    async fn report_node_status(&self, status: &NodeStatus) -> Result<()> {
        self.with(|d| {
            d.status_reports.push(status.clone());
            Ok(())
        })
    }

    async fn report_user_traffic(&self, traffic: &[UserTraffic]) -> Result<()> {
        self.with(|d| {
            if d.fail_reports {
                return Err(anyhow!("report rejected"));
            }
            d.traffic_reports.push(traffic.to_vec());
            Ok(())
        })
    }

    async fn report_node_online_users(&self, online: &[OnlineUser]) -> Result<()> {
        self.with(|d| {
            d.online_reports.push(online.to_vec());
            Ok(())
        })
    }

    async fn report_illegal(&self, results: &[DetectResult]) -> Result<()> {
        self.with(|d| {
            d.illegal_reports.push(results.to_vec());
            Ok(())
        })
    }
}

/// `LocalEngine` wrapper counting mutating calls per operation. Operations
/// named in `fail_on` return an error without reaching the inner engine.
#[derive(Debug, Default)]
pub struct CountingEngine {
    pub inner: LocalEngine,
    mutations: AtomicUsize,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl CountingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Successful and failed calls of `op` so far
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn bump(&self, op: &'static str) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        if self.failing.lock().unwrap().contains(op) {
            return Err(anyhow!("{} failed", op));
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyEngine for CountingEngine {
    async fn add_inbound(&self, config: InboundConfig) -> Result<()> {
        self.bump("add_inbound")?;
        self.inner.add_inbound(config).await
    }

    async fn remove_inbound(&self, tag: &str) -> Result<()> {
        self.bump("remove_inbound")?;
        self.inner.remove_inbound(tag).await
    }

    async fn add_outbound(&self, config: OutboundConfig) -> Result<()> {
        self.bump("add_outbound")?;
        self.inner.add_outbound(config).await
    }

    async fn remove_outbound(&self, tag: &str) -> Result<()> {
        self.bump("remove_outbound")?;
        self.inner.remove_outbound(tag).await
    }

    async fn add_users(&self, users: Vec<EngineUser>, tag: &str) -> Result<()> {
        self.bump("add_users")?;
        self.inner.add_users(users, tag).await
    }

    async fn remove_users(&self, keys: &[String], tag: &str) -> Result<()> {
        self.bump("remove_users")?;
        self.inner.remove_users(keys, tag).await
    }

    async fn add_inbound_limiter(&self, tag: &str, speed_limit: u64, users: &[UserInfo]) -> Result<()> {
        self.bump("add_inbound_limiter")?;
        self.inner.add_inbound_limiter(tag, speed_limit, users).await
    }

    async fn update_inbound_limiter(&self, tag: &str, users: &[UserInfo]) -> Result<()> {
        self.bump("update_inbound_limiter")?;
        self.inner.update_inbound_limiter(tag, users).await
    }

    async fn delete_inbound_limiter(&self, tag: &str) -> Result<()> {
        self.bump("delete_inbound_limiter")?;
        self.inner.delete_inbound_limiter(tag).await
    }

    async fn update_rule(&self, tag: &str, rules: &[DetectRule]) -> Result<()> {
        self.bump("update_rule")?;
        self.inner.update_rule(tag, rules).await
    }

    async fn get_traffic(&self, key: &str) -> (u64, u64) {
        self.inner.get_traffic(key).await
    }

    async fn get_online_devices(&self, tag: &str) -> Result<Vec<OnlineUser>> {
        self.inner.get_online_devices(tag).await
    }

    async fn get_detect_results(&self, tag: &str) -> Result<Vec<DetectResult>> {
        self.inner.get_detect_results(tag).await
    }
}

/// Renewer recording how often it was asked
#[derive(Debug, Default)]
pub struct FakeCert {
    pub calls: AtomicUsize,
}

#[async_trait]
impl CertRenewal for FakeCert {
    async fn renew_cert(&self, config: &CertConfig) -> Result<(PathBuf, PathBuf)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        config
            .cert_paths()
            .ok_or_else(|| anyhow!("no certificate paths"))
    }
}

/// Renewer that parks inside `renew_cert` until `release` is notified
#[derive(Debug, Default)]
pub struct GatedCert {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl CertRenewal for GatedCert {
    async fn renew_cert(&self, config: &CertConfig) -> Result<(PathBuf, PathBuf)> {
        self.entered.notify_one();
        self.release.notified().await;
        config
            .cert_paths()
            .ok_or_else(|| anyhow!("no certificate paths"))
    }
}

/// Sampler that blocks its thread like a slow disk enumeration
pub struct SlowSampler(pub Duration);

impl StatusSampler for SlowSampler {
    fn sample(&self) -> Result<NodeStatus> {
        std::thread::sleep(self.0);
        Ok(NodeStatus::default())
    }
}

pub struct FixedSampler;

impl StatusSampler for FixedSampler {
    fn sample(&self) -> Result<NodeStatus> {
        Ok(NodeStatus {
            cpu: 12.5,
            mem: 40.0,
            disk: 70.0,
            uptime: 3600,
        })
    }
}

pub struct Harness {
    pub panel: Arc<FakePanel>,
    pub engine: Arc<CountingEngine>,
    pub cert: Arc<FakeCert>,
}

impl Harness {
    pub fn new(node: NodeInfo, users: Vec<UserInfo>) -> Self {
        Self {
            panel: FakePanel::new(node, users),
            engine: CountingEngine::new(),
            cert: Arc::new(FakeCert::default()),
        }
    }

    pub fn deps(&self) -> Collaborators {
        Collaborators {
            api: self.panel.clone(),
            engine: self.engine.clone(),
            cert: self.cert.clone(),
            sampler: Arc::new(FixedSampler),
        }
    }

    pub fn controller(&self, config: ControllerConfig) -> Controller {
        Controller::new(config, self.deps())
    }

    pub fn local(&self) -> &LocalEngine {
        &self.engine.inner
    }
}
