//! Node reconciliation controller
//!
//! Keeps the engine's objects for one panel node in line with what the panel
//! declares:
//! - bootstrap: build the tag, push users, limiter and rules
//! - node monitor: poll node info and users, switch tags or diff users
//! - user report: report host status, traffic, online devices, detections
//!
//! Both periodic tasks take the state lock for their whole tick, so neither
//! observes the other's half-applied changes.

pub mod builder;
mod rules;
mod supervisor;
mod tasks;
mod traffic;

pub use supervisor::{ControllerFactory, GenerationFactory, Supervisor};
pub use tasks::PeriodicHandle;
pub use traffic::{collect_user_traffic, format_bytes};

use anyhow::{anyhow, Context};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::ControllerConfig;
use crate::core::{
    compare_user_list, CertRenewal, ClientInfo, DetectRule, NodeInfo, PanelApi, ProxyEngine,
    StatusSampler, Tag, UserInfo,
};
use crate::error::{ControllerError, Result};
use crate::logger::log;
use builder::{build_users, inbound_builder, outbound_builder};

/// External collaborators a controller drives
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn PanelApi>,
    pub engine: Arc<dyn ProxyEngine>,
    pub cert: Arc<dyn CertRenewal>,
    pub sampler: Arc<dyn StatusSampler>,
}

/// Coarse lifecycle of a controller instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Which engine objects of the current tag are known to exist
#[derive(Debug, Clone, Copy, Default)]
struct Installed {
    inbound: bool,
    outbound: bool,
}

struct ControllerState {
    client_info: ClientInfo,
    node_info: NodeInfo,
    tag: Tag,
    installed: Installed,
    users: Vec<UserInfo>,
    rules: Vec<DetectRule>,
}

struct Shared {
    config: ControllerConfig,
    deps: Collaborators,
    state: Mutex<ControllerState>,
}

/// Reconciliation controller for a single panel node
pub struct Controller {
    config: ControllerConfig,
    deps: Collaborators,
    phase: Phase,
    used: bool,
    shared: Option<Arc<Shared>>,
    tasks: Option<PeriodicHandle>,
}

impl Controller {
    pub fn new(config: ControllerConfig, deps: Collaborators) -> Self {
        Self {
            config,
            deps,
            phase: Phase::Stopped,
            used: false,
            shared: None,
            tasks: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bootstrap the engine state and launch the periodic tasks.
    ///
    /// An instance starts at most once; a failed bootstrap leaves it stopped
    /// with the engine objects it created removed again.
    pub async fn start(&mut self) -> Result<()> {
        if self.used {
            return Err(ControllerError::Lifecycle(
                "controller instance was already started".to_string(),
            ));
        }
        self.used = true;
        self.phase = Phase::Starting;

        let state = match bootstrap(&self.config, &self.deps).await {
            Ok(state) => state,
            Err(e) => {
                self.phase = Phase::Stopped;
                log::error!(error = %e, "Controller bootstrap failed");
                return Err(e);
            }
        };

        log::info!(
            api_host = %state.client_info.api_host,
            node_id = state.client_info.node_id,
            tag = %state.tag,
            users = state.users.len(),
            "Controller started"
        );

        let shared = Arc::new(Shared {
            config: self.config.clone(),
            deps: self.deps.clone(),
            state: Mutex::new(state),
        });

        let period = self.config.update_periodic;
        let mut tasks = PeriodicHandle::new();

        let s = Arc::clone(&shared);
        tasks.spawn("node_monitor", period, move || {
            let s = Arc::clone(&s);
            async move { s.reconcile().await }
        });

        let s = Arc::clone(&shared);
        tasks.spawn("user_report", period, move || {
            let s = Arc::clone(&s);
            async move { s.report_status().await }
        });

        self.shared = Some(shared);
        self.tasks = Some(tasks);
        self.phase = Phase::Running;
        Ok(())
    }

    /// Stop both periodic tasks, waiting for in-flight ticks.
    ///
    /// Engine objects stay in place for whoever takes over the tag space.
    pub async fn close(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            self.phase = Phase::Stopping;
            tasks.shutdown().await;
            log::info!("Controller stopped");
        }
        self.shared = None;
        self.phase = Phase::Stopped;
    }

    /// Run one node monitor tick now
    pub async fn reconcile_now(&self) -> Result<()> {
        Ok(self.running()?.reconcile().await?)
    }

    /// Run one user report tick now
    pub async fn report_now(&self) -> Result<()> {
        Ok(self.running()?.report_status().await?)
    }

    /// Tag currently owned by this controller
    pub async fn current_tag(&self) -> Option<Tag> {
        let shared = self.shared.as_ref()?;
        Some(shared.state.lock().await.tag.clone())
    }

    /// Users last pushed to the engine
    pub async fn current_users(&self) -> Vec<UserInfo> {
        match &self.shared {
            Some(shared) => shared.state.lock().await.users.clone(),
            None => Vec::new(),
        }
    }

    fn running(&self) -> Result<&Arc<Shared>> {
        self.shared
            .as_ref()
            .ok_or_else(|| ControllerError::Lifecycle("controller is not running".to_string()))
    }
}

/// Add the inbound and outbound of a node. A failed outbound rolls the
/// inbound back so no half-built tag is left behind.
async fn install_tag(
    config: &ControllerConfig,
    engine: &dyn ProxyEngine,
    node: &NodeInfo,
) -> Result<()> {
    let inbound = inbound_builder(config, node)?;
    let outbound = outbound_builder(config, node);
    let tag = inbound.tag.clone();

    engine
        .add_inbound(inbound)
        .await
        .map_err(|e| ControllerError::Other(format!("add inbound {} failed: {:#}", tag, e)))?;

    if let Err(e) = engine.add_outbound(outbound).await {
        if let Err(re) = engine.remove_inbound(&tag).await {
            log::warn!(tag = %tag, error = %re, "Failed to roll back inbound");
        }
        return Err(ControllerError::Other(format!(
            "add outbound {} failed: {:#}",
            tag, e
        )));
    }

    log::info!(tag = %tag, port = node.port, "Tag installed");
    Ok(())
}

/// Best-effort removal of everything bootstrap may have created for `tag`
async fn rollback_tag(engine: &dyn ProxyEngine, tag: &Tag) {
    let tag = tag.as_str();
    if let Err(e) = engine.delete_inbound_limiter(tag).await {
        log::debug!(tag = tag, error = %e, "Rollback: no limiter to delete");
    }
    if let Err(e) = engine.remove_inbound(tag).await {
        log::warn!(tag = tag, error = %e, "Rollback: failed to remove inbound");
    }
    if let Err(e) = engine.remove_outbound(tag).await {
        log::warn!(tag = tag, error = %e, "Rollback: failed to remove outbound");
    }
}

async fn bootstrap(config: &ControllerConfig, deps: &Collaborators) -> Result<ControllerState> {
    let api = deps.api.as_ref();
    let engine = deps.engine.as_ref();

    let client_info = api.describe();
    let node_info = api
        .get_node_info()
        .await
        .map_err(|e| ControllerError::bootstrap("fetching node info", e))?;
    let tag = Tag::for_node(&node_info);

    install_tag(config, engine, &node_info).await?;

    let populated = async {
        let users = api
            .get_user_list()
            .await
            .map_err(|e| ControllerError::bootstrap("fetching user list", e))?;

        let engine_users = build_users(&tag, &node_info, &users)?;
        engine
            .add_users(engine_users, tag.as_str())
            .await
            .map_err(|e| ControllerError::bootstrap("adding users", e))?;
        log::info!(tag = %tag, count = users.len(), "Added users");

        engine
            .add_inbound_limiter(tag.as_str(), node_info.speed_limit, &users)
            .await
            .map_err(|e| ControllerError::bootstrap("adding limiter", e))?;

        let rules = rules::refresh_rules(api, engine, &tag, &[])
            .await
            .map_err(|e| ControllerError::bootstrap("applying rules", e))?
            .unwrap_or_default();

        Ok::<_, ControllerError>((users, rules))
    }
    .await;

    match populated {
        Ok((users, rules)) => Ok(ControllerState {
            client_info,
            node_info,
            tag,
            installed: Installed {
                inbound: true,
                outbound: true,
            },
            users,
            rules,
        }),
        Err(e) => {
            rollback_tag(engine, &tag).await;
            Err(e)
        }
    }
}

impl Shared {
    /// One node monitor tick. An `Err` means the tick was cut short; the
    /// state keeps its last committed value.
    ///
    /// A tag left partly torn down by an earlier failed switch is rebuilt even
    /// when the panel's node info matches the current one again.
    async fn reconcile(&self) -> anyhow::Result<()> {
        let api = self.deps.api.as_ref();
        let engine = self.deps.engine.as_ref();
        let mut state = self.state.lock().await;

        let new_node = api.get_node_info().await.context("get node info failed")?;
        let new_users = api.get_user_list().await.context("get user list failed")?;

        let installed = state.installed.inbound && state.installed.outbound;
        if new_node != state.node_info || !installed {
            self.switch_node(&mut state, new_node, &new_users).await?;
        } else {
            self.sync_users(&state, &new_users).await;
        }

        match rules::refresh_rules(api, engine, &state.tag, &state.rules).await {
            Ok(Some(applied)) => state.rules = applied,
            Ok(None) => {}
            Err(e) => log::warn!(tag = %state.tag, error = %format!("{:#}", e), "Rule refresh failed"),
        }

        state.users = new_users;
        let node = state.node_info.clone();
        drop(state);

        // Renewal can take minutes; the other task must not wait on it.
        self.check_cert(&node).await;
        Ok(())
    }

    /// Tear down the current tag and rebuild for `new_node`.
    ///
    /// Inbound goes before outbound; both must be gone before the new tag is
    /// built. Removed objects are remembered so a retry does not remove them
    /// twice.
    async fn switch_node(
        &self,
        state: &mut ControllerState,
        new_node: NodeInfo,
        new_users: &[UserInfo],
    ) -> anyhow::Result<()> {
        let api = self.deps.api.as_ref();
        let engine = self.deps.engine.as_ref();
        let old_tag = state.tag.clone();
        let new_tag = Tag::for_node(&new_node);

        if state.installed.inbound || state.installed.outbound {
            // Flush the old tag's counters before its keys go away.
            traffic::report_traffic(api, engine, &old_tag, &state.users).await;
        }

        if state.installed.inbound {
            engine
                .remove_inbound(old_tag.as_str())
                .await
                .with_context(|| format!("remove inbound {} failed", old_tag))?;
            state.installed.inbound = false;
        }
        if state.installed.outbound {
            engine
                .remove_outbound(old_tag.as_str())
                .await
                .with_context(|| format!("remove outbound {} failed", old_tag))?;
            state.installed.outbound = false;
        }

        install_tag(&self.config, engine, &new_node)
            .await
            .map_err(|e| anyhow!("build tag {} failed: {}", new_tag, e))?;

        if let Err(e) = engine.delete_inbound_limiter(old_tag.as_str()).await {
            log::warn!(tag = %old_tag, error = %e, "Failed to delete old limiter");
        }

        if old_tag == new_tag {
            log::info!(tag = %new_tag, "Tag reinstalled");
        } else {
            log::tag_switch(old_tag.as_str(), new_tag.as_str());
        }
        state.node_info = new_node;
        state.tag = new_tag;
        state.installed = Installed {
            inbound: true,
            outbound: true,
        };
        state.rules.clear();

        let tag = state.tag.as_str();
        match build_users(&state.tag, &state.node_info, new_users) {
            Ok(users) => match engine.add_users(users, tag).await {
                Ok(()) => log::info!(tag = tag, count = new_users.len(), "Added users"),
                Err(e) => log::warn!(tag = tag, error = %e, "Failed to add users"),
            },
            Err(e) => log::warn!(tag = tag, error = %e, "Failed to build users"),
        }

        if let Err(e) = engine
            .add_inbound_limiter(tag, state.node_info.speed_limit, new_users)
            .await
        {
            log::warn!(tag = tag, error = %e, "Failed to add limiter");
        }

        Ok(())
    }

    /// Apply the user diff against the current snapshot on the current tag
    async fn sync_users(&self, state: &ControllerState, new_users: &[UserInfo]) {
        let engine = self.deps.engine.as_ref();
        let tag = state.tag.as_str();
        let (deleted, added) = compare_user_list(&state.users, new_users);

        if !deleted.is_empty() {
            let keys: Vec<String> = deleted.iter().map(|u| state.tag.user_key(u)).collect();
            if let Err(e) = engine.remove_users(&keys, tag).await {
                log::warn!(tag = tag, error = %e, "Failed to remove users");
            }
        }

        if !added.is_empty() {
            match build_users(&state.tag, &state.node_info, &added) {
                Ok(users) => {
                    if let Err(e) = engine.add_users(users, tag).await {
                        log::warn!(tag = tag, error = %e, "Failed to add users");
                    }
                }
                Err(e) => log::warn!(tag = tag, error = %e, "Failed to build users"),
            }
            if let Err(e) = engine.update_inbound_limiter(tag, &added).await {
                log::warn!(tag = tag, error = %e, "Failed to update limiter");
            }
        }

        log::user_sync(tag, deleted.len(), added.len());
    }

    async fn check_cert(&self, node: &NodeInfo) {
        let cert = &self.config.cert_config;
        if !node.enable_tls || !cert.cert_mode.is_acme() {
            return;
        }
        match self.deps.cert.renew_cert(cert).await {
            Ok((cert_file, _)) => {
                log::debug!(domain = %cert.cert_domain, cert = %cert_file.display(), "Certificate checked")
            }
            Err(e) => log::warn!(domain = %cert.cert_domain, error = %format!("{:#}", e), "Certificate renewal failed"),
        }
    }

    /// One user report tick. Report failures are logged only.
    async fn report_status(&self) -> anyhow::Result<()> {
        let api = self.deps.api.as_ref();
        let engine = self.deps.engine.as_ref();

        // Sampling blocks on disk enumeration, keep it off the runtime and
        // outside the state lock.
        let sampler = Arc::clone(&self.deps.sampler);
        match tokio::task::spawn_blocking(move || sampler.sample()).await {
            Ok(Ok(status)) => {
                if let Err(e) = api.report_node_status(&status).await {
                    log::report("node_status", 1, Some(&e));
                }
            }
            Ok(Err(e)) => log::warn!(error = %e, "Failed to sample node status"),
            Err(e) => log::warn!(error = %e, "Status sampler panicked"),
        }

        let state = self.state.lock().await;
        let tag = state.tag.as_str();

        traffic::report_traffic(api, engine, &state.tag, &state.users).await;

        match engine.get_online_devices(tag).await {
            Ok(online) if !online.is_empty() => {
                let result = api.report_node_online_users(&online).await;
                log::report("online_users", online.len(), result.as_ref().err());
            }
            Ok(_) => {}
            Err(e) => log::warn!(tag = tag, error = %e, "Failed to get online devices"),
        }

        match engine.get_detect_results(tag).await {
            Ok(results) if !results.is_empty() => {
                let result = api.report_illegal(&results).await;
                log::report("illegal", results.len(), result.as_ref().err());
            }
            Ok(_) => {}
            Err(e) => log::warn!(tag = tag, error = %e, "Failed to get detect results"),
        }

        Ok(())
    }
}
