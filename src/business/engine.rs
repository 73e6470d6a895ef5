//! In-process proxy engine registry
//!
//! Holds the inbounds, outbounds, users, limiters, rules and traffic counters
//! the controllers install, keyed by tag. A proxy data plane embedded in the
//! same process feeds it through the `record_*` and `check_destination` hooks.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;

use super::limiter::{Admission, Limiter};
use super::rules::RuleSet;
use super::stats::TrafficCounters;
use crate::core::objects::{EngineUser, InboundConfig, OutboundConfig};
use crate::core::{DetectResult, DetectRule, OnlineUser, ProxyEngine, UserInfo};
use crate::logger::log;

#[derive(Debug, Default)]
pub struct LocalEngine {
    inbounds: DashMap<String, InboundConfig>,
    outbounds: DashMap<String, OutboundConfig>,
    /// tag -> user key -> user
    users: DashMap<String, HashMap<String, EngineUser>>,
    limiter: Limiter,
    rules: RuleSet,
    counters: TrafficCounters,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes sent by the client of `key`
    pub fn record_upload(&self, key: &str, bytes: u64) {
        self.counters.record_upload(key, bytes);
    }

    /// Record bytes delivered to the client of `key`
    pub fn record_download(&self, key: &str, bytes: u64) {
        self.counters.record_download(key, bytes);
    }

    /// Admit a connection of `key` from `ip` on `tag`
    pub fn record_online(&self, tag: &str, key: &str, ip: &str) -> Admission {
        self.limiter.admit(tag, key, ip)
    }

    /// Match a destination requested by `key` against the rules of `tag`
    pub fn check_destination(&self, tag: &str, key: &str, destination: &str) -> Option<i64> {
        let uid = self.users.get(tag)?.get(key)?.uid;
        let rule_id = self.rules.check(tag, uid, destination)?;
        log::debug!(tag = tag, uid = uid, rule_id = rule_id, "Destination matched rule");
        Some(rule_id)
    }

    pub fn has_inbound(&self, tag: &str) -> bool {
        self.inbounds.contains_key(tag)
    }

    pub fn has_outbound(&self, tag: &str) -> bool {
        self.outbounds.contains_key(tag)
    }

    pub fn inbound(&self, tag: &str) -> Option<InboundConfig> {
        self.inbounds.get(tag).map(|i| i.value().clone())
    }

    pub fn outbound(&self, tag: &str) -> Option<OutboundConfig> {
        self.outbounds.get(tag).map(|o| o.value().clone())
    }

    /// Sorted user keys installed on `tag`
    pub fn user_keys(&self, tag: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .users
            .get(tag)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn user(&self, tag: &str, key: &str) -> Option<EngineUser> {
        self.users.get(tag)?.get(key).cloned()
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Number of installed inbounds
    pub fn inbound_count(&self) -> usize {
        self.inbounds.len()
    }

    fn require_inbound(&self, tag: &str) -> Result<()> {
        if self.inbounds.contains_key(tag) {
            Ok(())
        } else {
            Err(anyhow!("inbound {} does not exist", tag))
        }
    }
}

#[async_trait]
impl ProxyEngine for LocalEngine {
    async fn add_inbound(&self, config: InboundConfig) -> Result<()> {
        match self.inbounds.entry(config.tag.clone()) {
            Entry::Occupied(_) => bail!("inbound {} already exists", config.tag),
            Entry::Vacant(slot) => {
                log::debug!(
                    tag = %config.tag,
                    protocol = config.protocol.as_str(),
                    listen = %config.listen,
                    port = config.port,
                    tls = config.tls.is_some(),
                    "Inbound added"
                );
                slot.insert(config);
                Ok(())
            }
        }
    }

    async fn remove_inbound(&self, tag: &str) -> Result<()> {
        if self.inbounds.remove(tag).is_none() {
            bail!("inbound {} does not exist", tag);
        }
        let users = self.users.remove(tag).map(|(_, u)| u.len()).unwrap_or(0);
        self.rules.remove(tag);
        self.counters.purge_prefix(&format!("{}|", tag));
        log::debug!(tag = tag, users = users, "Inbound removed");
        Ok(())
    }

    async fn add_outbound(&self, config: OutboundConfig) -> Result<()> {
        match self.outbounds.entry(config.tag.clone()) {
            Entry::Occupied(_) => bail!("outbound {} already exists", config.tag),
            Entry::Vacant(slot) => {
                log::debug!(tag = %config.tag, "Outbound added");
                slot.insert(config);
                Ok(())
            }
        }
    }

    async fn remove_outbound(&self, tag: &str) -> Result<()> {
        if self.outbounds.remove(tag).is_none() {
            bail!("outbound {} does not exist", tag);
        }
        log::debug!(tag = tag, "Outbound removed");
        Ok(())
    }

    async fn add_users(&self, users: Vec<EngineUser>, tag: &str) -> Result<()> {
        self.require_inbound(tag)?;
        let mut installed = self.users.entry(tag.to_string()).or_default();
        for user in users {
            installed.insert(user.key.clone(), user);
        }
        Ok(())
    }

    async fn remove_users(&self, keys: &[String], tag: &str) -> Result<()> {
        self.require_inbound(tag)?;
        if let Some(mut installed) = self.users.get_mut(tag) {
            for key in keys {
                installed.remove(key);
            }
        }
        self.limiter.remove_users(tag, keys);
        Ok(())
    }

    async fn add_inbound_limiter(&self, tag: &str, speed_limit: u64, users: &[UserInfo]) -> Result<()> {
        self.limiter.add(tag, speed_limit, users);
        Ok(())
    }

    async fn update_inbound_limiter(&self, tag: &str, users: &[UserInfo]) -> Result<()> {
        if !self.limiter.update(tag, users) {
            bail!("limiter {} does not exist", tag);
        }
        Ok(())
    }

    async fn delete_inbound_limiter(&self, tag: &str) -> Result<()> {
        if !self.limiter.delete(tag) {
            bail!("limiter {} does not exist", tag);
        }
        Ok(())
    }

    async fn update_rule(&self, tag: &str, rules: &[DetectRule]) -> Result<()> {
        self.require_inbound(tag)?;
        self.rules.update(tag, rules)
    }

    async fn get_traffic(&self, key: &str) -> (u64, u64) {
        self.counters.take(key)
    }

    async fn get_online_devices(&self, tag: &str) -> Result<Vec<OnlineUser>> {
        Ok(self.limiter.drain_online(tag))
    }

    async fn get_detect_results(&self, tag: &str) -> Result<Vec<DetectResult>> {
        Ok(self.rules.drain_hits(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::objects::{Account, DomainStrategy, InboundProtocol, Transport};

    const TAG: &str = "Trojan_443";

    fn inbound(tag: &str) -> InboundConfig {
        InboundConfig {
            tag: tag.to_string(),
            listen: "0.0.0.0".to_string(),
            port: 443,
            protocol: InboundProtocol::Trojan,
            transport: Transport::Tcp,
            tls: None,
            sniffing: true,
        }
    }

    fn outbound(tag: &str) -> OutboundConfig {
        OutboundConfig {
            tag: tag.to_string(),
            send_through: None,
            domain_strategy: DomainStrategy::AsIs,
        }
    }

    fn engine_user(uid: i64) -> EngineUser {
        EngineUser {
            key: format!("{}|u{}|{}", TAG, uid, uid),
            uid,
            account: Account::Trojan {
                password: format!("pw{}", uid),
            },
        }
    }

    fn user_info(uid: i64) -> UserInfo {
        UserInfo {
            uid,
            email: format!("u{}", uid),
            uuid: format!("pw{}", uid),
            passwd: String::new(),
            method: String::new(),
            speed_limit: 0,
            device_limit: 0,
        }
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_tags() {
        let engine = LocalEngine::new();
        engine.add_inbound(inbound(TAG)).await.unwrap();
        assert!(engine.add_inbound(inbound(TAG)).await.is_err());

        engine.add_outbound(outbound(TAG)).await.unwrap();
        assert!(engine.add_outbound(outbound(TAG)).await.is_err());

        assert!(engine.remove_inbound("V2ray_80").await.is_err());
        assert!(engine.remove_outbound("V2ray_80").await.is_err());
        assert!(engine.delete_inbound_limiter(TAG).await.is_err());
    }

    #[tokio::test]
    async fn test_users_require_inbound() {
        let engine = LocalEngine::new();
        assert!(engine.add_users(vec![engine_user(1)], TAG).await.is_err());

        engine.add_inbound(inbound(TAG)).await.unwrap();
        engine.add_users(vec![engine_user(1), engine_user(2)], TAG).await.unwrap();
        assert_eq!(engine.user_keys(TAG).len(), 2);

        engine.remove_users(&[engine_user(1).key], TAG).await.unwrap();
        assert_eq!(engine.user_keys(TAG), vec![engine_user(2).key]);
    }

    #[tokio::test]
    async fn test_remove_inbound_drops_tag_state() {
        let engine = LocalEngine::new();
        engine.add_inbound(inbound(TAG)).await.unwrap();
        engine.add_users(vec![engine_user(1)], TAG).await.unwrap();
        engine
            .update_rule(TAG, &[DetectRule { id: 1, pattern: "x".to_string() }])
            .await
            .unwrap();
        engine.record_upload(&engine_user(1).key, 10);

        engine.remove_inbound(TAG).await.unwrap();
        assert!(!engine.has_inbound(TAG));
        assert!(engine.user_keys(TAG).is_empty());
        assert_eq!(engine.rules().rule_count(TAG), 0);
        assert_eq!(engine.get_traffic(&engine_user(1).key).await, (0, 0));
    }

    #[tokio::test]
    async fn test_traffic_is_consumed() {
        let engine = LocalEngine::new();
        let key = engine_user(1).key;
        engine.record_upload(&key, 100);
        engine.record_download(&key, 300);

        assert_eq!(engine.get_traffic(&key).await, (100, 300));
        assert_eq!(engine.get_traffic(&key).await, (0, 0));
    }

    #[tokio::test]
    async fn test_online_and_detections_drain() {
        let engine = LocalEngine::new();
        engine.add_inbound(inbound(TAG)).await.unwrap();
        engine.add_users(vec![engine_user(1)], TAG).await.unwrap();
        engine.add_inbound_limiter(TAG, 0, &[user_info(1)]).await.unwrap();
        engine
            .update_rule(TAG, &[DetectRule { id: 9, pattern: "blocked".to_string() }])
            .await
            .unwrap();

        let key = engine_user(1).key;
        assert!(matches!(
            engine.record_online(TAG, &key, "10.0.0.1"),
            Admission::Allowed { .. }
        ));
        assert_eq!(engine.check_destination(TAG, &key, "blocked.example"), Some(9));
        assert_eq!(engine.check_destination(TAG, "nobody", "blocked.example"), None);

        let online = engine.get_online_devices(TAG).await.unwrap();
        assert_eq!(online, vec![OnlineUser { uid: 1, ip: "10.0.0.1".to_string() }]);
        assert!(engine.get_online_devices(TAG).await.unwrap().is_empty());

        let hits = engine.get_detect_results(TAG).await.unwrap();
        assert_eq!(hits, vec![DetectResult { uid: 1, rule_id: 9 }]);
        assert!(engine.get_detect_results(TAG).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_rule_rejects_invalid_pattern() {
        let engine = LocalEngine::new();
        engine.add_inbound(inbound(TAG)).await.unwrap();
        let rules = [DetectRule { id: 1, pattern: "[".to_string() }];
        assert!(engine.update_rule(TAG, &rules).await.is_err());
    }
}
