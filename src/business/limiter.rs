//! Per-tag speed and device limits

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

use crate::core::{OnlineUser, Tag, UserId, UserInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UserLimit {
    uid: UserId,
    speed_limit: u64,
    device_limit: u32,
}

/// Limiter state of one inbound
#[derive(Debug, Default)]
struct InboundLimiter {
    node_speed_limit: u64,
    /// Keyed by tag-qualified user key
    users: HashMap<String, UserLimit>,
    /// Source IPs seen since the last drain, per user key
    online: HashMap<String, HashSet<String>>,
}

/// Result of admitting a connection from a source IP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Allowed, with the effective rate in bytes per second (0 = unlimited)
    Allowed { rate: u64 },
    /// The user already has `device_limit` other IPs online
    DeviceLimitReached,
    /// No limiter entry for this user
    Unknown,
}

/// Speed and device limits for every inbound, keyed by tag
#[derive(Debug, Default)]
pub struct Limiter {
    inbounds: DashMap<String, InboundLimiter>,
}

/// Smallest non-zero of two limits, 0 when both are unlimited
pub fn effective_rate(node: u64, user: u64) -> u64 {
    match (node, user) {
        (0, u) => u,
        (n, 0) => n,
        (n, u) => n.min(u),
    }
}

fn user_limits<'a>(
    tag: &str,
    users: &'a [UserInfo],
) -> impl Iterator<Item = (String, UserLimit)> + 'a {
    let tag = Tag::from(tag);
    users.iter().map(move |u| {
        (
            tag.user_key(u),
            UserLimit {
                uid: u.uid,
                speed_limit: u.speed_limit,
                device_limit: u.device_limit,
            },
        )
    })
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the limiter of `tag`, replacing any previous one
    pub fn add(&self, tag: &str, node_speed_limit: u64, users: &[UserInfo]) {
        let limiter = InboundLimiter {
            node_speed_limit,
            users: user_limits(tag, users).collect(),
            online: HashMap::new(),
        };
        self.inbounds.insert(tag.to_string(), limiter);
    }

    /// Insert or refresh users. Returns false when `tag` has no limiter.
    pub fn update(&self, tag: &str, users: &[UserInfo]) -> bool {
        match self.inbounds.get_mut(tag) {
            Some(mut limiter) => {
                limiter.users.extend(user_limits(tag, users));
                true
            }
            None => false,
        }
    }

    pub fn remove_users(&self, tag: &str, keys: &[String]) {
        if let Some(mut limiter) = self.inbounds.get_mut(tag) {
            for key in keys {
                limiter.users.remove(key);
                limiter.online.remove(key);
            }
        }
    }

    /// Delete the limiter of `tag`. Returns false when none existed.
    pub fn delete(&self, tag: &str) -> bool {
        self.inbounds.remove(tag).is_some()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.inbounds.contains_key(tag)
    }

    /// Number of users tracked for `tag`
    pub fn user_count(&self, tag: &str) -> usize {
        self.inbounds.get(tag).map(|l| l.users.len()).unwrap_or(0)
    }

    /// Admit a connection of `key` from `ip`, recording the device as online
    pub fn admit(&self, tag: &str, key: &str, ip: &str) -> Admission {
        let Some(mut limiter) = self.inbounds.get_mut(tag) else {
            return Admission::Unknown;
        };
        let Some(user) = limiter.users.get(key).copied() else {
            return Admission::Unknown;
        };
        let rate = effective_rate(limiter.node_speed_limit, user.speed_limit);

        let ips = limiter.online.entry(key.to_string()).or_default();
        if ips.contains(ip) {
            return Admission::Allowed { rate };
        }
        if user.device_limit > 0 && ips.len() >= user.device_limit as usize {
            return Admission::DeviceLimitReached;
        }
        ips.insert(ip.to_string());
        Admission::Allowed { rate }
    }

    /// Return and clear the devices seen on `tag` since the last call
    pub fn drain_online(&self, tag: &str) -> Vec<OnlineUser> {
        let Some(mut limiter) = self.inbounds.get_mut(tag) else {
            return Vec::new();
        };
        let online = std::mem::take(&mut limiter.online);

        let mut result: Vec<OnlineUser> = online
            .into_iter()
            .filter_map(|(key, ips)| limiter.users.get(&key).map(|u| (u.uid, ips)))
            .flat_map(|(uid, ips)| ips.into_iter().map(move |ip| OnlineUser { uid, ip }))
            .collect();
        result.sort_by(|a, b| a.uid.cmp(&b.uid).then_with(|| a.ip.cmp(&b.ip)));
        result
    }
}
