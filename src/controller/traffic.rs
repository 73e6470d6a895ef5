//! Traffic reporting
//!
//! The only place that reads engine traffic counters. Every read consumes the
//! counter, so each collected value must be reported exactly once.

use crate::core::{PanelApi, ProxyEngine, Tag, UserInfo, UserTraffic};
use crate::logger::log;

/// Format bytes into human-readable string (KB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Consume the counters of every user and keep the ones with traffic
pub async fn collect_user_traffic(
    engine: &dyn ProxyEngine,
    tag: &Tag,
    users: &[UserInfo],
) -> Vec<UserTraffic> {
    let mut traffic = Vec::new();
    for user in users {
        let (upload, download) = engine.get_traffic(&tag.user_key(user)).await;
        if upload > 0 || download > 0 {
            traffic.push(UserTraffic {
                uid: user.uid,
                email: user.email.clone(),
                upload,
                download,
            });
        }
    }
    traffic
}

/// Collect and submit user traffic. Returns the number of users reported.
pub async fn report_traffic(
    api: &dyn PanelApi,
    engine: &dyn ProxyEngine,
    tag: &Tag,
    users: &[UserInfo],
) -> usize {
    let traffic = collect_user_traffic(engine, tag, users).await;
    if traffic.is_empty() {
        return 0;
    }

    let count = traffic.len();
    let total_upload: u64 = traffic.iter().map(|t| t.upload).sum();
    let total_download: u64 = traffic.iter().map(|t| t.download).sum();

    match api.report_user_traffic(&traffic).await {
        Ok(()) => {
            log::info!(
                tag = %tag,
                users = count,
                upload = %format_bytes(total_upload),
                download = %format_bytes(total_download),
                "Traffic reported"
            );
            count
        }
        Err(e) => {
            // Counters are already consumed; this window's traffic is dropped.
            log::warn!(
                tag = %tag,
                users = count,
                error = %e,
                "Failed to report traffic"
            );
            0
        }
    }
}
