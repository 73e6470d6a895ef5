//! Rule list management
//!
//! A fetched rule list replaces the engine's rules only when it is non-empty.
//! An empty list is read as "no change" and never clears applied rules.

use anyhow::{Context, Result};

use crate::core::{DetectRule, PanelApi, ProxyEngine, Tag};
use crate::logger::log;

/// Fetch the rule list and apply it when non-empty and different from
/// `applied`. Returns the newly applied list, or `None` when nothing changed.
pub async fn refresh_rules(
    api: &dyn PanelApi,
    engine: &dyn ProxyEngine,
    tag: &Tag,
    applied: &[DetectRule],
) -> Result<Option<Vec<DetectRule>>> {
    let rules = api.get_node_rule().await.context("get rule list failed")?;

    if rules.is_empty() {
        log::debug!(tag = %tag, "Empty rule list, keeping current rules");
        return Ok(None);
    }
    if rules == applied {
        return Ok(None);
    }

    engine
        .update_rule(tag.as_str(), &rules)
        .await
        .with_context(|| format!("update rules for {} failed", tag))?;

    log::info!(tag = %tag, count = rules.len(), "Rules updated");
    Ok(Some(rules))
}
