//! Destination detection rules

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashSet;

use crate::core::{DetectResult, DetectRule, UserId};

#[derive(Debug)]
struct CompiledRule {
    id: i64,
    regex: Regex,
}

#[derive(Debug, Default)]
struct TagRules {
    rules: Vec<CompiledRule>,
    hits: HashSet<DetectResult>,
}

/// Compiled rule lists and pending detections, keyed by tag
#[derive(Debug, Default)]
pub struct RuleSet {
    tags: DashMap<String, TagRules>,
}

fn compile(rules: &[DetectRule]) -> Result<Vec<CompiledRule>> {
    rules
        .iter()
        .map(|rule| {
            Regex::new(&rule.pattern)
                .map(|regex| CompiledRule { id: rule.id, regex })
                .map_err(|e| anyhow!("Invalid pattern for rule {}: {}", rule.id, e))
        })
        .collect()
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rules of `tag`. Nothing changes if any pattern is invalid.
    /// Pending detections survive the replacement.
    pub fn update(&self, tag: &str, rules: &[DetectRule]) -> Result<()> {
        let compiled = compile(rules)?;
        self.tags.entry(tag.to_string()).or_default().rules = compiled;
        Ok(())
    }

    pub fn remove(&self, tag: &str) {
        self.tags.remove(tag);
    }

    /// Number of rules installed for `tag`
    pub fn rule_count(&self, tag: &str) -> usize {
        self.tags.get(tag).map(|t| t.rules.len()).unwrap_or(0)
    }

    /// Match `destination` for `uid` on `tag`. Returns the first matching rule
    /// id and records the hit.
    pub fn check(&self, tag: &str, uid: UserId, destination: &str) -> Option<i64> {
        let mut entry = self.tags.get_mut(tag)?;
        let rule_id = entry
            .rules
            .iter()
            .find(|rule| rule.regex.is_match(destination))
            .map(|rule| rule.id)?;
        entry.hits.insert(DetectResult { uid, rule_id });
        Some(rule_id)
    }

    /// Return and clear the detections recorded on `tag`
    pub fn drain_hits(&self, tag: &str) -> Vec<DetectResult> {
        let Some(mut entry) = self.tags.get_mut(tag) else {
            return Vec::new();
        };
        let mut hits: Vec<DetectResult> = std::mem::take(&mut entry.hits).into_iter().collect();
        hits.sort_by_key(|hit| (hit.uid, hit.rule_id));
        hits
    }
}
