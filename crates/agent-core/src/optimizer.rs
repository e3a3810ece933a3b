//! Cheap local guardrails that reject provably wasteful actions before they
//! reach the browser.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use webpilot_core_types::PageSnapshot;

use crate::planner::SubGoal;

/// Verdict of [`ExecutionOptimizer::validate_action`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            valid: true,
            reason: None,
            alternative: None,
        }
    }

    pub fn blocked(reason: impl Into<String>, alternative: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            alternative: Some(alternative.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerLimits {
    /// Snapshots allowed back to back; the next one is rejected.
    pub max_consecutive_snapshots: u32,
    pub max_get_url_per_sub_goal: u32,
    /// Failed attempts allowed per `action:args` key.
    pub max_retries: u32,
    pub history_limit: usize,
}

impl Default for OptimizerLimits {
    fn default() -> Self {
        Self {
            max_consecutive_snapshots: 2,
            max_get_url_per_sub_goal: 1,
            max_retries: 2,
            history_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionOptimizer {
    limits: OptimizerLimits,
    consecutive_snapshots: u32,
    get_url_count: u32,
    // never cleared by reset_for_sub_goal: failures carry over between sub-goals
    retry_counts: HashMap<String, u32>,
    snapshot_cache: HashMap<u32, PageSnapshot>,
    // action keys, oldest first
    history: VecDeque<String>,
}

impl ExecutionOptimizer {
    pub fn new(limits: OptimizerLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn validate_action(
        &self,
        action: &str,
        _args: &Value,
        current_sub_goal: Option<&SubGoal>,
    ) -> ValidationResult {
        match action {
            "snapshot" if self.consecutive_snapshots >= self.limits.max_consecutive_snapshots => {
                ValidationResult::blocked(
                    format!(
                        "{} snapshots in a row without acting on them",
                        self.consecutive_snapshots
                    ),
                    "Use the refs from the latest snapshot: click, fill, getText or getMarkdown",
                )
            }
            "getUrl" if self.get_url_count >= self.limits.max_get_url_per_sub_goal => {
                let scope = current_sub_goal
                    .map(|goal| format!("sub-goal {}", goal.id))
                    .unwrap_or_else(|| "this task".to_string());
                ValidationResult::blocked(
                    format!("URL already checked during {scope}"),
                    "The URL has not changed since the last check; continue with the next action",
                )
            }
            _ => ValidationResult::allowed(),
        }
    }

    /// Fold an executed action into the counters. Failures count toward the
    /// retry limit of their `action:args` key.
    pub fn record_action(&mut self, action: &str, args: &Value, success: bool) {
        let key = self.track(action, args);
        if !success {
            *self.retry_counts.entry(key).or_insert(0) += 1;
        }
    }

    /// Fold an action that never reached the browser (rejected by a rule or
    /// not a known action). It moves the streak counters and the history but
    /// is not a failed attempt, so it never uses up retries.
    pub fn record_blocked(&mut self, action: &str, args: &Value) {
        self.track(action, args);
    }

    fn track(&mut self, action: &str, args: &Value) -> String {
        if action == "snapshot" {
            self.consecutive_snapshots += 1;
        } else {
            self.consecutive_snapshots = 0;
        }
        if action == "getUrl" {
            self.get_url_count += 1;
        }

        let key = action_key(action, args);
        self.history.push_back(key.clone());
        while self.history.len() > self.limits.history_limit {
            self.history.pop_front();
        }
        key
    }

    pub fn can_retry(&self, action: &str, args: &Value) -> bool {
        self.retry_count(action, args) < self.limits.max_retries
    }

    pub fn retry_count(&self, action: &str, args: &Value) -> u32 {
        self.retry_counts
            .get(&action_key(action, args))
            .copied()
            .unwrap_or(0)
    }

    pub fn cached_snapshot(&self, sub_goal_id: u32) -> Option<&PageSnapshot> {
        self.snapshot_cache.get(&sub_goal_id)
    }

    pub fn cache_snapshot(&mut self, sub_goal_id: u32, snapshot: PageSnapshot) {
        self.snapshot_cache.insert(sub_goal_id, snapshot);
    }

    pub fn clear_cache(&mut self) {
        self.snapshot_cache.clear();
    }

    /// `false` when `target` and `current` normalise to the same page.
    pub fn is_navigation_needed(&self, target: &str, current: Option<&str>) -> bool {
        match current {
            Some(current) => normalize_url(target) != normalize_url(current),
            None => true,
        }
    }

    pub fn reset_for_sub_goal(&mut self, sub_goal_id: Option<u32>) {
        debug!(target: "optimizer", ?sub_goal_id, "resetting per-sub-goal counters");
        self.consecutive_snapshots = 0;
        self.get_url_count = 0;
        self.clear_cache();
    }

    pub fn consecutive_snapshots(&self) -> u32 {
        self.consecutive_snapshots
    }

    pub fn get_url_count(&self) -> u32 {
        self.get_url_count
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

/// Key shared by the optimizer and the loop detector: `action:JSON(args)`.
pub fn action_key(action: &str, args: &Value) -> String {
    format!("{action}:{args}")
}

/// Origin + path without trailing slash + query; the fragment is dropped.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(parsed) => {
            let origin = parsed.origin().ascii_serialization();
            let path = parsed.path().trim_end_matches('/');
            match parsed.query() {
                Some(query) => format!("{origin}{path}?{query}"),
                None => format!("{origin}{path}"),
            }
        }
        Err(_) => trimmed
            .split('#')
            .next()
            .unwrap_or(trimmed)
            .trim_end_matches('/')
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn third_consecutive_snapshot_is_rejected() {
        let mut optimizer = ExecutionOptimizer::default();
        let args = json!({});
        assert!(optimizer.validate_action("snapshot", &args, None).valid);
        optimizer.record_action("snapshot", &args, true);
        assert!(optimizer.validate_action("snapshot", &args, None).valid);
        optimizer.record_action("snapshot", &args, true);
        let verdict = optimizer.validate_action("snapshot", &args, None);
        assert!(!verdict.valid);
        assert!(verdict.alternative.is_some());

        optimizer.record_action("click", &json!({"ref": "e1"}), true);
        assert!(optimizer.validate_action("snapshot", &args, None).valid);
    }

    #[test]
    fn second_get_url_in_sub_goal_is_rejected() {
        let mut optimizer = ExecutionOptimizer::default();
        let args = json!({});
        assert!(optimizer.validate_action("getUrl", &args, None).valid);
        optimizer.record_action("getUrl", &args, true);
        assert!(!optimizer.validate_action("getUrl", &args, None).valid);

        optimizer.reset_for_sub_goal(Some(2));
        assert_eq!(optimizer.get_url_count(), 0);
        assert_eq!(optimizer.consecutive_snapshots(), 0);
        assert!(optimizer.validate_action("getUrl", &args, None).valid);
    }

    #[test]
    fn retry_counts_survive_sub_goal_reset() {
        let mut optimizer = ExecutionOptimizer::default();
        let args = json!({"ref": "e9"});
        optimizer.record_action("click", &args, false);
        assert!(optimizer.can_retry("click", &args));
        optimizer.reset_for_sub_goal(Some(1));
        optimizer.record_action("click", &args, false);
        assert!(!optimizer.can_retry("click", &args));
        assert!(optimizer.can_retry("click", &json!({"ref": "e10"})));
    }

    #[test]
    fn blocked_actions_never_use_up_retries() {
        let mut optimizer = ExecutionOptimizer::default();
        let args = json!({});
        optimizer.record_action("snapshot", &args, true);
        optimizer.record_action("snapshot", &args, true);
        for _ in 0..4 {
            assert!(!optimizer.validate_action("snapshot", &args, None).valid);
            optimizer.record_blocked("snapshot", &args);
        }
        assert_eq!(optimizer.retry_count("snapshot", &args), 0);
        assert_eq!(optimizer.consecutive_snapshots(), 6);

        optimizer.record_action("click", &json!({"ref": "e2"}), true);
        assert!(optimizer.validate_action("snapshot", &args, None).valid);
        assert!(optimizer.can_retry("snapshot", &args));

        optimizer.record_action("getUrl", &args, true);
        optimizer.record_blocked("getUrl", &args);
        optimizer.record_blocked("getUrl", &args);
        optimizer.reset_for_sub_goal(Some(2));
        assert!(optimizer.validate_action("getUrl", &args, None).valid);
        assert!(optimizer.can_retry("getUrl", &args));
    }

    #[test]
    fn snapshot_cache_is_per_sub_goal_and_cleared_on_reset() {
        let mut optimizer = ExecutionOptimizer::default();
        optimizer.cache_snapshot(1, PageSnapshot::new("tree", Default::default()));
        assert!(optimizer.cached_snapshot(1).is_some());
        assert!(optimizer.cached_snapshot(2).is_none());
        optimizer.reset_for_sub_goal(Some(1));
        assert!(optimizer.cached_snapshot(1).is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut optimizer = ExecutionOptimizer::default();
        for i in 0..25 {
            optimizer.record_action("scroll", &json!({"i": i}), true);
        }
        assert_eq!(optimizer.history_len(), 20);
    }

    #[test]
    fn navigation_check_normalises_urls() {
        let optimizer = ExecutionOptimizer::default();
        assert!(!optimizer.is_navigation_needed(
            "https://example.com/a/#top",
            Some("https://example.com/a")
        ));
        assert!(optimizer.is_navigation_needed(
            "https://example.com/a?page=2",
            Some("https://example.com/a?page=1")
        ));
        assert!(optimizer.is_navigation_needed("https://example.com", None));
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
        assert_eq!(normalize_url("not a url/#x"), "not a url");
    }
}
