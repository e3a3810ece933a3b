//! Local repetition analysis over the recent action log.
//!
//! The detector is deliberately heuristic: the productivity discount is a
//! keyword/diff check over free-form observation text and can misclassify.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::optimizer::action_key;
use crate::planner::{SubGoal, SubGoalType};

const SAME_ACTION_WINDOW: usize = 10;
const SAME_ACTION_MIN_OCCURRENCES: usize = 4;
const CONSECUTIVE_SNAPSHOT_LIMIT: usize = 3;
const SNAPSHOT_WAIT_WINDOW: usize = 6;
const SNAPSHOT_WAIT_MIN_OCCURRENCES: usize = 2;

const PROGRESS_KEYWORDS: &[&str] = &[
    "success",
    "completed",
    "extracted",
    "found",
    "loaded",
    "opened",
    "clicked",
    "filled",
    "navigated",
];

const VIDEO_MARKERS: &[&str] = &["[video]", "now playing", "video is playing"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopPattern {
    SameActionDifferentArgs,
    PageNavigation,
    ConsecutiveSnapshots,
    SnapshotWaitSnapshot,
    RepeatedAction,
    RepeatedGetUrl,
    ExcessiveSnapshots,
    ExcessiveWaits,
}

impl LoopPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopPattern::SameActionDifferentArgs => "sameActionDifferentArgs",
            LoopPattern::PageNavigation => "pageNavigation",
            LoopPattern::ConsecutiveSnapshots => "consecutiveSnapshots",
            LoopPattern::SnapshotWaitSnapshot => "snapshotWaitSnapshot",
            LoopPattern::RepeatedAction => "repeatedAction",
            LoopPattern::RepeatedGetUrl => "repeatedGetUrl",
            LoopPattern::ExcessiveSnapshots => "excessiveSnapshots",
            LoopPattern::ExcessiveWaits => "excessiveWaits",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopDetectionResult {
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<LoopPattern>,
    /// Escalation key; stable across detections of the same loop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_key: Option<String>,
    pub confidence: f64,
    pub productive: bool,
    /// The observed state is a successful terminal one (a video is playing).
    pub can_finish: bool,
}

impl LoopDetectionResult {
    pub fn clear() -> Self {
        Self {
            detected: false,
            reason: None,
            pattern: None,
            pattern_key: None,
            confidence: 0.0,
            productive: false,
            can_finish: false,
        }
    }

    fn finishable() -> Self {
        Self {
            can_finish: true,
            ..Self::clear()
        }
    }

    fn hit(
        pattern: LoopPattern,
        pattern_key: String,
        reason: String,
        confidence: f64,
        productive: bool,
    ) -> Self {
        Self {
            detected: true,
            reason: Some(reason),
            pattern: Some(pattern),
            pattern_key: Some(pattern_key),
            confidence,
            productive,
            can_finish: false,
        }
    }
}

/// Per-pattern detection bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternStats {
    pub count: u32,
    pub detected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LoggedAction {
    action: String,
    key: String,
    args: Value,
}

#[derive(Debug, Clone)]
pub struct LoopDetector {
    action_window: usize,
    navigation_window: usize,
    observation_window: usize,
    actions: VecDeque<LoggedAction>,
    navigations: VecDeque<String>,
    observations: VecDeque<String>,
    stats: HashMap<LoopPattern, PatternStats>,
    completed_sub_goals: u32,
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::with_windows(15, 10, 5)
    }
}

impl LoopDetector {
    pub fn with_windows(action: usize, navigation: usize, observation: usize) -> Self {
        Self {
            action_window: action.max(1),
            navigation_window: navigation.max(1),
            observation_window: observation.max(2),
            actions: VecDeque::new(),
            navigations: VecDeque::new(),
            observations: VecDeque::new(),
            stats: HashMap::new(),
            completed_sub_goals: 0,
        }
    }

    pub fn reset(&mut self) {
        self.actions.clear();
        self.navigations.clear();
        self.observations.clear();
        self.stats.clear();
        self.completed_sub_goals = 0;
    }

    /// Record the action and its observation, then report the first matching
    /// loop pattern in priority order.
    pub fn detect_loop(&mut self, action: &str, args: &Value, observation: &str) -> LoopDetectionResult {
        self.push_action(action, args);
        if action == "navigate" {
            if let Some(url) = args.get("url").and_then(Value::as_str) {
                self.record_navigation(url);
            }
        }
        push_bounded(&mut self.observations, observation.to_string(), self.observation_window);

        let lowered = observation.to_lowercase();
        if VIDEO_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            debug!(target: "loop_detector", action, "video playing; loop check suppressed");
            return LoopDetectionResult::finishable();
        }

        let result = self.evaluate(action, args);
        if let Some(pattern) = result.pattern {
            let stats = self.stats.entry(pattern).or_default();
            stats.count += 1;
            stats.detected = true;
            debug!(
                target: "loop_detector",
                pattern = pattern.as_str(),
                confidence = result.confidence,
                productive = result.productive,
                "loop pattern matched"
            );
        }
        result
    }

    fn evaluate(&self, action: &str, args: &Value) -> LoopDetectionResult {
        let productive = self.is_productive_iteration(action);

        if let Some((name, distinct)) = self.same_action_different_args(action) {
            return LoopDetectionResult::hit(
                LoopPattern::SameActionDifferentArgs,
                format!("{}:{name}", LoopPattern::SameActionDifferentArgs.as_str()),
                format!(
                    "'{name}' repeated with {distinct} different argument sets in the last {SAME_ACTION_WINDOW} actions"
                ),
                if productive { 0.5 } else { 0.9 },
                productive,
            );
        }

        if let Some((a, b)) = self.alternating_navigation() {
            return LoopDetectionResult::hit(
                LoopPattern::PageNavigation,
                LoopPattern::PageNavigation.as_str().to_string(),
                format!("navigating back and forth between {a} and {b}"),
                0.95,
                false,
            );
        }

        let streak = self.snapshot_streak();
        if streak >= CONSECUTIVE_SNAPSHOT_LIMIT {
            return LoopDetectionResult::hit(
                LoopPattern::ConsecutiveSnapshots,
                LoopPattern::ConsecutiveSnapshots.as_str().to_string(),
                format!("{streak} snapshots in a row without acting on the page"),
                if productive { 0.6 } else { 0.85 },
                productive,
            );
        }

        let names = self.recent_names(SNAPSHOT_WAIT_WINDOW);
        let occurrences = count_snapshot_wait_snapshot(&names);
        if occurrences >= SNAPSHOT_WAIT_MIN_OCCURRENCES {
            return LoopDetectionResult::hit(
                LoopPattern::SnapshotWaitSnapshot,
                LoopPattern::SnapshotWaitSnapshot.as_str().to_string(),
                format!("snapshot/wait/snapshot cycle seen {occurrences} times"),
                if productive { 0.5 } else { 0.8 },
                productive,
            );
        }

        self.legacy_patterns(action, args, productive)
    }

    fn legacy_patterns(&self, action: &str, args: &Value, productive: bool) -> LoopDetectionResult {
        let key = action_key(action, args);
        let exact = self.actions.iter().filter(|entry| entry.key == key).count();
        if exact >= 3 {
            return LoopDetectionResult::hit(
                LoopPattern::RepeatedAction,
                format!("{}:{key}", LoopPattern::RepeatedAction.as_str()),
                format!("'{action}' repeated {exact} times with identical arguments"),
                1.0,
                productive,
            );
        }

        let count = |name: &str| self.actions.iter().filter(|entry| entry.action == name).count();
        let checks = [
            ("getUrl", 2, LoopPattern::RepeatedGetUrl, 0.8),
            ("snapshot", 5, LoopPattern::ExcessiveSnapshots, 0.75),
            ("wait", 4, LoopPattern::ExcessiveWaits, 0.7),
        ];
        for (name, threshold, pattern, confidence) in checks {
            let seen = count(name);
            if seen >= threshold {
                return LoopDetectionResult::hit(
                    pattern,
                    pattern.as_str().to_string(),
                    format!("'{name}' called {seen} times in the recent window"),
                    confidence,
                    productive,
                );
            }
        }

        LoopDetectionResult::clear()
    }

    /// Same name, `>3` times in the last ten actions, with at least two
    /// distinct argument sets. `wait` and `navigate` have their own checks.
    fn same_action_different_args(&self, action: &str) -> Option<(String, usize)> {
        if matches!(action, "wait" | "navigate") {
            return None;
        }
        let recent: Vec<&LoggedAction> = self
            .actions
            .iter()
            .rev()
            .take(SAME_ACTION_WINDOW)
            .filter(|entry| entry.action == action)
            .collect();
        if recent.len() < SAME_ACTION_MIN_OCCURRENCES {
            return None;
        }
        let distinct: HashSet<&str> = recent.iter().map(|entry| entry.key.as_str()).collect();
        (distinct.len() >= 2).then(|| (action.to_string(), distinct.len()))
    }

    fn alternating_navigation(&self) -> Option<(String, String)> {
        if self.navigations.len() < 4 {
            return None;
        }
        let last: Vec<&String> = self.navigations.iter().rev().take(4).collect();
        let (d, c, b, a) = (last[0], last[1], last[2], last[3]);
        (a == c && b == d && a != b).then(|| (a.clone(), b.clone()))
    }

    fn snapshot_streak(&self) -> usize {
        let mut streak = 0;
        for entry in self.actions.iter().rev() {
            match entry.action.as_str() {
                "snapshot" => streak += 1,
                "wait" => continue,
                _ => break,
            }
        }
        streak
    }

    fn recent_names(&self, window: usize) -> Vec<&str> {
        let skip = self.actions.len().saturating_sub(window);
        self.actions
            .iter()
            .skip(skip)
            .map(|entry| entry.action.as_str())
            .collect()
    }

    /// Whether the current repetition still shows signs of progress.
    pub fn is_productive_iteration(&self, action: &str) -> bool {
        if self.completed_sub_goals > 0 {
            return true;
        }

        let mut latest = self.observations.iter().rev();
        if let (Some(last), Some(previous)) = (latest.next(), latest.next()) {
            if last != previous {
                return true;
            }
        }

        let group: &[&str] = match action {
            "getText" | "getMarkdown" => &["getText", "getMarkdown"],
            "navigate" => &["navigate"],
            "click" => &["click"],
            _ => &[],
        };
        if !group.is_empty() {
            let targets: Vec<String> = self
                .actions
                .iter()
                .rev()
                .take(SAME_ACTION_WINDOW)
                .filter(|entry| group.contains(&entry.action.as_str()))
                .map(target_of)
                .collect();
            if targets.len() >= 2 {
                let unique: HashSet<&String> = targets.iter().collect();
                if unique.len() == targets.len() {
                    return true;
                }
            }
        }

        self.observations.back().is_some_and(|last| {
            let lowered = last.to_lowercase();
            PROGRESS_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
        })
    }

    /// Pattern-specific suggestions; the last entry always offers `finished`.
    pub fn get_alternatives(
        &self,
        result: &LoopDetectionResult,
        current_sub_goal: Option<&SubGoal>,
    ) -> Vec<String> {
        let mut alternatives: Vec<String> = match result.pattern {
            Some(LoopPattern::SameActionDifferentArgs) => vec![
                "Use getText or getMarkdown to read the content instead of repeated clicking"
                    .to_string(),
                "Pick one target and follow it through before trying another".to_string(),
            ],
            Some(LoopPattern::PageNavigation) => vec![
                "Stop navigating back and forth; stay on one page and extract what you need"
                    .to_string(),
            ],
            Some(LoopPattern::ConsecutiveSnapshots) | Some(LoopPattern::ExcessiveSnapshots) => vec![
                "Act on the refs from the latest snapshot (click, fill or getText)".to_string(),
                "Use getMarkdown to read the page content".to_string(),
            ],
            Some(LoopPattern::SnapshotWaitSnapshot) | Some(LoopPattern::ExcessiveWaits) => vec![
                "The page is not changing; waiting longer will not help".to_string(),
                "Extract content with getMarkdown and move on".to_string(),
            ],
            Some(LoopPattern::RepeatedAction) => vec![
                "The same call keeps producing the same result; try a different action".to_string(),
            ],
            Some(LoopPattern::RepeatedGetUrl) => vec![
                "The URL is already known; continue with the next step".to_string(),
            ],
            None => Vec::new(),
        };

        if let Some(goal) = current_sub_goal {
            let hint = match goal.goal_type {
                SubGoalType::ContentExtraction => {
                    "Extract the content with getMarkdown and report it".to_string()
                }
                SubGoalType::Search => "Use search(text) once and inspect the results".to_string(),
                SubGoalType::Navigation => "Navigate directly to the target URL".to_string(),
                _ => format!("Focus on the current sub-goal: {}", goal.description),
            };
            alternatives.push(hint);
        }

        alternatives.push("Call finished() if the task is already done".to_string());
        alternatives
    }

    /// Feed a navigation caused by click or search, not only `navigate`.
    pub fn record_navigation(&mut self, url: &str) {
        push_bounded(&mut self.navigations, url.to_string(), self.navigation_window);
    }

    pub fn note_sub_goal_completed(&mut self) {
        self.completed_sub_goals += 1;
    }

    pub fn pattern_stats(&self, pattern: LoopPattern) -> PatternStats {
        self.stats.get(&pattern).copied().unwrap_or_default()
    }

    pub fn action_log_len(&self) -> usize {
        self.actions.len()
    }

    pub fn navigation_log_len(&self) -> usize {
        self.navigations.len()
    }

    pub fn observation_log_len(&self) -> usize {
        self.observations.len()
    }

    pub fn windows(&self) -> (usize, usize, usize) {
        (self.action_window, self.navigation_window, self.observation_window)
    }

    fn push_action(&mut self, action: &str, args: &Value) {
        let entry = LoggedAction {
            action: action.to_string(),
            key: action_key(action, args),
            args: args.clone(),
        };
        push_bounded(&mut self.actions, entry, self.action_window);
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, item: T, limit: usize) {
    log.push_back(item);
    while log.len() > limit {
        log.pop_front();
    }
}

fn target_of(entry: &LoggedAction) -> String {
    ["ref", "url", "selector"]
        .iter()
        .find_map(|field| entry.args.get(*field).map(Value::to_string))
        .unwrap_or_else(|| entry.key.clone())
}

/// Overlapping occurrences of `[snapshot, wait, snapshot]`.
fn count_snapshot_wait_snapshot(names: &[&str]) -> usize {
    names
        .windows(3)
        .filter(|window| *window == ["snapshot", "wait", "snapshot"])
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn three_identical_snapshots_are_a_consecutive_snapshot_loop() {
        let mut detector = LoopDetector::default();
        let args = json!({});
        assert!(!detector.detect_loop("snapshot", &args, "page tree").detected);
        assert!(!detector.detect_loop("snapshot", &args, "page tree").detected);
        let result = detector.detect_loop("snapshot", &args, "page tree");
        assert!(result.detected);
        assert_eq!(result.pattern, Some(LoopPattern::ConsecutiveSnapshots));
        assert_eq!(result.confidence, 0.85);
        assert!(!result.productive);
        assert_eq!(
            detector.pattern_stats(LoopPattern::ConsecutiveSnapshots).count,
            1
        );
    }

    #[test]
    fn waits_do_not_break_a_snapshot_streak() {
        let mut detector = LoopDetector::default();
        let args = json!({});
        detector.detect_loop("snapshot", &args, "tree");
        detector.detect_loop("wait", &json!({"ms": 500}), "tree");
        detector.detect_loop("snapshot", &args, "tree");
        detector.detect_loop("wait", &json!({"ms": 500}), "tree");
        let result = detector.detect_loop("snapshot", &args, "tree");
        assert_eq!(result.pattern, Some(LoopPattern::ConsecutiveSnapshots));
    }

    #[test]
    fn alternating_navigation_is_never_productive() {
        let mut detector = LoopDetector::default();
        let urls = ["https://a.example", "https://b.example"];
        let mut last = LoopDetectionResult::clear();
        for (i, url) in urls.iter().cycle().take(4).enumerate() {
            last = detector.detect_loop("navigate", &json!({"url": url}), &format!("navigated {i}"));
        }
        assert!(last.detected);
        assert_eq!(last.pattern, Some(LoopPattern::PageNavigation));
        assert_eq!(last.confidence, 0.95);
        assert!(!last.productive);
    }

    #[test]
    fn same_action_with_different_args_is_discounted_when_productive() {
        let mut detector = LoopDetector::default();
        let mut last = LoopDetectionResult::clear();
        for i in 0..4 {
            last = detector.detect_loop("click", &json!({"ref": format!("e{i}")}), "ok");
        }
        assert_eq!(last.pattern, Some(LoopPattern::SameActionDifferentArgs));
        // distinct click targets count as progress
        assert!(last.productive);
        assert_eq!(last.confidence, 0.5);
        assert_eq!(
            last.pattern_key.as_deref(),
            Some("sameActionDifferentArgs:click")
        );
    }

    #[test]
    fn same_action_with_overlapping_args_keeps_full_confidence() {
        let mut detector = LoopDetector::default();
        let mut last = LoopDetectionResult::clear();
        for element_ref in ["e1", "e2", "e1", "e2"] {
            last = detector.detect_loop("fill", &json!({"ref": element_ref, "text": "x"}), "ok");
        }
        assert_eq!(last.pattern, Some(LoopPattern::SameActionDifferentArgs));
        assert!(!last.productive);
        assert_eq!(last.confidence, 0.9);
    }

    #[test]
    fn exact_repeat_falls_back_to_legacy_pattern() {
        let mut detector = LoopDetector::default();
        let args = json!({"direction": "down"});
        detector.detect_loop("scroll", &args, "ok");
        detector.detect_loop("scroll", &args, "ok");
        let result = detector.detect_loop("scroll", &args, "ok");
        assert_eq!(result.pattern, Some(LoopPattern::RepeatedAction));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn second_get_url_is_flagged() {
        let mut detector = LoopDetector::default();
        detector.detect_loop("getUrl", &json!({}), "https://x.example");
        detector.detect_loop("click", &json!({"ref": "e1"}), "ok");
        let result = detector.detect_loop("getUrl", &json!({"again": true}), "https://x.example");
        assert_eq!(result.pattern, Some(LoopPattern::RepeatedGetUrl));
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn video_playing_marks_a_finishable_state() {
        let mut detector = LoopDetector::default();
        let args = json!({});
        detector.detect_loop("snapshot", &args, "tree");
        detector.detect_loop("snapshot", &args, "tree");
        let result = detector.detect_loop("snapshot", &args, "[VIDEO] The video is now playing");
        assert!(!result.detected);
        assert!(result.can_finish);
    }

    #[test]
    fn completed_sub_goal_makes_iterations_productive() {
        let mut detector = LoopDetector::default();
        detector.note_sub_goal_completed();
        let args = json!({});
        for _ in 0..3 {
            detector.detect_loop("snapshot", &args, "tree");
        }
        assert!(detector.is_productive_iteration("snapshot"));
    }

    #[test]
    fn snapshot_wait_snapshot_counts_overlapping_runs() {
        let names = ["snapshot", "wait", "snapshot", "wait", "snapshot", "click"];
        assert_eq!(count_snapshot_wait_snapshot(&names), 2);
        assert_eq!(count_snapshot_wait_snapshot(&["snapshot", "wait"]), 0);
    }

    #[test]
    fn logs_stay_within_windows() {
        let mut detector = LoopDetector::default();
        for i in 0..40 {
            detector.detect_loop("navigate", &json!({"url": format!("https://e.example/{i}")}), "ok");
        }
        assert_eq!(detector.action_log_len(), 15);
        assert_eq!(detector.navigation_log_len(), 10);
        assert_eq!(detector.observation_log_len(), 5);
    }

    #[test]
    fn alternatives_always_offer_finished() {
        let detector = LoopDetector::default();
        let result = LoopDetectionResult::hit(
            LoopPattern::PageNavigation,
            "pageNavigation".into(),
            "a/b".into(),
            0.95,
            false,
        );
        let goal = SubGoal::new(1, "Extract posts", SubGoalType::ContentExtraction, "content extracted", 3);
        let alternatives = detector.get_alternatives(&result, Some(&goal));
        assert!(alternatives[0].contains("back and forth"));
        assert!(alternatives.iter().any(|a| a.contains("getMarkdown")));
        assert!(alternatives.last().is_some_and(|a| a.contains("finished()")));
        assert_eq!(detector.get_alternatives(&LoopDetectionResult::clear(), None).len(), 1);
    }
}
