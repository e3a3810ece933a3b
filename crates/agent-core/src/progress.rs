//! Sub-goal sequencing.
//!
//! The tracker never decides whether a sub-goal is done; the control loop
//! does that and drives the cursor through [`ProgressTracker::complete_current_sub_goal`]
//! and [`ProgressTracker::skip_current_sub_goal`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::planner::SubGoal;

/// Steps a sub-goal may consume before it counts as stuck.
pub const DEFAULT_STUCK_THRESHOLD: u32 = 8;

/// Final report entry for a completed sub-goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionData {
    pub id: u32,
    pub description: String,
    pub steps_taken: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub progress: u32,
    pub completed_goals: Vec<CompletionData>,
}

/// Cursor-based state machine over the plan's sub-goals.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    sub_goals: Vec<SubGoal>,
    current: usize,
    step_counts: Vec<u32>,
    stuck_threshold: u32,
}

impl ProgressTracker {
    pub fn new(sub_goals: Vec<SubGoal>) -> Self {
        let step_counts = vec![0; sub_goals.len()];
        Self {
            sub_goals,
            current: 0,
            step_counts,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
        }
    }

    pub fn with_stuck_threshold(mut self, threshold: u32) -> Self {
        self.stuck_threshold = threshold;
        self
    }

    pub fn sub_goals(&self) -> &[SubGoal] {
        &self.sub_goals
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn step_counts(&self) -> &[u32] {
        &self.step_counts
    }

    /// `None` once the cursor reaches the end of the list.
    pub fn current_sub_goal(&self) -> Option<&SubGoal> {
        self.sub_goals.get(self.current)
    }

    pub fn current_step_count(&self) -> u32 {
        self.step_counts.get(self.current).copied().unwrap_or(0)
    }

    pub fn record_step(&mut self) {
        match self.step_counts.get_mut(self.current) {
            Some(count) => *count += 1,
            None => debug!(
                target: "progress",
                cursor = self.current,
                "record_step ignored: all sub-goals resolved"
            ),
        }
    }

    pub fn is_stuck(&self) -> bool {
        self.current_sub_goal().is_some() && self.current_step_count() > self.stuck_threshold
    }

    pub fn complete_current_sub_goal(&mut self, result: Option<Value>) {
        match self.sub_goals.get_mut(self.current) {
            Some(goal) if !goal.skipped => {
                goal.completed = true;
                goal.completed_at = Some(Utc::now());
                goal.result = result;
                debug!(target: "progress", id = goal.id, "sub-goal completed");
            }
            Some(goal) => warn!(
                target: "progress",
                id = goal.id,
                "sub-goal already skipped; not marking completed"
            ),
            None => warn!(
                target: "progress",
                cursor = self.current,
                "complete called without a current sub-goal"
            ),
        }
        self.advance();
    }

    pub fn skip_current_sub_goal(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        match self.sub_goals.get_mut(self.current) {
            Some(goal) if !goal.completed => {
                goal.skipped = true;
                warn!(target: "progress", id = goal.id, %reason, "sub-goal skipped");
                goal.skip_reason = Some(reason);
            }
            Some(goal) => warn!(
                target: "progress",
                id = goal.id,
                "sub-goal already completed; not marking skipped"
            ),
            None => warn!(
                target: "progress",
                cursor = self.current,
                "skip called without a current sub-goal"
            ),
        }
        self.advance();
    }

    fn advance(&mut self) {
        if self.current < self.sub_goals.len() {
            self.current += 1;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.sub_goals.len()
    }

    /// Percentage of the list the cursor has passed, rounded.
    pub fn progress(&self) -> u32 {
        if self.sub_goals.is_empty() {
            return 100;
        }
        ((self.current as f64 / self.sub_goals.len() as f64) * 100.0).round() as u32
    }

    pub fn completed_count(&self) -> usize {
        self.sub_goals.iter().filter(|g| g.completed).count()
    }

    pub fn context(&self) -> String {
        match self.current_sub_goal() {
            Some(goal) => format!(
                "Sub-Goal {}/{} ({}%): {}\nSteps on current sub-goal: {}\nCompletion criteria: {}",
                self.current + 1,
                self.sub_goals.len(),
                self.progress(),
                goal.description,
                self.current_step_count(),
                goal.completion_criteria
            ),
            None => "All sub-goals resolved (100% complete). Call finished() with the results."
                .to_string(),
        }
    }

    /// Report data for a completed sub-goal; `None` for anything else.
    pub fn completion_data(&self, sub_goal: &SubGoal) -> Option<CompletionData> {
        if !sub_goal.completed {
            return None;
        }
        let steps_taken = self
            .sub_goals
            .iter()
            .position(|g| g.id == sub_goal.id)
            .and_then(|idx| self.step_counts.get(idx).copied())
            .unwrap_or(0);
        Some(CompletionData {
            id: sub_goal.id,
            description: sub_goal.description.clone(),
            steps_taken,
            completed_at: sub_goal.completed_at,
            result: sub_goal.result.clone(),
        })
    }

    /// Resize the step-count vector to match the sub-goal list.
    pub(crate) fn repair_step_counts(&mut self) {
        self.step_counts.resize(self.sub_goals.len(), 0);
    }

    #[cfg(test)]
    pub(crate) fn step_counts_mut(&mut self) -> &mut Vec<u32> {
        &mut self.step_counts
    }

    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            total: self.sub_goals.len(),
            completed: self.completed_count(),
            skipped: self.sub_goals.iter().filter(|g| g.skipped).count(),
            progress: self.progress(),
            completed_goals: self
                .sub_goals
                .iter()
                .filter_map(|goal| self.completion_data(goal))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::SubGoalType;
    use serde_json::json;

    fn goals(n: u32) -> Vec<SubGoal> {
        (1..=n)
            .map(|id| {
                SubGoal::new(
                    id,
                    format!("goal {id}"),
                    SubGoalType::Composite,
                    "Step reported complete",
                    5,
                )
            })
            .collect()
    }

    #[test]
    fn stuck_after_ninth_step() {
        let mut tracker = ProgressTracker::new(goals(2));
        for _ in 0..8 {
            tracker.record_step();
        }
        assert!(!tracker.is_stuck());
        tracker.record_step();
        assert!(tracker.is_stuck());

        tracker.skip_current_sub_goal("stuck");
        assert!(!tracker.is_stuck());
        assert_eq!(tracker.current_step_count(), 0);
    }

    #[test]
    fn cursor_is_monotonic_and_bounded() {
        let mut tracker = ProgressTracker::new(goals(3));
        let mut last = tracker.current_index();
        for i in 0..6 {
            if i % 2 == 0 {
                tracker.complete_current_sub_goal(None);
            } else {
                tracker.skip_current_sub_goal("skip");
            }
            assert!(tracker.current_index() >= last);
            assert!(tracker.current_index() <= 3);
            last = tracker.current_index();
        }
        assert!(tracker.is_complete());
        assert!(tracker.current_sub_goal().is_none());
        assert_eq!(tracker.progress(), 100);
    }

    #[test]
    fn completed_and_skipped_are_exclusive() {
        let mut tracker = ProgressTracker::new(goals(2));
        tracker.complete_current_sub_goal(Some(json!({"items": 2})));
        tracker.skip_current_sub_goal("no luck");
        let [first, second] = tracker.sub_goals() else {
            panic!("expected two goals");
        };
        assert!(first.completed && !first.skipped);
        assert!(first.completed_at.is_some());
        assert!(second.skipped && !second.completed);
        assert_eq!(second.skip_reason.as_deref(), Some("no luck"));
    }

    #[test]
    fn context_and_summary() {
        let mut tracker = ProgressTracker::new(goals(3));
        tracker.record_step();
        assert_eq!(
            tracker.context(),
            "Sub-Goal 1/3 (0%): goal 1\nSteps on current sub-goal: 1\nCompletion criteria: Step reported complete"
        );
        tracker.complete_current_sub_goal(Some(json!("done")));
        assert!(tracker.context().starts_with("Sub-Goal 2/3 (33%)"));
        tracker.skip_current_sub_goal("skip");
        tracker.complete_current_sub_goal(None);
        assert!(tracker.context().contains("100% complete"));

        let summary = tracker.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.completed_goals.len(), 2);
        assert_eq!(summary.completed_goals[0].steps_taken, 1);
        assert!(tracker.completion_data(&tracker.sub_goals()[1]).is_none());
    }

    #[test]
    fn resolving_past_the_end_is_harmless() {
        let mut tracker = ProgressTracker::new(goals(1));
        tracker.complete_current_sub_goal(None);
        tracker.complete_current_sub_goal(None);
        tracker.skip_current_sub_goal("again");
        tracker.record_step();
        assert_eq!(tracker.current_index(), 1);
        assert!(tracker.is_complete());
    }
}
