//! Mutable per-run state owned by the controller.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use webpilot_core_types::PageSnapshot;

use super::types::ActionRecord;
use crate::errors::AgentError;
use crate::loop_detector::LoopDetector;
use crate::progress::ProgressTracker;

/// Session state for one run; rebuilt from scratch at every `run()`.
#[derive(Debug, Default)]
pub struct RunState {
    pub(crate) step_count: u32,
    pub(crate) max_steps: u32,
    pub(crate) history: Vec<ActionRecord>,
    pub(crate) recent_observations: VecDeque<String>,
    pub(crate) observation_window: usize,
    pub(crate) last_snapshot: Option<PageSnapshot>,
    pub(crate) current_url: Option<String>,
    /// Detections per loop-pattern key since the last sub-goal transition.
    pub(crate) escalations: HashMap<String, u32>,
    pub(crate) escalation_limit: u32,
    repaired: HashSet<&'static str>,
}

impl RunState {
    pub fn new(max_steps: u32, observation_window: usize, escalation_limit: u32) -> Self {
        Self {
            max_steps,
            observation_window: observation_window.max(2),
            escalation_limit,
            ..Self::default()
        }
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn history(&self) -> &[ActionRecord] {
        &self.history
    }

    pub fn last_observation(&self) -> Option<&str> {
        self.recent_observations.back().map(String::as_str)
    }

    pub fn previous_observation(&self) -> Option<&str> {
        let len = self.recent_observations.len();
        if len < 2 {
            return None;
        }
        self.recent_observations.get(len - 2).map(String::as_str)
    }

    pub(crate) fn push_observation(&mut self, observation: String) {
        self.recent_observations.push_back(observation);
        while self.recent_observations.len() > self.observation_window {
            self.recent_observations.pop_front();
        }
    }

    /// Count one more detection of `key`; returns the new tier.
    pub(crate) fn escalate(&mut self, key: &str) -> u32 {
        let counter = self.escalations.entry(key.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub(crate) fn reset_escalation(&mut self, key: &str) {
        self.escalations.remove(key);
    }

    pub(crate) fn clear_escalations(&mut self) {
        self.escalations.clear();
    }

    /// Check the invariants of the run. Each repairable field is reset at
    /// most once per run; a second violation, or one that cannot be
    /// repaired, is reported as [`AgentError::StateCorruption`].
    pub fn validate(
        &mut self,
        tracker: Option<&mut ProgressTracker>,
        detector: &LoopDetector,
    ) -> Result<(), AgentError> {
        if self.step_count > self.max_steps {
            return Err(AgentError::state_corruption(
                "step_count",
                format!("step {} exceeds budget {}", self.step_count, self.max_steps),
            ));
        }

        if self.recent_observations.len() > self.observation_window {
            let detail = format!(
                "{} observations kept, window is {}",
                self.recent_observations.len(),
                self.observation_window
            );
            self.repair("recent_observations", detail)?;
            let excess = self.recent_observations.len() - self.observation_window;
            self.recent_observations.drain(..excess);
        }

        if let Some((key, count)) = self
            .escalations
            .iter()
            .find(|(_, count)| **count > self.escalation_limit)
            .map(|(key, count)| (key.clone(), *count))
        {
            self.repair(
                "escalations",
                format!("{key} escalated {count} times, limit {}", self.escalation_limit),
            )?;
            self.escalations.clear();
        }

        let (actions, navigations, observations) = detector.windows();
        if detector.action_log_len() > actions
            || detector.navigation_log_len() > navigations
            || detector.observation_log_len() > observations
        {
            return Err(AgentError::state_corruption(
                "loop_detector",
                "rolling logs exceed their windows",
            ));
        }

        if let Some(tracker) = tracker {
            validate_tracker(self, tracker)?;
        }
        Ok(())
    }

    fn repair(&mut self, field: &'static str, detail: String) -> Result<(), AgentError> {
        if !self.repaired.insert(field) {
            return Err(AgentError::state_corruption(field, detail));
        }
        warn!(target: "agent_loop", field, %detail, "run state invalid; resetting field");
        Ok(())
    }
}

fn validate_tracker(state: &mut RunState, tracker: &mut ProgressTracker) -> Result<(), AgentError> {
    let total = tracker.sub_goals().len();
    if tracker.current_index() > total {
        return Err(AgentError::state_corruption(
            "sub_goal_cursor",
            format!("cursor {} beyond {} sub-goals", tracker.current_index(), total),
        ));
    }
    if let Some(goal) = tracker
        .sub_goals()
        .iter()
        .find(|goal| goal.completed && goal.skipped)
    {
        return Err(AgentError::state_corruption(
            "sub_goal_flags",
            format!("sub-goal {} is both completed and skipped", goal.id),
        ));
    }
    if tracker.step_counts().len() != total {
        let detail = format!(
            "{} step counters for {} sub-goals",
            tracker.step_counts().len(),
            total
        );
        state.repair("sub_goal_step_counts", detail)?;
        tracker.repair_step_counts();
    }
    Ok(())
}
