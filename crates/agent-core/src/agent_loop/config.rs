//! Configuration for the agent control loop.

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// Tunables for one agent run. Every field has a default, so partial YAML
/// documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// Step budget used when the planner produced no sub-goals.
    /// Default: 30
    pub max_steps: u32,

    /// Steps a sub-goal may take before it is considered stuck.
    /// Default: 8
    pub stuck_threshold: u32,

    /// Rolling action log kept by the loop detector.
    /// Default: 15
    pub action_history_window: usize,

    /// Rolling navigation log kept by the loop detector.
    /// Default: 10
    pub navigation_history_window: usize,

    /// Observations remembered for productivity checks.
    /// Default: 5
    pub observation_window: usize,

    /// Actions shown verbatim in the prompt; older ones are summarised.
    /// Default: 5
    pub recent_actions_verbatim: usize,

    /// Snapshots allowed back to back before the optimizer blocks the next.
    /// Default: 2
    pub max_consecutive_snapshots: u32,

    /// Default: 1
    pub max_get_url_per_subgoal: u32,

    /// Failed attempts allowed per action+arguments.
    /// Default: 2
    pub max_retries: u32,

    /// Default: 20
    pub optimizer_history_limit: usize,

    /// Polling tick inside `wait`, also the cancellation latency.
    /// Default: 250
    pub wait_poll_interval_ms: u64,

    /// Default: 1000
    pub default_wait_ms: u64,

    /// Upper bound on a single `wait`.
    /// Default: 30000
    pub max_wait_ms: u64,

    /// Pause after a navigation before the next step.
    /// Default: 1000
    pub navigation_settle_ms: u64,

    /// Default: 3000
    pub snapshot_prompt_chars: usize,

    /// Default: 2000
    pub observation_prompt_chars: usize,

    /// Extracted text longer than this is summarised in the observation.
    /// Default: 1000
    pub summarize_threshold_chars: usize,

    /// Detections of the same loop before the sub-goal is force-skipped.
    /// Default: 3
    pub loop_skip_after: u32,

    /// Same action name this many times in the last ten triggers a warning.
    /// Default: 4
    pub repetition_warning_threshold: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            stuck_threshold: 8,
            action_history_window: 15,
            navigation_history_window: 10,
            observation_window: 5,
            recent_actions_verbatim: 5,
            max_consecutive_snapshots: 2,
            max_get_url_per_subgoal: 1,
            max_retries: 2,
            optimizer_history_limit: 20,
            wait_poll_interval_ms: 250,
            default_wait_ms: 1_000,
            max_wait_ms: 30_000,
            navigation_settle_ms: 1_000,
            snapshot_prompt_chars: 3_000,
            observation_prompt_chars: 2_000,
            summarize_threshold_chars: 1_000,
            loop_skip_after: 3,
            repetition_warning_threshold: 4,
        }
    }
}

impl AgentLoopConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a minimal config for testing: no real sleeping.
    pub fn minimal() -> Self {
        Self {
            wait_poll_interval_ms: 1,
            default_wait_ms: 0,
            max_wait_ms: 10,
            navigation_settle_ms: 0,
            ..Self::default()
        }
    }

    /// Create a config with short delays for responsive pages.
    pub fn fast() -> Self {
        Self {
            wait_poll_interval_ms: 100,
            default_wait_ms: 500,
            max_wait_ms: 10_000,
            navigation_settle_ms: 300,
            ..Self::default()
        }
    }

    /// Parse a YAML document; missing fields keep their defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self, AgentError> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|err| AgentError::config(format!("failed to parse agent config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the loop unable to run or terminate.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_steps == 0 {
            return Err(AgentError::config("max_steps must be at least 1"));
        }
        if self.stuck_threshold == 0 {
            return Err(AgentError::config("stuck_threshold must be at least 1"));
        }
        if self.wait_poll_interval_ms == 0 {
            return Err(AgentError::config("wait_poll_interval_ms must be positive"));
        }
        if self.loop_skip_after == 0 {
            return Err(AgentError::config("loop_skip_after must be at least 1"));
        }
        if self.action_history_window < 10 {
            return Err(AgentError::config(
                "action_history_window must cover the ten-action repetition window",
            ));
        }
        Ok(())
    }

    /// Builder: set max steps.
    pub fn max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }

    /// Builder: set stuck threshold.
    pub fn stuck_threshold(mut self, steps: u32) -> Self {
        self.stuck_threshold = steps;
        self
    }

    /// Builder: set wait polling interval.
    pub fn poll_interval(mut self, ms: u64) -> Self {
        self.wait_poll_interval_ms = ms;
        self
    }

    /// Builder: set navigation settle delay.
    pub fn settle(mut self, ms: u64) -> Self {
        self.navigation_settle_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentLoopConfig::default();
        assert_eq!(config.max_steps, 30);
        assert_eq!(config.stuck_threshold, 8);
        assert_eq!(config.action_history_window, 15);
        assert_eq!(config.navigation_history_window, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = AgentLoopConfig::new()
            .max_steps(50)
            .stuck_threshold(4)
            .settle(0);

        assert_eq!(config.max_steps, 50);
        assert_eq!(config.stuck_threshold, 4);
        assert_eq!(config.navigation_settle_ms, 0);
    }

    #[test]
    fn test_minimal_config() {
        let config = AgentLoopConfig::minimal();
        assert_eq!(config.navigation_settle_ms, 0);
        assert_eq!(config.default_wait_ms, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = AgentLoopConfig::from_yaml_str("max_steps: 12\nloop_skip_after: 2\n").unwrap();
        assert_eq!(config.max_steps, 12);
        assert_eq!(config.loop_skip_after, 2);
        assert_eq!(config.stuck_threshold, 8);
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let err = AgentLoopConfig::from_yaml_str("max_steps: 0\n").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
        assert!(AgentLoopConfig::from_yaml_str("max_steps: [").is_err());
    }
}
