//! Core data types for the agent control loop.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AgentError;
use crate::planner::Plan;
use crate::progress::ProgressSummary;

/// Every action the model may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Snapshot,
    Click,
    Fill,
    Search,
    Navigate,
    Scroll,
    Wait,
    GetText,
    GetMarkdown,
    GetUrl,
    GetTitle,
    AskUser,
    ExtractMultipleItems,
    GenerateDocument,
    Finished,
}

impl ActionKind {
    pub const ALL: [ActionKind; 15] = [
        ActionKind::Snapshot,
        ActionKind::Click,
        ActionKind::Fill,
        ActionKind::Search,
        ActionKind::Navigate,
        ActionKind::Scroll,
        ActionKind::Wait,
        ActionKind::GetText,
        ActionKind::GetMarkdown,
        ActionKind::GetUrl,
        ActionKind::GetTitle,
        ActionKind::AskUser,
        ActionKind::ExtractMultipleItems,
        ActionKind::GenerateDocument,
        ActionKind::Finished,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Snapshot => "snapshot",
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Search => "search",
            ActionKind::Navigate => "navigate",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
            ActionKind::GetText => "getText",
            ActionKind::GetMarkdown => "getMarkdown",
            ActionKind::GetUrl => "getUrl",
            ActionKind::GetTitle => "getTitle",
            ActionKind::AskUser => "askUser",
            ActionKind::ExtractMultipleItems => "extractMultipleItems",
            ActionKind::GenerateDocument => "generateDocument",
            ActionKind::Finished => "finished",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AgentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value.trim())
            .ok_or_else(|| AgentError::unknown_action(value.trim()))
    }
}

/// One step of the run, appended to history every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub step: u32,
    pub thought: String,
    pub action: String,
    pub args: Value,
}

/// `{thought, action, args}` as produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAction {
    #[serde(default)]
    pub thought: String,
    #[serde(default = "unknown_action_name")]
    pub action: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn unknown_action_name() -> String {
    "unknown".to_string()
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

impl ParsedAction {
    /// Raw text that contained no usable JSON object.
    pub fn unparsed(raw: &str) -> Self {
        Self {
            thought: raw.trim().to_string(),
            action: unknown_action_name(),
            args: empty_args(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    pub kind: String,
    pub message: String,
}

/// Semantic facts about an outcome, consumed when rendering observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeAnnotation {
    VideoOpened,
    FollowClicked,
    Navigated { url: String },
    ValidationFailed { reason: String, alternative: String },
    NavigationSkipped,
}

/// Result of executing (or refusing) one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    #[serde(default)]
    pub data: Value,
    /// Original text when `data` carries a summary of it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<OutcomeAnnotation>,
}

impl ActionOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            error: None,
            data,
            full_text: None,
            annotations: Vec::new(),
        }
    }

    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(ActionError {
                kind: kind.into(),
                message: message.into(),
            }),
            data: Value::Null,
            full_text: None,
            annotations: Vec::new(),
        }
    }

    pub fn validation_failed(reason: impl Into<String>, alternative: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::failed("validation_failed", reason.clone()).with_annotation(
            OutcomeAnnotation::ValidationFailed {
                reason,
                alternative: alternative.into(),
            },
        )
    }

    pub fn with_annotation(mut self, annotation: OutcomeAnnotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn with_full_text(mut self, text: impl Into<String>) -> Self {
        self.full_text = Some(text.into());
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|err| err.message.as_str())
    }

    pub fn is_validation_failure(&self) -> bool {
        self.annotations
            .iter()
            .any(|a| matches!(a, OutcomeAnnotation::ValidationFailed { .. }))
    }

    pub fn video_opened(&self) -> bool {
        self.annotations.contains(&OutcomeAnnotation::VideoOpened)
    }

    pub fn follow_clicked(&self) -> bool {
        self.annotations.contains(&OutcomeAnnotation::FollowClicked)
    }

    pub fn navigated_to(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            OutcomeAnnotation::Navigated { url } => Some(url.as_str()),
            _ => None,
        })
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// `finished` was called or every sub-goal completed.
    Completed,
    /// Cancelled through the stop handle.
    Stopped,
    /// Step budget exhausted.
    Incomplete,
    /// Fatal error: LLM transport failure or corrupted run state.
    Error,
}

/// Result of one agent run, exportable as a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    pub steps_taken: u32,
    pub max_steps: u32,
    pub plan: Plan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_goals: Option<ProgressSummary>,
    pub history: Vec<ActionRecord>,
    pub total_time_ms: u64,
}

impl AgentRunResult {
    /// Check if the run completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }

    pub fn to_json_pretty(&self) -> Result<String, AgentError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| AgentError::invalid_request(format!("failed to serialise run: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_kinds_round_trip_through_names() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!(matches!(
            "teleport".parse::<ActionKind>(),
            Err(AgentError::UnknownAction(name)) if name == "teleport"
        ));
    }

    #[test]
    fn parsed_action_defaults() {
        let parsed: ParsedAction = serde_json::from_value(json!({"thought": "hm"})).unwrap();
        assert_eq!(parsed.action, "unknown");
        assert_eq!(parsed.args, json!({}));
    }

    #[test]
    fn validation_failures_are_annotated() {
        let outcome = ActionOutcome::validation_failed("too many snapshots", "use click");
        assert!(!outcome.success);
        assert!(outcome.is_validation_failure());
        assert_eq!(outcome.error_message(), Some("too many snapshots"));
    }

    #[test]
    fn navigation_annotation_lookup() {
        let outcome = ActionOutcome::ok(json!({}))
            .with_annotation(OutcomeAnnotation::Navigated {
                url: "https://a.example".into(),
            })
            .with_annotation(OutcomeAnnotation::FollowClicked);
        assert_eq!(outcome.navigated_to(), Some("https://a.example"));
        assert!(outcome.follow_clicked());
        assert!(!outcome.video_opened());
    }
}
