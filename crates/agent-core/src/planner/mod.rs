//! Task planning: classify a natural-language task, decompose it into
//! sub-goals and size the step budget.

mod heuristics;
mod keywords;
mod rule_based;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AgentError;

pub use heuristics::{heuristic_for_pattern, identify_task_pattern, TaskHeuristic, TaskPattern};
pub use keywords::{
    contains_term, ACTION_VERBS, EXTRACTION_KEYWORDS, INTERACTION_KEYWORDS, NAVIGATION_KEYWORDS,
    SEARCH_KEYWORDS, SEQUENCE_CONNECTIVES,
};
pub use rule_based::{calculate_step_budget, RuleBasedPlanner};

/// Budget used when the task decomposes into zero or one sub-goal.
pub const BUDGET_SMALL: u32 = 30;
/// Budget for two or three sub-goals (and the defensive fallback).
pub const BUDGET_MEDIUM: u32 = 50;
/// Budget for four or five sub-goals.
pub const BUDGET_LARGE: u32 = 80;
/// Hard cap on sub-goals produced by any decomposition strategy.
pub const MAX_SUB_GOALS: usize = 5;

/// Planner configuration controlling heuristic behaviour.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Maximum number of sub-goals the planner may emit.
    pub max_sub_goals: usize,
    /// Attach advisory heuristics to plans.
    pub attach_heuristics: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_sub_goals: MAX_SUB_GOALS,
            attach_heuristics: true,
        }
    }
}

/// Coarse category of a task, derived from keyword matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Navigation,
    Search,
    Extraction,
    Interaction,
    Composite,
}

/// Kind of work a sub-goal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubGoalType {
    Search,
    Navigation,
    ContentExtraction,
    Interaction,
    Composite,
}

impl SubGoalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubGoalType::Search => "search",
            SubGoalType::Navigation => "navigation",
            SubGoalType::ContentExtraction => "content_extraction",
            SubGoalType::Interaction => "interaction",
            SubGoalType::Composite => "composite",
        }
    }
}

/// One decomposed unit of a multi-step task.
///
/// `completed` and `skipped` are mutually exclusive and never unset once set;
/// the progress tracker is the only writer after planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubGoal {
    pub id: u32,
    pub description: String,
    #[serde(rename = "type")]
    pub goal_type: SubGoalType,
    pub completion_criteria: String,
    pub estimated_steps: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl SubGoal {
    pub fn new(
        id: u32,
        description: impl Into<String>,
        goal_type: SubGoalType,
        completion_criteria: impl Into<String>,
        estimated_steps: u32,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            goal_type,
            completion_criteria: completion_criteria.into(),
            estimated_steps,
            completed: false,
            skipped: false,
            skip_reason: None,
            completed_at: None,
            result: None,
        }
    }

    /// Finished either way: completed or skipped.
    pub fn is_resolved(&self) -> bool {
        self.completed || self.skipped
    }
}

/// Output of the task planner, computed once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub category: TaskCategory,
    pub is_multi_step: bool,
    pub sub_goals: Vec<SubGoal>,
    pub step_budget: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<TaskPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristic: Option<TaskHeuristic>,
}

impl Plan {
    /// Safe default used for empty input and planner failures.
    pub fn fallback() -> Self {
        Self {
            category: TaskCategory::Composite,
            is_multi_step: false,
            sub_goals: Vec::new(),
            step_budget: BUDGET_SMALL,
            pattern: None,
            heuristic: None,
        }
    }

    pub fn has_sub_goals(&self) -> bool {
        !self.sub_goals.is_empty()
    }
}

/// Trait implemented by task planners that turn a task string into a [`Plan`].
pub trait AgentPlanner: Send + Sync {
    fn draft_plan(&self, task: &str) -> Result<Plan, AgentError>;
}
