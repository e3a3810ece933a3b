//! Agent core for webpilot.
//!
//! Drives a browser towards a natural-language goal: a rule-based planner
//! splits the task into sub-goals, and the agent loop asks a language
//! model for one action at a time while local heuristics track progress,
//! block wasteful actions and break repetition loops.

pub mod agent_loop;
pub mod content;
pub mod environment;
pub mod errors;
pub mod events;
pub mod llm_provider;
pub mod loop_detector;
pub mod model;
pub mod optimizer;
pub mod planner;
pub mod progress;

pub use agent_loop::{
    AgentLoopConfig, AgentLoopController, AgentRunResult, RunStatus, StopHandle,
};
pub use content::{ContentExtractor, ContentPattern, ExtractedContent, HeuristicContentExtractor};
pub use environment::{BrowserEnvironment, EnvironmentError, FixedUserInput, NoUserInput, UserInput};
pub use errors::AgentError;
pub use events::{AgentEvent, AgentObserver, ChannelObserver, NoopObserver, TracingObserver};
pub use llm_provider::{LlmError, LlmProvider, ScriptedLlmProvider};
pub use loop_detector::{LoopDetectionResult, LoopDetector, LoopPattern};
pub use model::{ChatMessage, ConversationRole};
pub use optimizer::{ExecutionOptimizer, OptimizerLimits, ValidationResult};
pub use planner::{AgentPlanner, Plan, PlannerConfig, RuleBasedPlanner, SubGoal, SubGoalType};
pub use progress::{ProgressSummary, ProgressTracker};
