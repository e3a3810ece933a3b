//! Agent loop (observe, think, act) execution mode.
//!
//! The language model is consulted once per step for the next action;
//! everything around that call is deterministic:
//!
//! ```text
//! plan = planner.draft_plan(task)
//! while steps < budget && !stopped:
//!     validate run state
//!     prompt  = context(task, sub-goal, history, snapshot, observation)
//!     action  = parse(llm.complete(prompt))
//!     outcome = optimizer.validate(action) ? dispatch(action) : blocked
//!     observation = render(outcome) + sub-goal / loop / repetition notes
//! ```
//!
//! # Key Components
//!
//! - [`AgentLoopConfig`]: tunables for the loop
//! - [`AgentLoopController`]: main loop orchestrator
//! - [`AgentRunResult`]: the single terminal result of a run

pub mod config;
pub mod controller;
mod dispatch;
pub mod observation;
pub mod prompt;
pub mod state;
pub mod types;

pub use config::AgentLoopConfig;
pub use controller::{AgentLoopController, StopHandle};
pub use observation::{build_observation, is_sub_goal_complete, repetition_warning};
pub use prompt::{build_messages, format_user_message, parse_response, PromptContext, AGENT_LOOP_SYSTEM_PROMPT};
pub use state::RunState;
pub use types::{
    ActionError, ActionKind, ActionOutcome, ActionRecord, AgentRunResult, OutcomeAnnotation,
    ParsedAction, RunStatus,
};
