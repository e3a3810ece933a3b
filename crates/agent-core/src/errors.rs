use thiserror::Error;

use crate::environment::EnvironmentError;

/// Errors emitted by the agent-core crate.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Raised when an agent request is malformed or missing required fields.
    #[error("invalid agent request: {0}")]
    InvalidRequest(String),

    /// Raised by a task planner that could not produce a plan.
    #[error("planning failed: {0}")]
    Planning(String),

    /// Transport or API failure while talking to the language model.
    #[error("llm call failed: {0}")]
    Llm(String),

    /// Raised when the model names an action the agent does not know.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Run state failed validation and could not be repaired.
    #[error("run state corrupted ({field}): {detail}")]
    StateCorruption { field: &'static str, detail: String },

    /// A browser operation failed outside an action dispatch.
    #[error("browser environment: {0}")]
    Environment(#[from] EnvironmentError),

    /// Configuration could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AgentError {
    /// Helper for wrapping static string errors.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn planning(message: impl Into<String>) -> Self {
        Self::Planning(message.into())
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    pub fn unknown_action(name: impl Into<String>) -> Self {
        Self::UnknownAction(name.into())
    }

    pub fn state_corruption(field: &'static str, detail: impl Into<String>) -> Self {
        Self::StateCorruption {
            field,
            detail: detail.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the error must terminate the current run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Llm(_) | Self::StateCorruption { .. })
    }
}
