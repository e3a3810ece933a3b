use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::errors::AgentError;
use crate::model::ChatMessage;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned an error: {0}")]
    Api(String),

    /// A scripted provider ran out of responses.
    #[error("no response available")]
    Exhausted,
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        AgentError::llm(err.to_string())
    }
}

/// Abstraction over language-model clients so multiple vendors can plug into
/// the agent loop. Retries, if any, belong to the implementation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Return the raw completion text for an ordered, role-tagged message list.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Deterministic provider that replays queued responses, for tests and
/// offline development.
#[derive(Debug, Default)]
pub struct ScriptedLlmProvider {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlmProvider {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Response returned once the queue is drained.
    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    pub fn push_error(&self, err: LlmError) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(err));
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// Messages received by the most recent call.
    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.calls.lock().ok().and_then(|calls| calls.last().cloned())
    }

    /// Messages of every call so far, oldest first.
    pub fn recorded_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlmProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| LlmError::Transport("scripted provider poisoned".to_string()))?
            .pop_front();
        match next {
            Some(response) => response,
            None => self.fallback.clone().ok_or(LlmError::Exhausted),
        }
    }
}
