//! Contracts the control loop consumes from the browser driver and from the
//! human operator.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use webpilot_core_types::{
    DocumentKind, DocumentReceipt, InteractionResult, PageSnapshot, ScrollDirection,
};

/// Failures reported by a browser driver. Folded into observations; they
/// never terminate a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("{0} is not supported by this environment")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

impl EnvironmentError {
    pub fn kind(&self) -> &'static str {
        match self {
            EnvironmentError::ElementNotFound(_) => "element_not_found",
            EnvironmentError::Timeout(_) => "timeout",
            EnvironmentError::Navigation(_) => "navigation",
            EnvironmentError::Unsupported(_) => "unsupported",
            EnvironmentError::Other(_) => "other",
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Page-level primitives implemented by the DOM/driver layer.
///
/// Refs returned by [`BrowserEnvironment::snapshot`] are only valid until
/// the next snapshot. Calls are issued strictly one at a time.
#[async_trait]
pub trait BrowserEnvironment: Send + Sync {
    async fn snapshot(&self) -> Result<PageSnapshot, EnvironmentError>;

    async fn click(&self, element_ref: &str) -> Result<InteractionResult, EnvironmentError>;

    async fn fill(&self, element_ref: &str, text: &str)
        -> Result<InteractionResult, EnvironmentError>;

    async fn scroll(&self, direction: ScrollDirection)
        -> Result<InteractionResult, EnvironmentError>;

    /// Locate a search input, fill it and submit.
    async fn search(&self, text: &str) -> Result<InteractionResult, EnvironmentError>;

    async fn navigate(&self, url: &str) -> Result<InteractionResult, EnvironmentError>;

    async fn get_url(&self) -> Result<String, EnvironmentError>;

    async fn get_title(&self) -> Result<String, EnvironmentError>;

    async fn get_text(&self, element_ref: &str) -> Result<String, EnvironmentError>;

    async fn get_markdown(&self) -> Result<String, EnvironmentError>;

    async fn generate_document(
        &self,
        data: &Value,
        kind: DocumentKind,
        filename: &str,
    ) -> Result<DocumentReceipt, EnvironmentError> {
        let _ = (data, kind, filename);
        Err(EnvironmentError::Unsupported("generateDocument".to_string()))
    }
}

/// The one suspension point on a human: `askUser`.
#[async_trait]
pub trait UserInput: Send + Sync {
    async fn ask(&self, question: &str) -> Result<String, EnvironmentError>;
}

/// Used when no operator is attached; every question fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUserInput;

#[async_trait]
impl UserInput for NoUserInput {
    async fn ask(&self, _question: &str) -> Result<String, EnvironmentError> {
        Err(EnvironmentError::Unsupported("askUser".to_string()))
    }
}

/// Answers every question with the same text.
#[derive(Debug, Clone)]
pub struct FixedUserInput {
    answer: String,
}

impl FixedUserInput {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

#[async_trait]
impl UserInput for FixedUserInput {
    async fn ask(&self, _question: &str) -> Result<String, EnvironmentError> {
        Ok(self.answer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn user_input_implementations() {
        let err = block_on(NoUserInput.ask("continue?")).unwrap_err();
        assert_eq!(err.kind(), "unsupported");
        assert_eq!(
            block_on(FixedUserInput::new("yes").ask("continue?")).unwrap(),
            "yes"
        );
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            EnvironmentError::ElementNotFound("e12".into()).to_string(),
            "element not found: e12"
        );
        assert_eq!(
            EnvironmentError::Unsupported("generateDocument".into()).to_string(),
            "generateDocument is not supported by this environment"
        );
    }
}
