//! Progress events emitted by the control loop. Purely advisory: observers
//! never feed back into control flow.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::content::{ActionRecommendation, ContentPattern};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentEvent {
    Start {
        run_id: String,
        task: String,
        max_steps: u32,
        sub_goals: usize,
    },
    Step {
        step: u32,
        max_steps: u32,
    },
    Thought {
        step: u32,
        thought: String,
    },
    Action {
        step: u32,
        action: String,
        args: Value,
        success: bool,
    },
    Complete {
        step: u32,
        message: String,
        output: Value,
    },
    Stopped {
        step: u32,
    },
    Incomplete {
        step: u32,
        message: String,
    },
    AskUser {
        step: u32,
        question: String,
    },
    Warning {
        step: u32,
        message: String,
    },
    SubGoalComplete {
        step: u32,
        sub_goal_id: u32,
        description: String,
        progress: u32,
    },
    ContentExtracted {
        step: u32,
        pattern: ContentPattern,
        item_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        recommendation: Option<ActionRecommendation>,
    },
    Error {
        step: u32,
        message: String,
    },
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Start { .. } => "start",
            AgentEvent::Step { .. } => "step",
            AgentEvent::Thought { .. } => "thought",
            AgentEvent::Action { .. } => "action",
            AgentEvent::Complete { .. } => "complete",
            AgentEvent::Stopped { .. } => "stopped",
            AgentEvent::Incomplete { .. } => "incomplete",
            AgentEvent::AskUser { .. } => "askUser",
            AgentEvent::Warning { .. } => "warning",
            AgentEvent::SubGoalComplete { .. } => "subGoalComplete",
            AgentEvent::ContentExtracted { .. } => "contentExtracted",
            AgentEvent::Error { .. } => "error",
        }
    }
}

/// Receives progress events. Must not block.
pub trait AgentObserver: Send + Sync {
    fn on_event(&self, event: &AgentEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AgentObserver for NoopObserver {
    fn on_event(&self, _event: &AgentEvent) {}
}

/// Forwards events to `tracing` under the `agent_events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AgentObserver for TracingObserver {
    fn on_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::Warning { step, message } => {
                warn!(target: "agent_events", step, %message, "agent warning");
            }
            AgentEvent::Error { step, message } => {
                warn!(target: "agent_events", step, %message, "agent error");
            }
            AgentEvent::Action {
                step,
                action,
                success,
                ..
            } => {
                info!(target: "agent_events", step, %action, success, "action executed");
            }
            other => {
                info!(target: "agent_events", event = other.name(), "agent event");
            }
        }
    }
}

/// Publishes events on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: broadcast::Sender<AgentEvent>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}

impl AgentObserver for ChannelObserver {
    fn on_event(&self, event: &AgentEvent) {
        // no subscribers is not an error
        let _ = self.sender.send(event.clone());
    }
}
