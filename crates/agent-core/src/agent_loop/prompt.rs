//! Prompt templates for the agent loop.
//!
//! Contains the system prompt, the per-step context block and the parser
//! that turns the model's reply back into an action.

use std::collections::BTreeMap;

use super::types::{ActionRecord, ParsedAction};
use crate::content::truncate_chars;
use crate::model::ChatMessage;
use crate::planner::TaskHeuristic;
use crate::progress::ProgressTracker;

/// Default system prompt for the agent loop.
pub const AGENT_LOOP_SYSTEM_PROMPT: &str = r#"You are a browser automation agent. You accomplish the user's task by choosing ONE action per step, observing the result and repeating.

## Page Model
`snapshot` returns an accessibility tree where interactive elements carry refs such as `e12`.
Refs are only valid until the next snapshot. Never reuse a ref from an older snapshot.

## Available Actions
- snapshot: {} - inspect interactive elements
- click: {"ref": "e12"}
- fill: {"ref": "e3", "text": "query"}
- search: {"text": "query"} - finds the search box, fills and submits it
- navigate: {"url": "https://example.com"} - go directly to a URL
- scroll: {"direction": "up" | "down" | "top" | "bottom"}
- wait: {"ms": 1000}
- getText: {"ref": "e7"}
- getMarkdown: {} - the page content as markdown
- getUrl: {}
- getTitle: {}
- askUser: {"question": "..."} - only when the task cannot continue without a human
- extractMultipleItems: {"count": 5} - structured items from the current page
- generateDocument: {"data": {...}, "type": "excel" | "word", "filename": "report"}
- finished: {"summary": "...", "result": ...} - the task is done

## Rules
- Do not take a snapshot twice in a row; act on the refs you already have.
- The URL does not change unless you navigate, click or search. Do not poll it.
- Prefer getMarkdown over repeated snapshots when you need to read content.
- When the requested information is in front of you, call finished with it.

## Response Format
Respond with exactly one JSON object:
{"thought": "what you see and why this action", "action": "click", "args": {"ref": "e12"}}
"#;

/// Everything the per-step context block is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub task: &'a str,
    pub step: u32,
    pub max_steps: u32,
    pub tracker: Option<&'a ProgressTracker>,
    pub heuristic: Option<&'a TaskHeuristic>,
    pub history: &'a [ActionRecord],
    pub recent_actions_verbatim: usize,
    pub snapshot: Option<&'a str>,
    pub snapshot_chars: usize,
    pub observation: Option<&'a str>,
    pub previous_observation: Option<&'a str>,
    pub observation_chars: usize,
}

/// System prompt plus the dynamic context for this step.
pub fn build_messages(ctx: &PromptContext<'_>) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(AGENT_LOOP_SYSTEM_PROMPT),
        ChatMessage::user(format_user_message(ctx)),
    ]
}

pub fn format_user_message(ctx: &PromptContext<'_>) -> String {
    let mut message = String::new();

    message.push_str("## Task\n");
    message.push_str(ctx.task);
    message.push('\n');

    message.push_str(&format!("\n## Step {}/{}\n", ctx.step, ctx.max_steps));

    if let Some(tracker) = ctx.tracker {
        message.push_str("\n## Current Sub-Goal\n");
        message.push_str(&tracker.context());
        message.push('\n');
        if tracker.is_stuck() {
            message.push_str(&format!(
                "WARNING: this sub-goal has taken {} steps. Finish it with what you have or move on.\n",
                tracker.current_step_count()
            ));
        }
    }

    if let Some(banner) = budget_banner(ctx.step, ctx.max_steps) {
        message.push('\n');
        message.push_str(&banner);
        message.push('\n');
    }

    if let Some(heuristic) = ctx.heuristic {
        message.push('\n');
        message.push_str(&heuristic.render());
        message.push('\n');
    }

    if !ctx.history.is_empty() {
        push_history(&mut message, ctx.history, ctx.recent_actions_verbatim);
    }

    if let Some(tree) = ctx.snapshot {
        message.push_str("\n## Current Page Snapshot\n");
        message.push_str(&truncate_chars(tree, ctx.snapshot_chars));
        message.push('\n');
    }

    if let Some(observation) = ctx.observation {
        message.push_str("\n## Last Observation\n");
        if ctx.previous_observation == Some(observation) {
            message.push_str("(Same result as previous step)");
        } else {
            message.push_str(&truncate_chars(observation, ctx.observation_chars));
        }
        message.push('\n');

        for hint in observation_hints(observation) {
            message.push_str("HINT: ");
            message.push_str(hint);
            message.push('\n');
        }
    }

    message.push_str("\nRespond with one JSON object: {\"thought\", \"action\", \"args\"}.\n");
    message
}

/// `<20%` remaining is critical, `<50%` a note.
fn budget_banner(step: u32, max_steps: u32) -> Option<String> {
    if max_steps == 0 {
        return None;
    }
    let remaining = max_steps.saturating_sub(step);
    let (left, budget) = (u64::from(remaining), u64::from(max_steps));
    if left * 5 < budget {
        Some(format!(
            "CRITICAL: only {remaining} steps left. Wrap up now and call finished() with what you have."
        ))
    } else if left * 2 < budget {
        Some(format!(
            "NOTE: {remaining} steps left, less than half of the budget. Prioritise the remaining sub-goals."
        ))
    } else {
        None
    }
}

fn push_history(message: &mut String, history: &[ActionRecord], verbatim: usize) {
    let split = history.len().saturating_sub(verbatim);
    let (older, recent) = history.split_at(split);

    if !older.is_empty() {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in older {
            *counts.entry(record.action.as_str()).or_insert(0) += 1;
        }
        let summary: Vec<String> = counts
            .iter()
            .map(|(action, count)| format!("{count}x {action}"))
            .collect();
        message.push_str(&format!(
            "\n## Earlier Steps ({})\n{}\n",
            older.len(),
            summary.join(", ")
        ));
    }

    message.push_str("\n## Recent Actions\n");
    for record in recent {
        message.push_str(&format!(
            "Step {}: {} {} - {}\n",
            record.step,
            record.action,
            record.args,
            truncate_chars(&record.thought, 120)
        ));
    }
}

fn observation_hints(observation: &str) -> Vec<&'static str> {
    let mut hints = Vec::new();
    if observation.contains("[FOLLOW]") || observation.contains("followClicked") {
        hints.push("The follow action went through. Call finished() unless more is required.");
    }
    if observation.contains("[VIDEO]") {
        hints.push("The video is playing. If playing it was the task, call finished() now.");
    }
    if observation.contains("LOOP DETECTED") {
        hints.push("You are repeating yourself. Pick an action different from your last ones.");
    }
    hints
}

/// Parse `{thought, action, args}` from the first JSON object in `raw`.
/// Never fails: unusable text becomes a thought with action `unknown`.
pub fn parse_response(raw: &str) -> ParsedAction {
    for candidate in json_objects(raw) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) else {
            continue;
        };
        if value.get("action").is_none() {
            continue;
        }
        if let Ok(parsed) = serde_json::from_value::<ParsedAction>(value) {
            return parsed;
        }
    }
    ParsedAction::unparsed(raw)
}

/// Balanced `{...}` spans in order of their opening brace, string-aware.
fn json_objects(raw: &str) -> impl Iterator<Item = &str> {
    raw.char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(move |(start, _)| balanced_end(&raw[start..]).map(|end| &raw[start..start + end]))
}

fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{SubGoal, SubGoalType};
    use serde_json::json;

    fn context<'a>(history: &'a [ActionRecord]) -> PromptContext<'a> {
        PromptContext {
            task: "Search Baidu for rust",
            step: 1,
            max_steps: 30,
            tracker: None,
            heuristic: None,
            history,
            recent_actions_verbatim: 5,
            snapshot: None,
            snapshot_chars: 3000,
            observation: None,
            previous_observation: None,
            observation_chars: 2000,
        }
    }

    fn record(step: u32, action: &str) -> ActionRecord {
        ActionRecord {
            step,
            thought: format!("thinking {step}"),
            action: action.to_string(),
            args: json!({}),
        }
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "Sure.\n```json\n{\"thought\": \"open it\", \"action\": \"navigate\", \"args\": {\"url\": \"https://a.example/{x}\"}}\n```";
        let parsed = parse_response(raw);
        assert_eq!(parsed.action, "navigate");
        assert_eq!(parsed.args["url"], "https://a.example/{x}");
    }

    #[test]
    fn skips_objects_without_action() {
        let raw = "{\"note\": 1} then {\"thought\": \"t\", \"action\": \"snapshot\"}";
        let parsed = parse_response(raw);
        assert_eq!(parsed.action, "snapshot");
        assert_eq!(parsed.args, json!({}));
    }

    #[test]
    fn unparseable_text_becomes_unknown_action() {
        let parsed = parse_response("I think I should click the button {");
        assert_eq!(parsed.action, "unknown");
        assert_eq!(parsed.thought, "I think I should click the button {");
    }

    #[test]
    fn history_is_summarised_beyond_verbatim_window() {
        let history: Vec<ActionRecord> = (1..=8)
            .map(|step| record(step, if step <= 3 { "snapshot" } else { "click" }))
            .collect();
        let message = format_user_message(&context(&history));
        assert!(message.contains("## Earlier Steps (3)\n3x snapshot"));
        assert!(message.contains("Step 4: click"));
        assert!(!message.contains("Step 3: snapshot"));
    }

    #[test]
    fn budget_banners() {
        assert!(budget_banner(1, 30).is_none());
        assert!(budget_banner(16, 30).unwrap().starts_with("NOTE"));
        assert!(budget_banner(25, 30).unwrap().starts_with("CRITICAL"));
    }

    #[test]
    fn budget_banner_handles_huge_budgets() {
        assert!(budget_banner(1, u32::MAX).is_none());
        let late = budget_banner(u32::MAX - 10, u32::MAX).unwrap();
        assert!(late.starts_with("CRITICAL: only 10 steps left"));
        assert!(budget_banner(u32::MAX / 2 + 100, u32::MAX)
            .unwrap()
            .starts_with("NOTE"));
    }

    #[test]
    fn repeated_observation_is_compressed_and_hints_added() {
        let mut ctx = context(&[]);
        ctx.observation = Some("[FOLLOW] done (followClicked)");
        ctx.previous_observation = Some("[FOLLOW] done (followClicked)");
        let message = format_user_message(&ctx);
        assert!(message.contains("(Same result as previous step)"));
        assert!(message.contains("HINT: The follow action went through"));
    }

    #[test]
    fn tracker_context_and_stuck_warning() {
        let goals = vec![SubGoal::new(1, "Search", SubGoalType::Search, "Search results page loaded", 3)];
        let mut tracker = ProgressTracker::new(goals).with_stuck_threshold(1);
        tracker.record_step();
        tracker.record_step();
        let mut ctx = context(&[]);
        ctx.tracker = Some(&tracker);
        let message = format_user_message(&ctx);
        assert!(message.contains("## Current Sub-Goal\nSub-Goal 1/1"));
        assert!(message.contains("WARNING: this sub-goal has taken 2 steps"));
    }

    #[test]
    fn snapshot_is_truncated() {
        let tree = "x".repeat(5000);
        let mut ctx = context(&[]);
        ctx.snapshot = Some(&tree);
        let message = format_user_message(&ctx);
        assert!(message.contains(&format!("{}...", "x".repeat(2997))));
        assert!(!message.contains(&"x".repeat(3001)));
    }
}
