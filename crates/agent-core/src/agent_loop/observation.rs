//! Turning action outcomes into the text the model sees next step.

use std::collections::HashMap;

use super::types::{ActionKind, ActionOutcome, ActionRecord, OutcomeAnnotation};
use crate::planner::SubGoal;

const REPETITION_WINDOW: usize = 10;

/// Render the observation for an executed (or blocked) action.
///
/// `data` is dumped without the success flag so a bare "success" never
/// reads as a progress keyword.
pub fn build_observation(action: &str, outcome: &ActionOutcome) -> String {
    for annotation in &outcome.annotations {
        if let OutcomeAnnotation::ValidationFailed {
            reason,
            alternative,
        } = annotation
        {
            return format!("Action blocked: {reason}. Suggestion: {alternative}");
        }
    }

    if let Some(error) = &outcome.error {
        return format!("Error: {}\nHint: {}", error.message, error_hint(action));
    }

    if outcome.video_opened() {
        return "[VIDEO] A video was opened and is now playing. If the task was to play it, call finished()."
            .to_string();
    }
    if outcome.follow_clicked() {
        return "[FOLLOW] The follow button was clicked (followClicked). Verify it and call finished() if that was the goal."
            .to_string();
    }
    if outcome
        .annotations
        .contains(&OutcomeAnnotation::NavigationSkipped)
    {
        return "Already on the requested page; navigation skipped. Continue with the next step."
            .to_string();
    }

    if outcome.data.is_null() {
        return format!("{action} returned no data");
    }
    match serde_json::to_string(&outcome.data) {
        Ok(dump) => dump,
        Err(_) => format!("{action} returned unreadable data"),
    }
}

fn error_hint(action: &str) -> String {
    match action.parse::<ActionKind>() {
        Ok(ActionKind::Click | ActionKind::Fill | ActionKind::GetText) => {
            "Refs expire after every snapshot. Take a fresh snapshot and use a current ref."
                .to_string()
        }
        Ok(ActionKind::Navigate) => {
            "Check the URL, or use search(text) to reach the page instead.".to_string()
        }
        Ok(ActionKind::Search) => {
            "Take a snapshot, then fill the search box and click its submit button.".to_string()
        }
        Ok(ActionKind::AskUser) => {
            "No operator is available; continue without asking.".to_string()
        }
        Ok(ActionKind::GenerateDocument) => {
            "Document generation is unavailable; report the data with finished() instead."
                .to_string()
        }
        Ok(_) => "Try a different approach.".to_string(),
        Err(_) => {
            let names: Vec<&str> = ActionKind::ALL.iter().map(ActionKind::as_str).collect();
            format!("Use one of: {}", names.join(", "))
        }
    }
}

/// Completion rule table over the sub-goal's criteria. Heuristic: the
/// fallback matches "complete"/"success" anywhere in the observation.
pub fn is_sub_goal_complete(
    sub_goal: &SubGoal,
    action: &str,
    outcome: &ActionOutcome,
    observation: &str,
) -> bool {
    let criteria = sub_goal.completion_criteria.to_lowercase();
    let succeeded = outcome.success;

    if criteria.contains("search") && criteria.contains("loaded") {
        return action == "search" && succeeded;
    }
    if criteria.contains("content") && criteria.contains("extracted") {
        return matches!(action, "getMarkdown" | "getText") && succeeded;
    }
    if criteria.contains("navigated") || criteria.contains("page loaded") {
        return action == "navigate" && succeeded;
    }
    if criteria.contains("clicked") || criteria.contains("button") {
        return action == "click" && succeeded;
    }

    let observation = observation.to_lowercase();
    observation.contains("complete") || observation.contains("success")
}

/// Warning when one action name dominates the last ten actions.
pub fn repetition_warning(history: &[ActionRecord], threshold: usize) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in history.iter().rev().take(REPETITION_WINDOW) {
        *counts.entry(record.action.as_str()).or_insert(0) += 1;
    }
    let (action, count) = counts
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;
    Some(format!(
        "You have used '{action}' {count} times in the last {REPETITION_WINDOW} steps. Try something different or call finished() if done."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::SubGoalType;
    use serde_json::json;

    fn goal(criteria: &str) -> SubGoal {
        SubGoal::new(1, "goal", SubGoalType::Composite, criteria, 3)
    }

    #[test]
    fn data_dump_omits_success_flag() {
        let outcome = ActionOutcome::ok(json!({"url": "https://a.example"}));
        let text = build_observation("getUrl", &outcome);
        assert_eq!(text, r#"{"url":"https://a.example"}"#);
        assert!(!text.contains("success"));
    }

    #[test]
    fn blocked_and_failed_actions_render_guidance() {
        let blocked = ActionOutcome::validation_failed("3 snapshots", "click something");
        assert_eq!(
            build_observation("snapshot", &blocked),
            "Action blocked: 3 snapshots. Suggestion: click something"
        );

        let failed = ActionOutcome::failed("element_not_found", "element not found: e4");
        let text = build_observation("click", &failed);
        assert!(text.starts_with("Error: element not found: e4"));
        assert!(text.contains("fresh snapshot"));

        let unknown = ActionOutcome::failed("unknown_action", "Unknown action: fly");
        assert!(build_observation("fly", &unknown).contains("extractMultipleItems"));
    }

    #[test]
    fn markers_for_video_and_follow() {
        let video = ActionOutcome::ok(json!({})).with_annotation(OutcomeAnnotation::VideoOpened);
        assert!(build_observation("click", &video).starts_with("[VIDEO]"));
        let follow =
            ActionOutcome::ok(json!({})).with_annotation(OutcomeAnnotation::FollowClicked);
        assert!(build_observation("click", &follow).contains("followClicked"));
    }

    #[test]
    fn completion_rules() {
        let ok = ActionOutcome::ok(json!({}));
        let failed = ActionOutcome::failed("timeout", "slow");

        let search = goal("Search results loaded");
        assert!(is_sub_goal_complete(&search, "search", &ok, ""));
        assert!(!is_sub_goal_complete(&search, "search", &failed, ""));
        assert!(!is_sub_goal_complete(&search, "navigate", &ok, "success"));

        let extract = goal("Content extracted");
        assert!(is_sub_goal_complete(&extract, "getMarkdown", &ok, ""));
        assert!(is_sub_goal_complete(&extract, "getText", &ok, ""));

        assert!(is_sub_goal_complete(&goal("Page loaded"), "navigate", &ok, ""));
        assert!(is_sub_goal_complete(&goal("Button clicked"), "click", &ok, ""));

        // keyword fallback: any page text containing "complete"/"success" passes
        let generic = goal("Task finished");
        assert!(is_sub_goal_complete(&generic, "fill", &ok, "Form submission complete"));
        assert!(!is_sub_goal_complete(&generic, "fill", &ok, "{\"ref\":\"e1\"}"));
    }

    #[test]
    fn repetition_warning_threshold() {
        let history: Vec<ActionRecord> = (0..10)
            .map(|step| ActionRecord {
                step,
                thought: String::new(),
                action: if step % 2 == 0 { "scroll" } else { "click" }.to_string(),
                args: json!({}),
            })
            .collect();
        let warning = repetition_warning(&history, 4).unwrap();
        assert!(warning.contains("5 times"));
        assert!(repetition_warning(&history, 6).is_none());
    }
}
