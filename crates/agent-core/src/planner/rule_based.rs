use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::errors::AgentError;
use crate::planner::heuristics::{heuristic_for_pattern, identify_task_pattern};
use crate::planner::keywords::{
    count_distinct, matches_any, ACTION_VERBS, EXTRACTION_KEYWORDS, INTERACTION_KEYWORDS,
    NAVIGATION_KEYWORDS, SEARCH_KEYWORDS, SEQUENCE_CONNECTIVES,
};
use crate::planner::{
    AgentPlanner, Plan, PlannerConfig, SubGoal, SubGoalType, TaskCategory, BUDGET_LARGE,
    BUDGET_MEDIUM, BUDGET_SMALL,
};

static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["'“‘「『]([^"'”’」』]+)["'”’」』]"#).expect("quoted regex"));
static SEARCH_FOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:search|look up|look for|find)\b(?:\s+\S+){0,2}?\s+for\s+(.+?)(?:\s+(?:and|then)\b|[,.;，。]|$)",
    )
    .expect("search-for regex")
});
static SEARCH_BARE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:search|look up|find)\b\s+(.+?)(?:\s+(?:and|then)\b|[,.;，。]|$)")
        .expect("search regex")
});
static EXTRACT_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:tell me about|extract|summarize|summarise|collect|list|get|read)\b\s+(?:the\s+)?(.+?)[.?!。？！]*$",
    )
    .expect("extract regex")
});
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s'"，。]+"#).expect("url regex"));
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[a-z0-9-]+(?:\.[a-z0-9-]+)*\.(?:com|cn|org|net|io|tv|dev)\b")
        .expect("domain regex")
});
static NAV_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:open|go to|visit|navigate to|browse to)\b\s+(.+?)(?:\s+(?:and|then)\b|[,.;，。]|$)",
    )
    .expect("navigation regex")
});
static INTERACTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b((?:click|fill|type|submit|press|login|log in|sign in|follow|like|play|watch|subscribe)\b.*?)(?:[,.;，。]|$)",
    )
    .expect("interaction regex")
});
static SEQUENCE_SPLIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[,，]?\s*\b(?:and then|then|after that|afterwards|after|next|followed by)\b\s*[,，]?\s*|然后|接着|之后",
    )
    .expect("sequence regex")
});

/// Keyword-driven planner: pure functions over lowercased task text.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedPlanner {
    config: PlannerConfig,
}

impl RuleBasedPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Full analysis; malformed or empty input yields [`Plan::fallback`].
    pub fn analyze_task(&self, task: &str) -> Plan {
        let trimmed = task.trim();
        if trimmed.is_empty() {
            return Plan::fallback();
        }

        let category = self.classify_task(trimmed);
        let is_multi_step = self.is_multi_step(trimmed);
        let mut sub_goals = if is_multi_step {
            self.generate_sub_goals(trimmed)
        } else {
            Vec::new()
        };
        let step_budget = calculate_step_budget(&mut sub_goals);
        let pattern = identify_task_pattern(trimmed);
        let heuristic = if self.config.attach_heuristics {
            pattern.map(heuristic_for_pattern)
        } else {
            None
        };

        debug!(
            target: "planner",
            ?category,
            is_multi_step,
            sub_goals = sub_goals.len(),
            step_budget,
            pattern = pattern.map(|p| p.as_str()),
            "task analysed"
        );

        Plan {
            category,
            is_multi_step,
            sub_goals,
            step_budget,
            pattern,
            heuristic,
        }
    }

    pub fn classify_task(&self, task: &str) -> TaskCategory {
        let text = task.to_lowercase();
        let matched: Vec<TaskCategory> = [
            (NAVIGATION_KEYWORDS, TaskCategory::Navigation),
            (SEARCH_KEYWORDS, TaskCategory::Search),
            (EXTRACTION_KEYWORDS, TaskCategory::Extraction),
            (INTERACTION_KEYWORDS, TaskCategory::Interaction),
        ]
        .into_iter()
        .filter(|(terms, _)| matches_any(&text, terms))
        .map(|(_, category)| category)
        .collect();

        match matched.as_slice() {
            [single] => *single,
            _ => TaskCategory::Composite,
        }
    }

    pub fn is_multi_step(&self, task: &str) -> bool {
        let text = task.to_lowercase();
        if matches_any(&text, SEQUENCE_CONNECTIVES) {
            return true;
        }
        let verbs = count_distinct(&text, ACTION_VERBS);
        if matches_any(&text, EXTRACTION_KEYWORDS) && verbs >= 1 {
            return true;
        }
        verbs >= 2
    }

    /// Try each decomposition strategy in order and return the first match.
    pub fn generate_sub_goals(&self, task: &str) -> Vec<SubGoal> {
        let text = task.to_lowercase();
        let limit = self.config.max_sub_goals.max(1);

        if matches_any(&text, SEARCH_KEYWORDS) && matches_any(&text, EXTRACTION_KEYWORDS) {
            return search_and_extract(task);
        }
        if matches_any(&text, NAVIGATION_KEYWORDS) && matches_any(&text, INTERACTION_KEYWORDS) {
            return navigate_and_interact(task);
        }
        if matches_any(&text, SEQUENCE_CONNECTIVES) {
            let goals = sequence_goals(task, limit);
            if !goals.is_empty() {
                return goals;
            }
        }
        generic_goals(task, limit)
    }
}

impl AgentPlanner for RuleBasedPlanner {
    fn draft_plan(&self, task: &str) -> Result<Plan, AgentError> {
        Ok(self.analyze_task(task))
    }
}

/// Size the budget from the sub-goal count and redistribute it in place.
///
/// Every sub-goal but the last gets `floor(budget * weight / total)` (at least
/// 1); the last one absorbs the remainder so the allocations sum to the budget.
pub fn calculate_step_budget(sub_goals: &mut [SubGoal]) -> u32 {
    let budget = match sub_goals.len() {
        0 | 1 => BUDGET_SMALL,
        2 | 3 => BUDGET_MEDIUM,
        4 | 5 => BUDGET_LARGE,
        _ => BUDGET_MEDIUM,
    };
    if sub_goals.is_empty() {
        return budget;
    }

    let total_weight: u64 = sub_goals.iter().map(|g| g.estimated_steps as u64).sum();
    let count = sub_goals.len();
    let mut allocated: u32 = 0;
    for (idx, goal) in sub_goals.iter_mut().enumerate() {
        if idx + 1 == count {
            goal.estimated_steps = budget.saturating_sub(allocated).max(1);
            break;
        }
        let share = if total_weight == 0 {
            budget as u64 / count as u64
        } else {
            budget as u64 * goal.estimated_steps as u64 / total_weight
        };
        let share = (share as u32).max(1);
        goal.estimated_steps = share;
        allocated += share;
    }
    budget
}

fn search_and_extract(task: &str) -> Vec<SubGoal> {
    let query = parse_search_query(task).unwrap_or_else(|| "specified query".to_string());
    let target = parse_extraction_target(task).unwrap_or_else(|| "content".to_string());
    vec![
        SubGoal::new(
            1,
            format!("Search for '{query}'"),
            SubGoalType::Search,
            "Search results page loaded",
            3,
        ),
        SubGoal::new(
            2,
            format!("Extract information about {target}"),
            SubGoalType::ContentExtraction,
            "Relevant content extracted from the page",
            5,
        ),
    ]
}

fn navigate_and_interact(task: &str) -> Vec<SubGoal> {
    let destination = parse_navigation_target(task).unwrap_or_else(|| "target page".to_string());
    let interaction = INTERACTION_RE
        .captures(task)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "perform the requested interaction".to_string());
    vec![
        SubGoal::new(
            1,
            format!("Navigate to {destination}"),
            SubGoalType::Navigation,
            "Page loaded and navigated to target",
            2,
        ),
        SubGoal::new(
            2,
            format!("Interact: {interaction}"),
            SubGoalType::Interaction,
            "Target element clicked",
            4,
        ),
    ]
}

fn sequence_goals(task: &str, limit: usize) -> Vec<SubGoal> {
    SEQUENCE_SPLIT_RE
        .split(task)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .take(limit)
        .enumerate()
        .map(|(idx, segment)| {
            let goal_type = infer_sub_goal_type(segment);
            SubGoal::new(
                idx as u32 + 1,
                segment.to_string(),
                goal_type,
                default_criteria(goal_type),
                default_estimate(goal_type),
            )
        })
        .collect()
}

fn generic_goals(task: &str, limit: usize) -> Vec<SubGoal> {
    let segments: Vec<String> = split_generic(task)
        .into_iter()
        .filter(|segment| !segment.is_empty())
        .take(limit)
        .collect();

    if segments.len() < 2 {
        return vec![
            SubGoal::new(
                1,
                "Complete first part of task",
                SubGoalType::Composite,
                "First part of the task is complete",
                5,
            ),
            SubGoal::new(
                2,
                "Complete second part of task",
                SubGoalType::Composite,
                "Second part of the task is complete",
                5,
            ),
        ];
    }

    segments
        .into_iter()
        .enumerate()
        .map(|(idx, segment)| {
            let goal_type = infer_sub_goal_type(&segment);
            SubGoal::new(
                idx as u32 + 1,
                segment,
                goal_type,
                default_criteria(goal_type),
                5,
            )
        })
        .collect()
}

/// Split on " and " outside quotes, or on commas.
fn split_generic(task: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut iter = task.char_indices().peekable();

    while let Some((idx, ch)) = iter.next() {
        if let Some(open) = quote {
            current.push(ch);
            if closing_quote(open) == ch {
                quote = None;
            }
            continue;
        }
        if is_opening_quote(ch) {
            quote = Some(ch);
            current.push(ch);
            continue;
        }
        if ch == ',' || ch == '，' {
            segments.push(current.trim().to_string());
            current.clear();
            continue;
        }
        if ch == ' '
            && task
                .get(idx..idx + 5)
                .is_some_and(|s| s.eq_ignore_ascii_case(" and "))
        {
            segments.push(current.trim().to_string());
            current.clear();
            // consume "and "
            for _ in 0..4 {
                iter.next();
            }
            continue;
        }
        current.push(ch);
    }
    segments.push(current.trim().to_string());
    segments
}

fn is_opening_quote(ch: char) -> bool {
    matches!(ch, '"' | '\'' | '“' | '‘' | '「' | '『')
}

fn closing_quote(open: char) -> char {
    match open {
        '“' => '”',
        '‘' => '’',
        '「' => '」',
        '『' => '』',
        other => other,
    }
}

fn infer_sub_goal_type(segment: &str) -> SubGoalType {
    let text = segment.to_lowercase();
    if matches_any(&text, SEARCH_KEYWORDS) {
        SubGoalType::Search
    } else if matches_any(&text, NAVIGATION_KEYWORDS) {
        SubGoalType::Navigation
    } else if matches_any(&text, EXTRACTION_KEYWORDS) {
        SubGoalType::ContentExtraction
    } else if matches_any(&text, INTERACTION_KEYWORDS) {
        SubGoalType::Interaction
    } else {
        SubGoalType::Composite
    }
}

fn default_criteria(goal_type: SubGoalType) -> &'static str {
    match goal_type {
        SubGoalType::Search => "Search results page loaded",
        SubGoalType::Navigation => "Page loaded and navigated to target",
        SubGoalType::ContentExtraction => "Relevant content extracted from the page",
        SubGoalType::Interaction => "Target element clicked",
        SubGoalType::Composite => "Step reported complete",
    }
}

fn default_estimate(goal_type: SubGoalType) -> u32 {
    match goal_type {
        SubGoalType::Navigation => 2,
        SubGoalType::Search | SubGoalType::Interaction => 3,
        SubGoalType::ContentExtraction => 4,
        SubGoalType::Composite => 5,
    }
}

fn parse_search_query(task: &str) -> Option<String> {
    if let Some(quoted) = QUOTED_RE
        .captures(task)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
    {
        return Some(quoted);
    }
    [&*SEARCH_FOR_RE, &*SEARCH_BARE_RE]
        .into_iter()
        .find_map(|re| {
            re.captures(task)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !starts_with_filler(s))
        })
}

/// Captures like "and summarize" come from connectives, not a real query.
fn starts_with_filler(capture: &str) -> bool {
    match capture.split_whitespace().next() {
        None => true,
        Some(first) => matches!(
            first.to_ascii_lowercase().as_str(),
            "and" | "then" | "for"
        ),
    }
}

fn parse_extraction_target(task: &str) -> Option<String> {
    EXTRACT_TARGET_RE
        .captures(task)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_navigation_target(task: &str) -> Option<String> {
    if let Some(url) = URL_RE.find(task) {
        return Some(url.as_str().to_string());
    }
    if let Some(domain) = DOMAIN_RE.find(task) {
        return Some(domain.as_str().to_string());
    }
    NAV_TARGET_RE
        .captures(task)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> RuleBasedPlanner {
        RuleBasedPlanner::default()
    }

    #[test]
    fn classification_prefers_single_match() {
        let p = planner();
        assert_eq!(p.classify_task("Open Bilibili"), TaskCategory::Navigation);
        assert_eq!(p.classify_task("Search for rust"), TaskCategory::Search);
        assert_eq!(p.classify_task("Click the red button"), TaskCategory::Interaction);
        assert_eq!(
            p.classify_task("Search Baidu for '莆田' and tell me about the first two posts"),
            TaskCategory::Composite
        );
        assert_eq!(p.classify_task("hmm"), TaskCategory::Composite);
    }

    #[test]
    fn multi_step_detection() {
        let p = planner();
        assert!(p.is_multi_step("Open example.com then click login"));
        assert!(p.is_multi_step("Search for rust and summarize the first result"));
        assert!(p.is_multi_step("Open bilibili and play the first video"));
        assert!(!p.is_multi_step("Open Bilibili"));
        assert!(!p.is_multi_step("Extract the headline"));
    }

    #[test]
    fn search_query_parsing_falls_back_to_placeholder() {
        let goals = search_and_extract("search and summarize");
        assert_eq!(goals[0].description, "Search for 'specified query'");
        assert_eq!(goals[1].description, "Extract information about content");

        let goals = search_and_extract("Search google for rust async and summarize the top answer");
        assert_eq!(goals[0].description, "Search for 'rust async'");
        assert_eq!(goals[1].description, "Extract information about top answer");
    }

    #[test]
    fn navigate_and_interact_extracts_target() {
        let goals = navigate_and_interact("Open bilibili.com and play the first video");
        assert_eq!(goals.len(), 2);
        assert_eq!(goals[0].description, "Navigate to bilibili.com");
        assert_eq!(goals[0].goal_type, SubGoalType::Navigation);
        assert_eq!(goals[1].description, "Interact: play the first video");
    }

    #[test]
    fn sequence_split_tags_each_segment() {
        let goals = sequence_goals("Go to the settings page, then scroll down, then press save", 5);
        let descriptions: Vec<&str> = goals.iter().map(|g| g.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec!["Go to the settings page", "scroll down", "press save"]
        );
        assert_eq!(goals[0].goal_type, SubGoalType::Navigation);
        assert_eq!(goals[1].goal_type, SubGoalType::Composite);
        assert_eq!(goals[2].goal_type, SubGoalType::Interaction);
    }

    #[test]
    fn generic_split_is_quote_aware() {
        let segments = split_generic("type \"salt and pepper\" and press enter");
        assert_eq!(segments, vec!["type \"salt and pepper\"", "press enter"]);

        let segments = split_generic("a, b，c");
        assert_eq!(segments, vec!["a", "b", "c"]);
    }

    #[test]
    fn generic_fallback_synthesises_two_goals() {
        let goals = generic_goals("download the report", 5);
        assert_eq!(goals.len(), 2);
        assert_eq!(goals[0].description, "Complete first part of task");
        assert_eq!(goals[1].description, "Complete second part of task");
    }

    #[test]
    fn budget_rebalance_sums_exactly() {
        let mut goals = vec![
            SubGoal::new(1, "a", SubGoalType::Search, "x", 3),
            SubGoal::new(2, "b", SubGoalType::ContentExtraction, "x", 5),
        ];
        assert_eq!(calculate_step_budget(&mut goals), 50);
        // 50 * 3 / 8 = 18, remainder 32
        assert_eq!(goals[0].estimated_steps, 18);
        assert_eq!(goals[1].estimated_steps, 32);
    }

    #[test]
    fn empty_task_yields_fallback() {
        let plan = planner().analyze_task("   ");
        assert_eq!(plan, Plan::fallback());
    }
}
