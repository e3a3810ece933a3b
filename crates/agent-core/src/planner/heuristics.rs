use serde::{Deserialize, Serialize};

use super::keywords::{
    matches_any, EXTRACTION_KEYWORDS, INTERACTION_KEYWORDS, NAVIGATION_KEYWORDS, SEARCH_KEYWORDS,
};

const MULTI_PAGE_MARKERS: &[&str] = &[
    "each",
    "every",
    "all",
    "multiple",
    "pages",
    "several",
    "每个",
    "多个",
    "所有",
];

/// Recognised shapes of browsing tasks, used only to enrich prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPattern {
    SimpleSearch,
    SearchAndExtract,
    Navigation,
    MultiPageExtraction,
    Interaction,
}

impl TaskPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPattern::SimpleSearch => "simple_search",
            TaskPattern::SearchAndExtract => "search_and_extract",
            TaskPattern::Navigation => "navigation",
            TaskPattern::MultiPageExtraction => "multi_page_extraction",
            TaskPattern::Interaction => "interaction",
        }
    }
}

/// Static advisory record injected into prompts. Never enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHeuristic {
    pub pattern: TaskPattern,
    pub name: String,
    pub steps: Vec<String>,
    pub guidance: String,
    pub tips: Vec<String>,
}

impl TaskHeuristic {
    fn build(
        pattern: TaskPattern,
        name: &str,
        steps: &[&str],
        guidance: &str,
        tips: &[&str],
    ) -> Self {
        Self {
            pattern,
            name: name.to_string(),
            steps: steps.iter().map(|s| s.to_string()).collect(),
            guidance: guidance.to_string(),
            tips: tips.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Render the heuristic as a prompt block.
    pub fn render(&self) -> String {
        let mut out = format!("Suggested approach ({}):\n", self.name);
        for (idx, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", idx + 1, step));
        }
        out.push_str(&self.guidance);
        out.push('\n');
        for tip in &self.tips {
            out.push_str(&format!("- {}\n", tip));
        }
        out
    }
}

/// Classify the task shape independently of its [`super::TaskCategory`].
pub fn identify_task_pattern(task: &str) -> Option<TaskPattern> {
    let text = task.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    let search = matches_any(&text, SEARCH_KEYWORDS);
    let extraction = matches_any(&text, EXTRACTION_KEYWORDS);

    if search && extraction {
        return Some(TaskPattern::SearchAndExtract);
    }
    if extraction && matches_any(&text, MULTI_PAGE_MARKERS) {
        return Some(TaskPattern::MultiPageExtraction);
    }
    if search {
        return Some(TaskPattern::SimpleSearch);
    }
    if matches_any(&text, INTERACTION_KEYWORDS) {
        return Some(TaskPattern::Interaction);
    }
    if matches_any(&text, NAVIGATION_KEYWORDS) {
        return Some(TaskPattern::Navigation);
    }
    None
}

pub fn heuristic_for_pattern(pattern: TaskPattern) -> TaskHeuristic {
    match pattern {
        TaskPattern::SimpleSearch => TaskHeuristic::build(
            pattern,
            "Simple search",
            &[
                "Use search(text) to submit the query",
                "Take one snapshot of the results page",
                "Report the relevant results with finished()",
            ],
            "A single search is usually enough; do not re-run the same query.",
            &["search() locates the input box for you", "Avoid repeated snapshots"],
        ),
        TaskPattern::SearchAndExtract => TaskHeuristic::build(
            pattern,
            "Search then extract",
            &[
                "Submit the query with search(text)",
                "Open the most relevant result with click(ref)",
                "Read the page with getMarkdown() or getText(ref)",
                "Summarise the findings with finished()",
            ],
            "Move on to extraction as soon as results are visible.",
            &[
                "Use extractMultipleItems(count) on result lists",
                "Prefer getMarkdown() over repeated snapshots for reading",
            ],
        ),
        TaskPattern::Navigation => TaskHeuristic::build(
            pattern,
            "Direct navigation",
            &[
                "navigate(url) to the target site",
                "Confirm the page loaded with one snapshot",
                "Call finished() once the page is open",
            ],
            "Navigation tasks are done when the target page is open.",
            &["Do not call getUrl() repeatedly to check the location"],
        ),
        TaskPattern::MultiPageExtraction => TaskHeuristic::build(
            pattern,
            "Multi-page extraction",
            &[
                "Collect the list of target pages",
                "Visit each page once and extract its content",
                "Aggregate the results, optionally with generateDocument()",
            ],
            "Keep track of which pages are already done; never revisit one.",
            &[
                "extractMultipleItems(count) captures list pages in one step",
                "Stop navigating back and forth between two pages",
            ],
        ),
        TaskPattern::Interaction => TaskHeuristic::build(
            pattern,
            "Page interaction",
            &[
                "Take a snapshot to get element refs",
                "click(ref) or fill(ref, text) the target element",
                "Verify the result and call finished()",
            ],
            "Refs expire after every snapshot; always use the latest ones.",
            &["If a click has no visible effect, try a different element"],
        ),
    }
}
