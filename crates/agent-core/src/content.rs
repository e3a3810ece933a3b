//! Page-content heuristics: classify what the current page shows, pull
//! structured records out of its markdown, and compress long text.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::planner::{SubGoal, SubGoalType};

static MARKDOWN_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]\n]+)\]\((https?://[^)\s]+)\)").expect("markdown link regex")
});
static LIST_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.+)$").expect("list marker regex"));
static SENTENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^.!?。！？]+[.!?。！？]*").expect("sentence regex"));

const SEARCH_URL_MARKERS: &[&str] = &["search", "/s?", "wd=", "q=", "keyword="];
const POST_URL_MARKERS: &[&str] = &["/post", "/p/", "/status", "/thread", "tieba", "/note", "/t/"];
const ARTICLE_URL_MARKERS: &[&str] = &["/article", "/news", "/blog"];

const MIN_LIST_LINES: usize = 5;
const LONG_PARAGRAPH_CHARS: usize = 200;
const MIN_LINK_TITLE_CHARS: usize = 4;
const SNIPPET_CHARS: usize = 200;

/// Default length budget for [`ContentExtractor::summarize`].
pub const DEFAULT_SUMMARY_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPattern {
    SearchResults,
    ArticleContent,
    PostContent,
    ListItems,
    Generic,
}

impl ContentPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentPattern::SearchResults => "search_results",
            ContentPattern::ArticleContent => "article_content",
            ContentPattern::PostContent => "post_content",
            ContentPattern::ListItems => "list_items",
            ContentPattern::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecommendation {
    pub action: String,
    pub reasoning: String,
}

impl ActionRecommendation {
    fn new(action: &str, reasoning: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            reasoning: reasoning.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedItem {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snippet: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleContent {
    pub title: String,
    pub headings: Vec<String>,
    pub paragraphs: Vec<String>,
}

/// Structured records pulled from a page, tagged by the pattern they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", content = "items", rename_all = "snake_case")]
pub enum ExtractedContent {
    SearchResults(Vec<LinkedItem>),
    Article(ArticleContent),
    Posts(Vec<LinkedItem>),
    ListItems(Vec<String>),
    Nothing,
}

impl ExtractedContent {
    pub fn len(&self) -> usize {
        match self {
            ExtractedContent::SearchResults(items) | ExtractedContent::Posts(items) => items.len(),
            ExtractedContent::Article(article) => article.paragraphs.len(),
            ExtractedContent::ListItems(items) => items.len(),
            ExtractedContent::Nothing => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Content analysis consumed by the control loop after `snapshot` and
/// `getMarkdown`.
pub trait ContentExtractor: Send + Sync {
    fn identify_pattern(&self, text: &str, url: Option<&str>) -> ContentPattern;

    fn recommend_action(
        &self,
        pattern: ContentPattern,
        sub_goal: Option<&SubGoal>,
    ) -> ActionRecommendation;

    fn extract_search_results(&self, text: &str, count: usize) -> Vec<LinkedItem>;

    fn extract_article(&self, text: &str) -> ArticleContent;

    fn extract_posts(&self, text: &str, count: usize) -> Vec<LinkedItem>;

    fn extract_list_items(&self, text: &str, count: usize) -> Vec<String>;

    fn summarize(&self, text: &str, max_chars: usize) -> String;

    fn extract(&self, pattern: ContentPattern, text: &str, count: usize) -> ExtractedContent {
        match pattern {
            ContentPattern::SearchResults => {
                ExtractedContent::SearchResults(self.extract_search_results(text, count))
            }
            ContentPattern::ArticleContent => ExtractedContent::Article(self.extract_article(text)),
            ContentPattern::PostContent => ExtractedContent::Posts(self.extract_posts(text, count)),
            ContentPattern::ListItems => {
                ExtractedContent::ListItems(self.extract_list_items(text, count))
            }
            ContentPattern::Generic => ExtractedContent::Nothing,
        }
    }
}

/// URL and text heuristics over page markdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicContentExtractor;

impl HeuristicContentExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ContentExtractor for HeuristicContentExtractor {
    fn identify_pattern(&self, text: &str, url: Option<&str>) -> ContentPattern {
        if let Some(url) = url {
            let url = url.to_lowercase();
            if SEARCH_URL_MARKERS.iter().any(|marker| url.contains(marker)) {
                return ContentPattern::SearchResults;
            }
            if POST_URL_MARKERS.iter().any(|marker| url.contains(marker)) {
                return ContentPattern::PostContent;
            }
            if ARTICLE_URL_MARKERS.iter().any(|marker| url.contains(marker)) {
                return ContentPattern::ArticleContent;
            }
        }

        let list_lines = text.lines().filter(|line| LIST_MARKER_RE.is_match(line)).count();
        if list_lines >= MIN_LIST_LINES {
            return ContentPattern::ListItems;
        }

        let long_paragraphs = paragraphs(text)
            .iter()
            .filter(|paragraph| !paragraph.starts_with('#'))
            .filter(|paragraph| paragraph.chars().count() >= LONG_PARAGRAPH_CHARS)
            .count();
        if long_paragraphs >= 2 {
            return ContentPattern::ArticleContent;
        }

        ContentPattern::Generic
    }

    fn recommend_action(
        &self,
        pattern: ContentPattern,
        sub_goal: Option<&SubGoal>,
    ) -> ActionRecommendation {
        let extracting = sub_goal
            .map(|goal| goal.goal_type == SubGoalType::ContentExtraction)
            .unwrap_or(false);
        match pattern {
            ContentPattern::SearchResults if extracting => ActionRecommendation::new(
                "extractMultipleItems",
                "Search results are on the page; extract the top entries directly",
            ),
            ContentPattern::SearchResults => ActionRecommendation::new(
                "click",
                "Search results are listed; open the most relevant result",
            ),
            ContentPattern::ArticleContent => ActionRecommendation::new(
                "getMarkdown",
                "Article body is present; read it with getMarkdown",
            ),
            ContentPattern::PostContent => ActionRecommendation::new(
                "getMarkdown",
                "A post is open; read its content with getMarkdown",
            ),
            ContentPattern::ListItems => ActionRecommendation::new(
                "extractMultipleItems",
                "The page is a list; extract several items at once",
            ),
            ContentPattern::Generic if extracting => ActionRecommendation::new(
                "getMarkdown",
                "No specific structure recognised; read the page as markdown",
            ),
            ContentPattern::Generic => ActionRecommendation::new(
                "snapshot",
                "No specific structure recognised; inspect interactive elements",
            ),
        }
    }

    fn extract_search_results(&self, text: &str, count: usize) -> Vec<LinkedItem> {
        linked_items(text, count, |_| true)
    }

    fn extract_article(&self, text: &str) -> ArticleContent {
        let headings: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('#'))
            .map(|line| line.trim_start_matches('#').trim().to_string())
            .filter(|heading| !heading.is_empty())
            .collect();

        let title = headings.first().cloned().unwrap_or_else(|| {
            text.lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or_default()
                .to_string()
        });

        let paragraphs = paragraphs(text)
            .into_iter()
            .filter(|paragraph| !paragraph.starts_with('#'))
            .filter(|paragraph| !LIST_MARKER_RE.is_match(paragraph))
            .filter(|paragraph| paragraph.chars().count() >= 20)
            .collect();

        ArticleContent {
            title,
            headings,
            paragraphs,
        }
    }

    fn extract_posts(&self, text: &str, count: usize) -> Vec<LinkedItem> {
        let posts = linked_items(text, count, |url| {
            let url = url.to_lowercase();
            POST_URL_MARKERS.iter().any(|marker| url.contains(marker))
        });
        if posts.is_empty() {
            self.extract_search_results(text, count)
        } else {
            posts
        }
    }

    fn extract_list_items(&self, text: &str, count: usize) -> Vec<String> {
        text.lines()
            .filter_map(|line| LIST_MARKER_RE.captures(line))
            .filter_map(|caps| caps.get(1))
            .map(|item| strip_links(item.as_str().trim()))
            .filter(|item| !item.is_empty())
            .take(count)
            .collect()
    }

    fn summarize(&self, text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }

        let blocks = paragraphs(text);
        if blocks.len() < 3 {
            return truncate_chars(text, max_chars);
        }

        let first = &blocks[0];
        let last = &blocks[blocks.len() - 1];
        let middle = blocks[1..blocks.len() - 1].join(" ");
        let budget = max_chars
            .saturating_sub(first.chars().count())
            .saturating_sub(last.chars().count())
            .saturating_sub(4);

        let key_sentences = rank_sentences(&middle, text, budget);
        let summary = if key_sentences.is_empty() {
            format!("{first}\n\n{last}")
        } else {
            format!("{first}\n\n{key_sentences}\n\n{last}")
        };
        truncate_chars(&summary, max_chars)
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|block| {
            block
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|block| !block.is_empty())
        .collect()
}

fn strip_links(text: &str) -> String {
    MARKDOWN_LINK_RE.replace_all(text, "$1").trim().to_string()
}

fn linked_items(text: &str, count: usize, accept: impl Fn(&str) -> bool) -> Vec<LinkedItem> {
    let lines: Vec<&str> = text.lines().collect();
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        for caps in MARKDOWN_LINK_RE.captures_iter(line) {
            let title = caps[1].trim().to_string();
            let url = caps[2].to_string();
            if title.chars().count() < MIN_LINK_TITLE_CHARS || !accept(&url) {
                continue;
            }
            if !seen.insert(url.clone()) {
                continue;
            }
            let snippet = lines
                .iter()
                .skip(idx + 1)
                .map(|next| next.trim())
                .find(|next| !next.is_empty())
                .filter(|next| !MARKDOWN_LINK_RE.is_match(next) && !next.starts_with('#'))
                .map(|next| truncate_chars(next, SNIPPET_CHARS))
                .unwrap_or_default();
            items.push(LinkedItem {
                title,
                url,
                snippet,
            });
            if items.len() >= count {
                return items;
            }
        }
    }
    items
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
}

/// Highest-scoring sentences of `middle` that fit `budget`, in original order.
fn rank_sentences(middle: &str, corpus: &str, budget: usize) -> String {
    let mut frequency: HashMap<String, usize> = HashMap::new();
    for word in words(corpus) {
        *frequency.entry(word).or_insert(0) += 1;
    }

    let sentences: Vec<&str> = SENTENCE_RE
        .find_iter(middle)
        .map(|m| m.as_str().trim())
        .filter(|sentence| sentence.chars().count() > 10)
        .collect();

    let mut scored: Vec<(usize, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(idx, sentence)| {
            let tokens: Vec<String> = words(sentence).collect();
            let total: usize = tokens
                .iter()
                .map(|token| frequency.get(token).copied().unwrap_or(0))
                .sum();
            (idx, total as f64 / tokens.len().max(1) as f64)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut chosen = Vec::new();
    let mut used = 0;
    for (idx, _) in scored {
        let len = sentences[idx].chars().count() + 1;
        if used + len > budget {
            continue;
        }
        used += len;
        chosen.push(idx);
    }
    chosen.sort_unstable();
    chosen
        .into_iter()
        .map(|idx| sentences[idx])
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_PAGE: &str = "# Results\n\n\
        [莆田 - 百度百科](https://baike.baidu.com/item/putian)\n\
        莆田市，福建省辖地级市。\n\n\
        [莆田吧 - 百度贴吧](https://tieba.baidu.com/p/12345)\n\
        欢迎来到莆田吧\n\n\
        [Putian travel guide](https://travel.example.com/putian)\n\
        Things to do in Putian\n\n\
        [Putian travel guide](https://travel.example.com/putian)\n";

    #[test]
    fn identifies_pattern_from_url_first() {
        let extractor = HeuristicContentExtractor::new();
        assert_eq!(
            extractor.identify_pattern("", Some("https://www.baidu.com/s?wd=%E8%8E%86")),
            ContentPattern::SearchResults
        );
        assert_eq!(
            extractor.identify_pattern("", Some("https://tieba.baidu.com/p/12345")),
            ContentPattern::PostContent
        );
        assert_eq!(
            extractor.identify_pattern("", Some("https://example.com/blog/rust-2024")),
            ContentPattern::ArticleContent
        );
    }

    #[test]
    fn identifies_pattern_from_text() {
        let extractor = HeuristicContentExtractor::new();
        let list = "- one\n- two\n- three\n- four\n- five\n";
        assert_eq!(extractor.identify_pattern(list, None), ContentPattern::ListItems);

        let long = "word ".repeat(50);
        let article = format!("# Title\n\n{long}\n\n{long}");
        assert_eq!(
            extractor.identify_pattern(&article, Some("https://example.com/")),
            ContentPattern::ArticleContent
        );
        assert_eq!(extractor.identify_pattern("hello", None), ContentPattern::Generic);
    }

    #[test]
    fn search_results_are_deduplicated_and_capped() {
        let extractor = HeuristicContentExtractor::new();
        let results = extractor.extract_search_results(SEARCH_PAGE, 5);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].url, "https://baike.baidu.com/item/putian");
        assert_eq!(results[0].snippet, "莆田市，福建省辖地级市。");
        assert_eq!(extractor.extract_search_results(SEARCH_PAGE, 2).len(), 2);
    }

    #[test]
    fn posts_prefer_post_links() {
        let extractor = HeuristicContentExtractor::new();
        let posts = extractor.extract_posts(SEARCH_PAGE, 5);
        assert_eq!(posts.len(), 1);
        assert!(posts[0].url.contains("/p/"));
    }

    #[test]
    fn article_extraction_collects_headings_and_paragraphs() {
        let extractor = HeuristicContentExtractor::new();
        let text = "# Main title\n\nThe opening paragraph is long enough.\n\n## Section\n\nshort\n\nAnother paragraph that survives the filter.";
        let article = extractor.extract_article(text);
        assert_eq!(article.title, "Main title");
        assert_eq!(article.headings, vec!["Main title", "Section"]);
        assert_eq!(article.paragraphs.len(), 2);
    }

    #[test]
    fn list_items_strip_markers_and_links() {
        let extractor = HeuristicContentExtractor::new();
        let text = "1. [First](https://a.example)\n2. Second\n* Third\nplain";
        assert_eq!(
            extractor.extract_list_items(text, 10),
            vec!["First", "Second", "Third"]
        );
    }

    #[test]
    fn summarize_keeps_ends_and_respects_budget() {
        let extractor = HeuristicContentExtractor::new();
        let middle: Vec<String> = (0..40)
            .map(|i| format!("Sentence number {i} talks about rust ownership rules."))
            .collect();
        let text = format!(
            "Opening paragraph.\n\n{}\n\nClosing paragraph.",
            middle.join(" ")
        );
        let summary = extractor.summarize(&text, 400);
        assert!(summary.chars().count() <= 400);
        assert!(summary.starts_with("Opening paragraph."));
        assert!(summary.ends_with("Closing paragraph."));

        assert_eq!(extractor.summarize("short", 1000), "short");
        let blob = "x".repeat(1500);
        let cut = extractor.summarize(&blob, 1000);
        assert_eq!(cut.chars().count(), 1000);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn recommendation_depends_on_sub_goal() {
        let extractor = HeuristicContentExtractor::new();
        let extract = SubGoal::new(2, "Extract posts", SubGoalType::ContentExtraction, "content extracted", 3);
        assert_eq!(
            extractor
                .recommend_action(ContentPattern::SearchResults, Some(&extract))
                .action,
            "extractMultipleItems"
        );
        assert_eq!(
            extractor
                .recommend_action(ContentPattern::SearchResults, None)
                .action,
            "click"
        );
    }

    #[test]
    fn extracted_content_serialises_tagged() {
        let content = ExtractedContent::ListItems(vec!["a".into()]);
        let value = serde_json::to_value(&content).expect("serialise");
        assert_eq!(value["pattern"], "list_items");
        assert_eq!(content.len(), 1);
    }
}
