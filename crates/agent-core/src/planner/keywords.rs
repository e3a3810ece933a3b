//! Keyword vocabularies used by the planner heuristics.
//!
//! Matching is plain keyword presence in lowercased task text. ASCII terms
//! must sit on word boundaries; CJK terms match as substrings.

pub const NAVIGATION_KEYWORDS: &[&str] = &[
    "open",
    "go to",
    "navigate",
    "visit",
    "browse to",
    "打开",
    "访问",
    "进入",
    "前往",
];

pub const SEARCH_KEYWORDS: &[&str] = &[
    "search",
    "find",
    "look up",
    "look for",
    "query",
    "搜索",
    "查找",
    "搜一下",
];

pub const EXTRACTION_KEYWORDS: &[&str] = &[
    "extract",
    "tell me",
    "summarize",
    "summarise",
    "summary",
    "read",
    "collect",
    "list",
    "get the",
    "what is",
    "what are",
    "about",
    "details",
    "提取",
    "总结",
    "告诉我",
    "获取",
    "介绍",
];

pub const INTERACTION_KEYWORDS: &[&str] = &[
    "click",
    "fill",
    "type",
    "submit",
    "press",
    "login",
    "log in",
    "sign in",
    "follow",
    "like",
    "play",
    "watch",
    "subscribe",
    "点击",
    "填写",
    "登录",
    "关注",
    "播放",
    "点赞",
];

pub const SEQUENCE_CONNECTIVES: &[&str] = &[
    "then",
    "after",
    "next",
    "followed by",
    "然后",
    "接着",
    "之后",
];

/// Verbs counted when deciding whether a task needs several actions.
///
/// Extraction verbs are deliberately absent: "extract X" alone is one step.
pub const ACTION_VERBS: &[&str] = &[
    "search",
    "find",
    "open",
    "go to",
    "navigate",
    "visit",
    "click",
    "fill",
    "type",
    "submit",
    "press",
    "login",
    "sign in",
    "follow",
    "like",
    "play",
    "watch",
    "subscribe",
    "scroll",
    "download",
    "搜索",
    "打开",
    "点击",
    "播放",
    "关注",
];

/// Whether `term` occurs in `text` (both expected lowercase).
pub fn contains_term(text: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    if !term.is_ascii() {
        return text.contains(term);
    }
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(pos) = text[start..].find(term) {
        let begin = start + pos;
        let end = begin + term.len();
        let before_ok = begin == 0 || !is_word_byte(bytes[begin - 1]);
        let after_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        // term is ASCII, so begin + 1 is always a char boundary
        start = begin + 1;
    }
    false
}

pub(crate) fn matches_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| contains_term(text, term))
}

pub(crate) fn count_distinct(text: &str, terms: &[&str]) -> usize {
    terms.iter().filter(|term| contains_term(text, term)).count()
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_terms_respect_word_boundaries() {
        assert!(contains_term("open bilibili", "open"));
        assert!(!contains_term("reopened tabs", "open"));
        assert!(!contains_term("my playlist", "list"));
        assert!(contains_term("list, then stop", "list"));
        assert!(contains_term("please go to example.com", "go to"));
    }

    #[test]
    fn cjk_terms_match_as_substrings() {
        assert!(contains_term("帮我搜索莆田", "搜索"));
        assert!(contains_term("search莆田", "search"));
        assert!(!contains_term("莆田", "搜索"));
    }

    #[test]
    fn counts_distinct_verbs() {
        let text = "open bilibili and play the first video";
        assert_eq!(count_distinct(text, ACTION_VERBS), 2);
        assert!(matches_any(text, INTERACTION_KEYWORDS));
    }
}
