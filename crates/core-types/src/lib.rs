//! Primitives shared between the webpilot agent core and browser drivers.
//!
//! Browser drivers (the snapshot/DOM layer) produce these values; the agent
//! loop consumes them without knowing how they were obtained.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor of one element addressed by an ephemeral ref.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ElementInfo {
    pub selector: String,
    pub role: String,
    pub name: String,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub attributes: BTreeMap<String, String>,
}

impl ElementInfo {
    pub fn new(
        selector: impl Into<String>,
        role: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            selector: selector.into(),
            role: role.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Accessibility-tree style snapshot of the current page.
///
/// Refs are regenerated on every snapshot and are only valid until the next one.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PageSnapshot {
    pub tree: String,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub refs: BTreeMap<String, ElementInfo>,
    pub element_count: usize,
    pub success: bool,
}

impl PageSnapshot {
    pub fn new(tree: impl Into<String>, refs: BTreeMap<String, ElementInfo>) -> Self {
        let element_count = refs.len();
        Self {
            tree: tree.into(),
            refs,
            element_count,
            success: true,
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }

    pub fn has_ref(&self, element_ref: &str) -> bool {
        self.refs.contains_key(element_ref)
    }
}

/// Outcome of click/fill/scroll/search interactions.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InteractionResult {
    pub success: bool,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub error: Option<String>,
    /// URL reached when the interaction triggered a navigation.
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub navigate: Option<String>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub video_opened: bool,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub follow_clicked: bool,
}

impl InteractionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_navigation(mut self, url: impl Into<String>) -> Self {
        self.navigate = Some(url.into());
        self
    }

    pub fn with_video_opened(mut self) -> Self {
        self.video_opened = true;
        self
    }

    pub fn with_follow_clicked(mut self) -> Self {
        self.follow_clicked = true;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognised {kind}: {value}")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Top => "top",
            ScrollDirection::Bottom => "bottom",
        }
    }
}

impl FromStr for ScrollDirection {
    type Err = ParseKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "top" => Ok(ScrollDirection::Top),
            "bottom" => Ok(ScrollDirection::Bottom),
            _ => Err(ParseKindError {
                kind: "scroll direction",
                value: value.to_string(),
            }),
        }
    }
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DocumentKind {
    Excel,
    Word,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Excel => "excel",
            DocumentKind::Word => "word",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = ParseKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "excel" | "xlsx" => Ok(DocumentKind::Excel),
            "word" | "docx" => Ok(DocumentKind::Word),
            _ => Err(ParseKindError {
                kind: "document type",
                value: value.to_string(),
            }),
        }
    }
}

/// Receipt returned by the document generation service.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DocumentReceipt {
    pub success: bool,
    pub filename: String,
    pub item_count: usize,
}
