#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use agent_core::{AgentLoopConfig, AgentLoopController, BrowserEnvironment, EnvironmentError, ScriptedLlmProvider};
use async_trait::async_trait;
use webpilot_core_types::{ElementInfo, InteractionResult, PageSnapshot, ScrollDirection};

pub const RESULTS_MARKDOWN: &str = "# Results\n\
[Putian travel guide](https://tieba.baidu.com/p/1001) - Things to see in Putian\n\
[Putian food notes](https://tieba.baidu.com/p/1002) - Local dishes\n\
[Putian history](https://tieba.baidu.com/p/1003) - A short history\n";

/// In-memory browser: every interaction succeeds, searches and navigations
/// move the current URL.
pub struct MockBrowser {
    url: Mutex<String>,
    markdown: String,
    // ref -> URL the click lands on
    links: BTreeMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            url: Mutex::new("about:blank".to_string()),
            markdown: RESULTS_MARKDOWN.to_string(),
            links: BTreeMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_markdown(mut self, markdown: impl Into<String>) -> Self {
        self.markdown = markdown.into();
        self
    }

    /// Clicking `element_ref` navigates to `url`.
    pub fn with_link(mut self, element_ref: &str, url: &str) -> Self {
        self.links.insert(element_ref.to_string(), url.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn goto(&self, url: &str) -> InteractionResult {
        *self.url.lock().unwrap() = url.to_string();
        InteractionResult::ok().with_navigation(url)
    }
}

#[async_trait]
impl BrowserEnvironment for MockBrowser {
    async fn snapshot(&self) -> Result<PageSnapshot, EnvironmentError> {
        self.log("snapshot");
        let mut refs = BTreeMap::new();
        refs.insert("e1".to_string(), ElementInfo::new("#kw", "textbox", "Search"));
        refs.insert("e2".to_string(), ElementInfo::new("a.result", "link", "Putian travel guide"));
        Ok(PageSnapshot::new(
            "[e1] textbox \"Search\"\n[e2] link \"Putian travel guide\"",
            refs,
        ))
    }

    async fn click(&self, element_ref: &str) -> Result<InteractionResult, EnvironmentError> {
        self.log(format!("click {element_ref}"));
        if element_ref == "e404" {
            return Err(EnvironmentError::ElementNotFound(element_ref.to_string()));
        }
        match self.links.get(element_ref) {
            Some(url) => Ok(self.goto(url)),
            None => Ok(InteractionResult::ok()),
        }
    }

    async fn fill(&self, element_ref: &str, text: &str) -> Result<InteractionResult, EnvironmentError> {
        self.log(format!("fill {element_ref} {text}"));
        Ok(InteractionResult::ok())
    }

    async fn scroll(&self, direction: ScrollDirection) -> Result<InteractionResult, EnvironmentError> {
        self.log(format!("scroll {}", direction.as_str()));
        Ok(InteractionResult::ok())
    }

    async fn search(&self, text: &str) -> Result<InteractionResult, EnvironmentError> {
        self.log(format!("search {text}"));
        Ok(self.goto(&format!("https://www.baidu.com/s?wd={text}")))
    }

    async fn navigate(&self, url: &str) -> Result<InteractionResult, EnvironmentError> {
        self.log(format!("navigate {url}"));
        Ok(self.goto(url))
    }

    async fn get_url(&self) -> Result<String, EnvironmentError> {
        self.log("getUrl");
        Ok(self.url.lock().unwrap().clone())
    }

    async fn get_title(&self) -> Result<String, EnvironmentError> {
        Ok("Mock page".to_string())
    }

    async fn get_text(&self, element_ref: &str) -> Result<String, EnvironmentError> {
        Ok(format!("text of {element_ref}"))
    }

    async fn get_markdown(&self) -> Result<String, EnvironmentError> {
        self.log("getMarkdown");
        Ok(self.markdown.clone())
    }
}

/// One JSON reply in the shape the agent loop expects.
pub fn reply(action: &str, args: serde_json::Value) -> String {
    serde_json::json!({ "thought": format!("next: {action}"), "action": action, "args": args })
        .to_string()
}

pub struct Harness {
    pub llm: Arc<ScriptedLlmProvider>,
    pub browser: Arc<MockBrowser>,
    pub controller: AgentLoopController,
}

pub fn harness(config: AgentLoopConfig, llm: ScriptedLlmProvider) -> Harness {
    harness_with(config, llm, MockBrowser::new())
}

pub fn harness_with(config: AgentLoopConfig, llm: ScriptedLlmProvider, browser: MockBrowser) -> Harness {
    let llm = Arc::new(llm);
    let browser = Arc::new(browser);
    let controller = AgentLoopController::new(config, llm.clone(), browser.clone());
    Harness {
        llm,
        browser,
        controller,
    }
}

/// Text of the user message sent on the most recent model call.
pub fn last_prompt(llm: &ScriptedLlmProvider) -> String {
    llm.last_messages()
        .and_then(|messages| messages.last().map(|message| message.content.clone()))
        .unwrap_or_default()
}

/// User message of every model call, oldest first.
pub fn prompts(llm: &ScriptedLlmProvider) -> Vec<String> {
    llm.recorded_calls()
        .iter()
        .map(|messages| {
            messages
                .last()
                .map(|message| message.content.clone())
                .unwrap_or_default()
        })
        .collect()
}
