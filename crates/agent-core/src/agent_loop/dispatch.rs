//! Executes one typed action against the environment.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use webpilot_core_types::{DocumentKind, InteractionResult, PageSnapshot, ScrollDirection};

use super::config::AgentLoopConfig;
use super::controller::StopHandle;
use super::types::{ActionKind, ActionOutcome, OutcomeAnnotation};
use crate::content::{ContentExtractor, ContentPattern};
use crate::environment::{BrowserEnvironment, EnvironmentError, UserInput};
use crate::optimizer::ExecutionOptimizer;

const DEFAULT_EXTRACT_COUNT: usize = 5;
const DEFAULT_DOCUMENT_NAME: &str = "webpilot-export";

/// Collaborators an action may touch.
pub(crate) struct DispatchContext<'a> {
    pub env: &'a dyn BrowserEnvironment,
    pub user: &'a dyn UserInput,
    pub extractor: &'a dyn ContentExtractor,
    pub config: &'a AgentLoopConfig,
    pub stop: &'a StopHandle,
}

/// Outcome plus page material the controller keeps for the next prompt.
#[derive(Debug)]
pub(crate) struct Dispatched {
    pub outcome: ActionOutcome,
    pub snapshot: Option<PageSnapshot>,
    /// Page text to run content identification over.
    pub page_text: Option<String>,
}

impl Dispatched {
    fn outcome(outcome: ActionOutcome) -> Self {
        Self {
            outcome,
            snapshot: None,
            page_text: None,
        }
    }
}

impl From<ActionOutcome> for Dispatched {
    fn from(outcome: ActionOutcome) -> Self {
        Self::outcome(outcome)
    }
}

pub(crate) async fn dispatch(
    ctx: &DispatchContext<'_>,
    kind: ActionKind,
    args: &Value,
    current_url: Option<&str>,
    optimizer: &ExecutionOptimizer,
) -> Dispatched {
    match kind {
        ActionKind::Snapshot => match ctx.env.snapshot().await {
            Ok(snapshot) if snapshot.success => {
                let outcome = ActionOutcome::ok(json!({ "elementCount": snapshot.element_count }));
                Dispatched {
                    outcome,
                    page_text: Some(snapshot.tree.clone()),
                    snapshot: Some(snapshot),
                }
            }
            Ok(_) => ActionOutcome::failed("snapshot", "snapshot failed").into(),
            Err(err) => env_failure(err).into(),
        },
        ActionKind::Click => {
            let Some(element_ref) = str_arg(args, "ref") else {
                return missing_arg(kind, "ref").into();
            };
            let result = ctx.env.click(element_ref).await;
            interaction(ctx, result, json!({ "ref": element_ref }), kind).await.into()
        }
        ActionKind::Fill => {
            let Some(element_ref) = str_arg(args, "ref") else {
                return missing_arg(kind, "ref").into();
            };
            let Some(text) = str_arg(args, "text") else {
                return missing_arg(kind, "text").into();
            };
            let result = ctx.env.fill(element_ref, text).await;
            interaction(ctx, result, json!({ "ref": element_ref, "filled": text }), kind)
                .await
                .into()
        }
        ActionKind::Search => {
            let Some(text) = str_arg(args, "text").or_else(|| str_arg(args, "query")) else {
                return missing_arg(kind, "text").into();
            };
            let result = ctx.env.search(text).await;
            interaction(ctx, result, json!({ "query": text }), kind).await.into()
        }
        ActionKind::Navigate => {
            let Some(url) = str_arg(args, "url") else {
                return missing_arg(kind, "url").into();
            };
            if !optimizer.is_navigation_needed(url, current_url) {
                debug!(target: "agent_loop", url, "already on target; navigation skipped");
                return ActionOutcome::ok(json!({ "url": url }))
                    .with_annotation(OutcomeAnnotation::NavigationSkipped)
                    .into();
            }
            let result = ctx.env.navigate(url).await.map(|mut result| {
                if result.success && result.navigate.is_none() {
                    result.navigate = Some(url.to_string());
                }
                result
            });
            interaction(ctx, result, json!({ "url": url }), kind).await.into()
        }
        ActionKind::Scroll => {
            let direction = match str_arg(args, "direction").map(str::parse::<ScrollDirection>) {
                None => ScrollDirection::Down,
                Some(Ok(direction)) => direction,
                Some(Err(err)) => return ActionOutcome::failed("invalid_args", err.to_string()).into(),
            };
            let result = ctx.env.scroll(direction).await;
            interaction(ctx, result, json!({ "direction": direction.as_str() }), kind)
                .await
                .into()
        }
        ActionKind::Wait => {
            let requested = args
                .get("ms")
                .and_then(Value::as_u64)
                .unwrap_or(ctx.config.default_wait_ms);
            let total = requested.min(ctx.config.max_wait_ms);
            let (waited, interrupted) =
                sleep_with_stop(total, ctx.config.wait_poll_interval_ms, ctx.stop).await;
            ActionOutcome::ok(json!({ "waitedMs": waited, "interrupted": interrupted })).into()
        }
        ActionKind::GetText => {
            let Some(element_ref) = str_arg(args, "ref") else {
                return missing_arg(kind, "ref").into();
            };
            match ctx.env.get_text(element_ref).await {
                Ok(text) => text_outcome(ctx, json!({ "ref": element_ref }), "text", text).into(),
                Err(err) => env_failure(err).into(),
            }
        }
        ActionKind::GetMarkdown => match ctx.env.get_markdown().await {
            Ok(markdown) => Dispatched {
                outcome: text_outcome(ctx, json!({}), "markdown", markdown.clone()),
                snapshot: None,
                page_text: Some(markdown),
            },
            Err(err) => env_failure(err).into(),
        },
        ActionKind::GetUrl => match ctx.env.get_url().await {
            Ok(url) => ActionOutcome::ok(json!({ "url": url })).into(),
            Err(err) => env_failure(err).into(),
        },
        ActionKind::GetTitle => match ctx.env.get_title().await {
            Ok(title) => ActionOutcome::ok(json!({ "title": title })).into(),
            Err(err) => env_failure(err).into(),
        },
        ActionKind::AskUser => {
            let Some(question) = str_arg(args, "question") else {
                return missing_arg(kind, "question").into();
            };
            match ctx.user.ask(question).await {
                Ok(answer) => {
                    ActionOutcome::ok(json!({ "question": question, "answer": answer })).into()
                }
                Err(err) => env_failure(err).into(),
            }
        }
        ActionKind::ExtractMultipleItems => extract_items(ctx, args, current_url).await.into(),
        ActionKind::GenerateDocument => generate_document(ctx, args).await.into(),
        ActionKind::Finished => ActionOutcome::ok(args.clone()).into(),
    }
}

async fn interaction(
    ctx: &DispatchContext<'_>,
    result: Result<InteractionResult, EnvironmentError>,
    data: Value,
    kind: ActionKind,
) -> ActionOutcome {
    let result = match result {
        Ok(result) => result,
        Err(err) => return env_failure(err),
    };
    if !result.success {
        let message = result
            .error
            .unwrap_or_else(|| format!("{kind} did not succeed"));
        return ActionOutcome::failed("interaction", message);
    }

    let mut outcome = ActionOutcome::ok(data);
    if result.video_opened {
        outcome = outcome.with_annotation(OutcomeAnnotation::VideoOpened);
    }
    if result.follow_clicked {
        outcome = outcome.with_annotation(OutcomeAnnotation::FollowClicked);
    }
    if let Some(url) = result.navigate {
        outcome = outcome.with_annotation(OutcomeAnnotation::Navigated { url });
        let (_, interrupted) = sleep_with_stop(
            ctx.config.navigation_settle_ms,
            ctx.config.wait_poll_interval_ms,
            ctx.stop,
        )
        .await;
        if interrupted {
            debug!(target: "agent_loop", action = kind.as_str(), "settle wait interrupted by stop");
        }
    }
    outcome
}

/// Long text is summarised in `data`; the original is kept in `full_text`.
fn text_outcome(
    ctx: &DispatchContext<'_>,
    mut data: Value,
    field: &str,
    text: String,
) -> ActionOutcome {
    let length = text.chars().count();
    if length <= ctx.config.summarize_threshold_chars {
        data[field] = Value::String(text);
        return ActionOutcome::ok(data);
    }
    let summary = ctx
        .extractor
        .summarize(&text, ctx.config.summarize_threshold_chars);
    data[field] = Value::String(summary);
    data["summarized"] = Value::Bool(true);
    data["originalLength"] = json!(length);
    ActionOutcome::ok(data).with_full_text(text)
}

async fn extract_items(
    ctx: &DispatchContext<'_>,
    args: &Value,
    current_url: Option<&str>,
) -> ActionOutcome {
    let count = args
        .get("count")
        .and_then(Value::as_u64)
        .map(|count| count.max(1) as usize)
        .unwrap_or(DEFAULT_EXTRACT_COUNT);
    let markdown = match ctx.env.get_markdown().await {
        Ok(markdown) => markdown,
        Err(err) => return env_failure(err),
    };
    let url = match current_url {
        Some(url) => Some(url.to_string()),
        None => ctx.env.get_url().await.ok(),
    };
    let pattern = ctx.extractor.identify_pattern(&markdown, url.as_deref());
    let mut content = ctx.extractor.extract(pattern, &markdown, count);
    if content.is_empty() {
        content = ctx
            .extractor
            .extract(ContentPattern::SearchResults, &markdown, count);
    }
    if content.is_empty() {
        return ActionOutcome::failed(
            "no_items",
            format!("no items recognised on a {} page", pattern.as_str()),
        );
    }
    ActionOutcome::ok(json!({
        "pattern": pattern.as_str(),
        "count": content.len(),
        "items": content,
    }))
}

async fn generate_document(ctx: &DispatchContext<'_>, args: &Value) -> ActionOutcome {
    let Some(data) = args.get("data").filter(|data| !data.is_null()) else {
        return missing_arg(ActionKind::GenerateDocument, "data");
    };
    let kind = match str_arg(args, "type").map(str::parse::<DocumentKind>) {
        None => DocumentKind::Excel,
        Some(Ok(kind)) => kind,
        Some(Err(err)) => return ActionOutcome::failed("invalid_args", err.to_string()),
    };
    let filename = str_arg(args, "filename").unwrap_or(DEFAULT_DOCUMENT_NAME);
    match ctx.env.generate_document(data, kind, filename).await {
        Ok(receipt) if receipt.success => ActionOutcome::ok(json!({
            "filename": receipt.filename,
            "type": kind.as_str(),
            "itemCount": receipt.item_count,
        })),
        Ok(receipt) => ActionOutcome::failed(
            "document",
            format!("document generation failed for {}", receipt.filename),
        ),
        Err(err) => env_failure(err),
    }
}

/// Sleep in `interval` ticks, returning early once stop is requested.
/// Returns the milliseconds waited and whether stop cut the wait short.
pub(crate) async fn sleep_with_stop(total_ms: u64, interval_ms: u64, stop: &StopHandle) -> (u64, bool) {
    let interval = interval_ms.max(1);
    let mut waited = 0;
    while waited < total_ms {
        if stop.is_stopped() {
            return (waited, true);
        }
        let tick = interval.min(total_ms - waited);
        tokio::time::sleep(Duration::from_millis(tick)).await;
        waited += tick;
    }
    (waited, false)
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

fn missing_arg(kind: ActionKind, field: &str) -> ActionOutcome {
    ActionOutcome::failed(
        "invalid_args",
        format!("{kind} requires args.{field}"),
    )
}

fn env_failure(err: EnvironmentError) -> ActionOutcome {
    ActionOutcome::failed(err.kind(), err.to_string())
}
