//! Agent Loop Controller - orchestration of the decide/act/observe cycle.
//!
//! The model only proposes the next action. Termination, repetition
//! handling, sub-goal sequencing and budget enforcement are all decided
//! here, by local deterministic logic around it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use webpilot_core_types::RunId;

use super::config::AgentLoopConfig;
use super::dispatch::{dispatch, DispatchContext, Dispatched};
use super::observation::{build_observation, is_sub_goal_complete, repetition_warning};
use super::prompt::{build_messages, parse_response, PromptContext};
use super::state::RunState;
use super::types::{ActionKind, ActionOutcome, ActionRecord, AgentRunResult, RunStatus};
use crate::content::{ContentExtractor, ContentPattern, HeuristicContentExtractor};
use crate::environment::{BrowserEnvironment, NoUserInput, UserInput};
use crate::errors::AgentError;
use crate::events::{AgentEvent, AgentObserver, TracingObserver};
use crate::llm_provider::LlmProvider;
use crate::loop_detector::{LoopDetectionResult, LoopDetector};
use crate::optimizer::{ExecutionOptimizer, OptimizerLimits, ValidationResult};
use crate::planner::{AgentPlanner, Plan, RuleBasedPlanner};
use crate::progress::ProgressTracker;

const EXTRACTION_PREVIEW_ITEMS: usize = 5;

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop. Takes effect at the next loop check or wait tick.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Controller for agent runs.
///
/// Per-run state lives on the stack of [`AgentLoopController::run`], so one
/// controller may serve several runs; concurrent runs should use separate
/// controllers because they share the stop handle.
pub struct AgentLoopController {
    config: AgentLoopConfig,
    llm: Arc<dyn LlmProvider>,
    env: Arc<dyn BrowserEnvironment>,
    planner: Arc<dyn AgentPlanner>,
    extractor: Arc<dyn ContentExtractor>,
    user: Arc<dyn UserInput>,
    observer: Arc<dyn AgentObserver>,
    stop: StopHandle,
}

impl AgentLoopController {
    /// Create a new controller with the default planner, extractor and
    /// observer, and no operator attached.
    pub fn new(
        config: AgentLoopConfig,
        llm: Arc<dyn LlmProvider>,
        env: Arc<dyn BrowserEnvironment>,
    ) -> Self {
        Self {
            config,
            llm,
            env,
            planner: Arc::new(RuleBasedPlanner::default()),
            extractor: Arc::new(HeuristicContentExtractor::new()),
            user: Arc::new(NoUserInput),
            observer: Arc::new(TracingObserver),
            stop: StopHandle::new(),
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn AgentPlanner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_user_input(mut self, user: Arc<dyn UserInput>) -> Self {
        self.user = user;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AgentObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    /// Handle the caller keeps to cancel a run in flight.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run `task` to completion. Always returns exactly one terminal result.
    pub async fn run(&self, task: &str) -> AgentRunResult {
        self.stop.reset();
        let mut run = self.start_run(task);
        info!(
            target: "agent_loop",
            run_id = %run.run_id,
            max_steps = run.state.max_steps,
            sub_goals = run.plan.sub_goals.len(),
            "agent run started"
        );
        self.emit(AgentEvent::Start {
            run_id: run.run_id.to_string(),
            task: task.to_string(),
            max_steps: run.state.max_steps,
            sub_goals: run.plan.sub_goals.len(),
        });

        while run.state.step_count < run.state.max_steps && !self.stop.is_stopped() {
            if let Err(err) = run.state.validate(run.tracker.as_mut(), &run.detector) {
                return self.fail(run, err);
            }

            run.state.step_count += 1;
            let step = run.state.step_count;
            self.emit(AgentEvent::Step {
                step,
                max_steps: run.state.max_steps,
            });

            if run.tracker.as_ref().is_some_and(ProgressTracker::is_complete) {
                return self.complete_from_tracker(run);
            }

            let messages = {
                let ctx = PromptContext {
                    task,
                    step,
                    max_steps: run.state.max_steps,
                    tracker: run.tracker.as_ref(),
                    heuristic: run.plan.heuristic.as_ref(),
                    history: &run.state.history,
                    recent_actions_verbatim: self.config.recent_actions_verbatim,
                    snapshot: run.state.last_snapshot.as_ref().map(|s| s.tree.as_str()),
                    snapshot_chars: self.config.snapshot_prompt_chars,
                    observation: run.state.last_observation(),
                    previous_observation: run.state.previous_observation(),
                    observation_chars: self.config.observation_prompt_chars,
                };
                build_messages(&ctx)
            };

            let raw = match self.llm.complete(&messages).await {
                Ok(raw) => raw,
                Err(err) => return self.fail(run, AgentError::from(err)),
            };

            let parsed = parse_response(&raw);
            if !parsed.thought.is_empty() {
                self.emit(AgentEvent::Thought {
                    step,
                    thought: parsed.thought.clone(),
                });
            }
            run.state.history.push(ActionRecord {
                step,
                thought: parsed.thought.clone(),
                action: parsed.action.clone(),
                args: parsed.args.clone(),
            });

            let action = parsed.action.as_str();
            let args = &parsed.args;
            let kind = match action.parse::<ActionKind>() {
                Ok(kind) => Some(kind),
                Err(err) => {
                    debug!(target: "agent_loop", step, %err, "model requested an unknown action");
                    None
                }
            };
            let dispatched = match kind {
                None => Dispatched::from(ActionOutcome::failed(
                    "unknown_action",
                    format!("Unknown action: {action}"),
                )),
                Some(kind) => {
                    let verdict = self.screen_action(&run, action, args);
                    if verdict.valid {
                        if kind == ActionKind::AskUser {
                            let question = args
                                .get("question")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string();
                            self.emit(AgentEvent::AskUser { step, question });
                        }
                        let ctx = DispatchContext {
                            env: self.env.as_ref(),
                            user: self.user.as_ref(),
                            extractor: self.extractor.as_ref(),
                            config: &self.config,
                            stop: &self.stop,
                        };
                        dispatch(&ctx, kind, args, run.state.current_url.as_deref(), &run.optimizer)
                            .await
                    } else {
                        Dispatched::from(ActionOutcome::validation_failed(
                            verdict.reason.unwrap_or_default(),
                            verdict.alternative.unwrap_or_default(),
                        ))
                    }
                }
            };
            let Dispatched {
                outcome,
                snapshot,
                page_text,
            } = dispatched;

            let blocked = kind.is_none() || outcome.is_validation_failure();
            if blocked {
                run.optimizer.record_blocked(action, args);
            } else {
                run.optimizer.record_action(action, args, outcome.success);
            }
            info!(
                target: "agent_loop",
                step,
                action,
                success = outcome.success,
                blocked,
                "action executed"
            );
            self.emit(AgentEvent::Action {
                step,
                action: action.to_string(),
                args: args.clone(),
                success: outcome.success,
            });

            if kind == Some(ActionKind::Finished) {
                return self.complete_from_finished(run, outcome.data);
            }

            self.track_page(&mut run, action, &outcome, snapshot);

            let mut observation = build_observation(action, &outcome);
            if blocked && kind == Some(ActionKind::Snapshot) {
                if let Some(note) = self.reuse_cached_snapshot(&mut run) {
                    observation.push_str("\n\n");
                    observation.push_str(&note);
                }
            }
            if let Some(text) = page_text {
                if let Some(note) = self.analyse_content(&run, step, &text) {
                    observation.push_str("\n\n");
                    observation.push_str(&note);
                }
            }

            match self.advance_sub_goal(&mut run, step, action, &outcome, &mut observation) {
                SubGoalStep::AllComplete => return self.complete_from_tracker(run),
                SubGoalStep::Skipped => {
                    run.state.push_observation(observation);
                    continue;
                }
                SubGoalStep::Continue => {}
            }

            let detection = run.detector.detect_loop(action, args, &observation);
            let flagged = detection.detected;
            if flagged {
                self.escalate(&mut run, step, action, &detection, &mut observation);
            } else if detection.can_finish {
                debug!(target: "agent_loop", step, "video playing; run may finish");
            }

            if !flagged {
                if let Some(warning) =
                    repetition_warning(&run.state.history, self.config.repetition_warning_threshold)
                {
                    observation.push_str("\n\n");
                    observation.push_str(&warning);
                }
            }

            run.state.push_observation(observation);
        }

        if self.stop.is_stopped() {
            let step = run.state.step_count;
            info!(target: "agent_loop", step, "agent run stopped by caller");
            self.emit(AgentEvent::Stopped { step });
            return self.conclude(run, RunStatus::Stopped, "Stopped by user".to_string(), None);
        }

        // the last budgeted step may have resolved the final sub-goal by skipping it
        if run.tracker.as_ref().is_some_and(ProgressTracker::is_complete) {
            return self.complete_from_tracker(run);
        }

        let message = format!(
            "Incomplete: maximum steps reached ({})",
            run.state.max_steps
        );
        warn!(target: "agent_loop", steps = run.state.step_count, "step budget exhausted");
        self.emit(AgentEvent::Incomplete {
            step: run.state.step_count,
            message: message.clone(),
        });
        self.conclude(run, RunStatus::Incomplete, message, None)
    }

    fn start_run(&self, task: &str) -> RunContext {
        let plan = match self.planner.draft_plan(task) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(target: "agent_loop", %err, "planner failed; using fallback plan");
                Plan::fallback()
            }
        };

        let tracker = plan.has_sub_goals().then(|| {
            ProgressTracker::new(plan.sub_goals.clone())
                .with_stuck_threshold(self.config.stuck_threshold)
        });
        let max_steps = if tracker.is_some() {
            plan.step_budget
        } else {
            self.config.max_steps
        };

        RunContext {
            run_id: RunId::new(),
            started: Instant::now(),
            state: RunState::new(
                max_steps,
                self.config.observation_window,
                self.config.loop_skip_after,
            ),
            optimizer: ExecutionOptimizer::new(OptimizerLimits {
                max_consecutive_snapshots: self.config.max_consecutive_snapshots,
                max_get_url_per_sub_goal: self.config.max_get_url_per_subgoal,
                max_retries: self.config.max_retries,
                history_limit: self.config.optimizer_history_limit,
            }),
            detector: LoopDetector::with_windows(
                self.config.action_history_window,
                self.config.navigation_history_window,
                self.config.observation_window,
            ),
            tracker,
            plan,
        }
    }

    /// Optimizer rules first, then the retry guard.
    fn screen_action(&self, run: &RunContext, action: &str, args: &Value) -> ValidationResult {
        let current = run.tracker.as_ref().and_then(ProgressTracker::current_sub_goal);
        let verdict = run.optimizer.validate_action(action, args, current);
        if !verdict.valid || run.optimizer.can_retry(action, args) {
            return verdict;
        }
        ValidationResult::blocked(
            format!(
                "'{action}' with these arguments already failed {} times",
                run.optimizer.retry_count(action, args)
            ),
            "Use a different element, different arguments or another approach",
        )
    }

    fn track_page(
        &self,
        run: &mut RunContext,
        action: &str,
        outcome: &ActionOutcome,
        snapshot: Option<webpilot_core_types::PageSnapshot>,
    ) {
        if let Some(snapshot) = snapshot {
            let goal_id = run.sub_goal_id();
            run.optimizer.cache_snapshot(goal_id, snapshot.clone());
            run.state.last_snapshot = Some(snapshot);
        }

        if let Some(url) = outcome.navigated_to() {
            // navigate calls are logged by the detector from their args
            if action != ActionKind::Navigate.as_str() {
                run.detector.record_navigation(url);
            }
            run.state.current_url = Some(url.to_string());
            run.state.last_snapshot = None;
            run.optimizer.clear_cache();
        } else if action == ActionKind::GetUrl.as_str() && outcome.success {
            if let Some(url) = outcome.data.get("url").and_then(Value::as_str) {
                run.state.current_url = Some(url.to_string());
            }
        }
    }

    /// Put the tree cached for the current sub-goal back in front of the
    /// model after a snapshot was refused.
    fn reuse_cached_snapshot(&self, run: &mut RunContext) -> Option<String> {
        let cached = run.optimizer.cached_snapshot(run.sub_goal_id())?.clone();
        let note = format!(
            "Reusing the snapshot already taken for this page ({} elements). Act on its refs.",
            cached.element_count
        );
        debug!(target: "agent_loop", elements = cached.element_count, "serving cached snapshot");
        run.state.last_snapshot = Some(cached);
        Some(note)
    }

    /// Identify the page pattern and report it; returns a note for the
    /// observation when the pattern is recognised.
    fn analyse_content(&self, run: &RunContext, step: u32, text: &str) -> Option<String> {
        let pattern = self
            .extractor
            .identify_pattern(text, run.state.current_url.as_deref());
        let content = self.extractor.extract(pattern, text, EXTRACTION_PREVIEW_ITEMS);
        let current = run.tracker.as_ref().and_then(ProgressTracker::current_sub_goal);
        let recommendation = self.extractor.recommend_action(pattern, current);

        self.emit(AgentEvent::ContentExtracted {
            step,
            pattern,
            item_count: content.len(),
            recommendation: Some(recommendation.clone()),
        });

        if pattern == ContentPattern::Generic {
            return None;
        }
        Some(format!(
            "Page type: {}. Suggested next action: {} ({})",
            pattern.as_str(),
            recommendation.action,
            recommendation.reasoning
        ))
    }

    fn advance_sub_goal(
        &self,
        run: &mut RunContext,
        step: u32,
        action: &str,
        outcome: &ActionOutcome,
        observation: &mut String,
    ) -> SubGoalStep {
        let Some(tracker) = run.tracker.as_mut() else {
            return SubGoalStep::Continue;
        };
        let Some(goal) = tracker.current_sub_goal().cloned() else {
            return SubGoalStep::Continue;
        };

        tracker.record_step();

        if is_sub_goal_complete(&goal, action, outcome, observation) {
            let result = outcome
                .full_text
                .clone()
                .map(Value::String)
                .unwrap_or_else(|| outcome.data.clone());
            tracker.complete_current_sub_goal(Some(result));
            let progress = tracker.progress();
            let next = tracker.current_sub_goal().cloned();
            let all_done = tracker.is_complete();

            run.optimizer.reset_for_sub_goal(next.as_ref().map(|g| g.id));
            run.detector.note_sub_goal_completed();
            run.state.clear_escalations();

            info!(target: "agent_loop", step, sub_goal = goal.id, progress, "sub-goal completed");
            self.emit(AgentEvent::SubGoalComplete {
                step,
                sub_goal_id: goal.id,
                description: goal.description.clone(),
                progress,
            });

            if all_done {
                return SubGoalStep::AllComplete;
            }
            if let Some(next) = next {
                observation.push_str(&format!(
                    "\n\nSub-goal {} done: {}. Next sub-goal: {}",
                    goal.id, goal.description, next.description
                ));
            }
            return SubGoalStep::Continue;
        }

        if tracker.is_stuck() {
            let steps = tracker.current_step_count();
            tracker.skip_current_sub_goal(format!("stuck after {steps} steps"));
            let next = tracker.current_sub_goal().cloned();
            run.optimizer.reset_for_sub_goal(next.as_ref().map(|g| g.id));
            run.state.clear_escalations();

            let message = format!(
                "WARNING: sub-goal '{}' took {steps} steps without completing and was skipped. {}",
                goal.description,
                next_sub_goal_hint(next.as_ref().map(|g| g.description.as_str()))
            );
            warn!(target: "agent_loop", step, sub_goal = goal.id, steps, "sub-goal stuck; skipped");
            self.emit(AgentEvent::Warning {
                step,
                message: message.clone(),
            });
            observation.push_str("\n\n");
            observation.push_str(&message);
            return SubGoalStep::Skipped;
        }

        SubGoalStep::Continue
    }

    /// Three-tier escalation per loop-pattern key: advise, insist, skip.
    fn escalate(
        &self,
        run: &mut RunContext,
        step: u32,
        action: &str,
        detection: &LoopDetectionResult,
        observation: &mut String,
    ) {
        let pattern = detection.pattern.map(|p| p.as_str()).unwrap_or("unknown");
        let key = detection
            .pattern_key
            .clone()
            .unwrap_or_else(|| pattern.to_string());
        let reason = detection.reason.as_deref().unwrap_or("repeated actions");
        let tier = run.state.escalate(&key);
        let current = run
            .tracker
            .as_ref()
            .and_then(ProgressTracker::current_sub_goal)
            .cloned();
        let alternatives = run.detector.get_alternatives(detection, current.as_ref());

        warn!(
            target: "agent_loop",
            step,
            pattern,
            confidence = detection.confidence,
            productive = detection.productive,
            tier,
            "loop detected"
        );

        if tier >= self.config.loop_skip_after {
            run.state.reset_escalation(&key);
            let message = match (run.tracker.as_mut(), current) {
                (Some(tracker), Some(goal)) => {
                    tracker.skip_current_sub_goal(format!("loop detected: {pattern}"));
                    let next = tracker.current_sub_goal().cloned();
                    run.optimizer.reset_for_sub_goal(next.as_ref().map(|g| g.id));
                    run.state.clear_escalations();
                    format!(
                        "LOOP DETECTED {tier} times ({pattern}). Sub-goal '{}' was skipped automatically. {}",
                        goal.description,
                        next_sub_goal_hint(next.as_ref().map(|g| g.description.as_str()))
                    )
                }
                _ => format!(
                    "LOOP DETECTED {tier} times ({pattern}): {reason}. STOP repeating '{action}'. Call finished() with what you have or take a completely different approach."
                ),
            };
            self.emit(AgentEvent::Warning {
                step,
                message: message.clone(),
            });
            observation.push_str("\n\n");
            observation.push_str(&message);
            return;
        }

        let text = if tier >= 2 {
            let first = alternatives
                .first()
                .map(String::as_str)
                .unwrap_or("Call finished() if the task is already done");
            format!(
                "LOOP DETECTED AGAIN ({pattern}): {reason}. You MUST act now: {first}. Do not call '{action}' again."
            )
        } else {
            let list: Vec<String> = alternatives.iter().map(|alt| format!("- {alt}")).collect();
            format!(
                "LOOP DETECTED ({pattern}, confidence {:.2}): {reason}\nAlternatives:\n{}",
                detection.confidence,
                list.join("\n")
            )
        };
        observation.push_str("\n\n");
        observation.push_str(&text);
    }

    fn complete_from_finished(&self, run: RunContext, payload: Value) -> AgentRunResult {
        let message = ["summary", "result", "message"]
            .iter()
            .find_map(|field| payload.get(*field).and_then(Value::as_str))
            .unwrap_or("Task completed")
            .to_string();
        info!(target: "agent_loop", step = run.state.step_count, "model reported task finished");
        self.emit(AgentEvent::Complete {
            step: run.state.step_count,
            message: message.clone(),
            output: payload.clone(),
        });
        self.conclude(run, RunStatus::Completed, message, Some(payload))
    }

    fn complete_from_tracker(&self, run: RunContext) -> AgentRunResult {
        let summary = run.tracker.as_ref().map(ProgressTracker::summary);
        let (completed, skipped) = summary
            .as_ref()
            .map(|s| (s.completed, s.skipped))
            .unwrap_or((0, 0));
        let message = format!(
            "All sub-goals resolved ({completed} completed, {skipped} skipped)"
        );
        let output = summary
            .as_ref()
            .and_then(|s| serde_json::to_value(&s.completed_goals).ok())
            .map(|goals| json!({ "subGoals": goals }));
        info!(target: "agent_loop", step = run.state.step_count, completed, skipped, "all sub-goals resolved");
        self.emit(AgentEvent::Complete {
            step: run.state.step_count,
            message: message.clone(),
            output: output.clone().unwrap_or(Value::Null),
        });
        self.conclude(run, RunStatus::Completed, message, output)
    }

    fn fail(&self, run: RunContext, err: AgentError) -> AgentRunResult {
        error!(target: "agent_loop", step = run.state.step_count, %err, "agent run aborted");
        self.emit(AgentEvent::Error {
            step: run.state.step_count,
            message: err.to_string(),
        });
        self.conclude(run, RunStatus::Error, err.to_string(), None)
    }

    fn conclude(
        &self,
        run: RunContext,
        status: RunStatus,
        message: String,
        final_output: Option<Value>,
    ) -> AgentRunResult {
        AgentRunResult {
            run_id: run.run_id.to_string(),
            status,
            message,
            final_output,
            steps_taken: run.state.step_count,
            max_steps: run.state.max_steps,
            sub_goals: run.tracker.as_ref().map(ProgressTracker::summary),
            history: run.state.history,
            plan: run.plan,
            total_time_ms: run.started.elapsed().as_millis() as u64,
        }
    }

    fn emit(&self, event: AgentEvent) {
        self.observer.on_event(&event);
    }
}

/// Per-run collaborators and state, dropped when the run ends.
struct RunContext {
    run_id: RunId,
    started: Instant,
    plan: Plan,
    state: RunState,
    tracker: Option<ProgressTracker>,
    optimizer: ExecutionOptimizer,
    detector: LoopDetector,
}

impl RunContext {
    /// Id of the sub-goal in progress; `0` for runs without a plan.
    fn sub_goal_id(&self) -> u32 {
        self.tracker
            .as_ref()
            .and_then(ProgressTracker::current_sub_goal)
            .map(|goal| goal.id)
            .unwrap_or(0)
    }
}

enum SubGoalStep {
    Continue,
    Skipped,
    AllComplete,
}

fn next_sub_goal_hint(next: Option<&str>) -> String {
    match next {
        Some(description) => format!("Move on to: {description}"),
        None => "All sub-goals are resolved; call finished() with the results.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_handle_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
        handle.reset();
        assert!(!clone.is_stopped());
    }

    #[test]
    fn next_sub_goal_hints() {
        assert_eq!(next_sub_goal_hint(Some("Extract posts")), "Move on to: Extract posts");
        assert!(next_sub_goal_hint(None).contains("finished()"));
    }
}
