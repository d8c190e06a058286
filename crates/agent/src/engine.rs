//! The step engine: plan → (execute → reflect)* → synthesize.
//!
//! Each stage is bracketed by `node_enter`/`node_exit` events. Malformed
//! model output never fails a stage: the planner retries and then settles
//! for an empty plan, the reflector stops the loop. Only model load
//! failures and plan steps without a tool are fatal.

use crate::dispatcher::{ToolDispatcher, failure_output};
use crate::parse::{self, Verdict};
use crate::prompts;
use cogloop_core::error::{Error, Result};
use cogloop_core::event::{EventPipeline, Stage};
use cogloop_core::state::{RunState, ToolExecution};
use cogloop_core::tool::ToolOutcome;
use cogloop_providers::Invoker;
use serde_json::{Map, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A state of the reasoning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Plan,
    Execute,
    Reflect,
    Synthesize,
    Done,
}

/// Drives one run through the reasoning loop.
pub struct StepEngine {
    invoker: Arc<Invoker>,
    dispatcher: ToolDispatcher,
    pipeline: Arc<EventPipeline>,
    /// Reflect stages after which the loop always synthesizes
    max_iterations: u32,
    /// Planner calls before settling for an empty plan
    planner_attempts: u32,
}

impl StepEngine {
    pub fn new(invoker: Arc<Invoker>, dispatcher: ToolDispatcher) -> Self {
        let pipeline = invoker.pipeline().clone();
        Self {
            invoker,
            dispatcher,
            pipeline,
            max_iterations: 10,
            planner_attempts: 2,
        }
    }

    /// Set the iteration ceiling.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Set how many times the planner is asked before giving up.
    pub fn with_planner_attempts(mut self, attempts: u32) -> Self {
        self.planner_attempts = attempts.max(1);
        self
    }

    pub fn invoker(&self) -> &Arc<Invoker> {
        &self.invoker
    }

    /// Run from `plan` to `done`.
    ///
    /// On error the state keeps everything recorded up to the failing stage.
    pub async fn run(&self, state: &mut RunState) -> Result<()> {
        let mut node = Node::Plan;
        while node != Node::Done {
            node = self.step(node, state).await?;
        }
        info!(
            run_id = %state.id,
            iterations = state.iteration,
            tool_calls = state.tool_results.len(),
            "Run complete"
        );
        Ok(())
    }

    /// Run one stage and return the next.
    pub async fn step(&self, node: Node, state: &mut RunState) -> Result<Node> {
        match node {
            Node::Plan => {
                self.plan(state).await?;
                Ok(Node::Execute)
            }
            Node::Execute => {
                self.execute(state).await?;
                Ok(Node::Reflect)
            }
            Node::Reflect => {
                self.reflect(state).await?;
                Ok(if self.should_continue(state) {
                    Node::Execute
                } else {
                    Node::Synthesize
                })
            }
            Node::Synthesize => {
                self.synthesize(state).await?;
                Ok(Node::Done)
            }
            Node::Done => Ok(Node::Done),
        }
    }

    /// Continue iff the reflector asked to, the ceiling is not reached and
    /// plan steps remain.
    pub fn should_continue(&self, state: &RunState) -> bool {
        state.decision == Some(true)
            && state.iteration < self.max_iterations
            && state.has_pending_steps()
    }

    /// Ask for a plan, retrying on unusable output.
    pub async fn plan(&self, state: &mut RunState) -> Result<()> {
        let start = Instant::now();
        self.pipeline.node_enter(state, Stage::Planner);

        let catalog = self.dispatcher.registry().catalog();
        let base = prompts::planner_messages(state, &catalog);
        let mut messages = base.clone();
        let mut plan = Vec::new();
        let mut attempts = 0;

        for attempt in 1..=self.planner_attempts {
            attempts = attempt;
            let response = self
                .invoker
                .invoke_primary(&messages, Some((&mut *state, Stage::Planner)))
                .await?;
            plan = parse::parse_plan(&response.text);
            if !plan.is_empty() {
                break;
            }
            warn!(attempt, "Planner output was not a usable plan");
            messages = prompts::planner_retry_messages(&base, attempt, &response.text);
        }

        debug!(steps = plan.len(), attempts, "Plan ready");
        let steps = plan.len();
        state.plan = plan;
        state.current_step = 0;

        let mut details = Map::new();
        details.insert("steps".into(), json!(steps));
        details.insert("attempts".into(), json!(attempts));
        self.pipeline
            .node_exit(state, Stage::Planner, elapsed_ms(start), details);
        Ok(())
    }

    /// Run the current plan step, if any, and advance past it.
    pub async fn execute(&self, state: &mut RunState) -> Result<()> {
        let start = Instant::now();
        self.pipeline.node_enter(state, Stage::Executor);

        let Some(step) = state.pending_step().cloned() else {
            let mut details = Map::new();
            details.insert("skipped".into(), json!(true));
            self.pipeline
                .node_exit(state, Stage::Executor, elapsed_ms(start), details);
            return Ok(());
        };

        if step.tool.trim().is_empty() {
            return Err(Error::InvalidStep {
                step: step.step,
                reason: "no tool named for this step".into(),
            });
        }

        let outcome = self.dispatcher.dispatch(&step, state).await;
        let success = outcome.is_success();
        let execution = match outcome {
            ToolOutcome::Success(output) => ToolExecution {
                step: step.step,
                tool: step.tool.clone(),
                input: step.action.clone(),
                output: output.text,
                success: true,
                error: None,
            },
            ToolOutcome::Failure { message } => ToolExecution {
                step: step.step,
                tool: step.tool.clone(),
                input: step.action.clone(),
                output: failure_output(&step.tool, &message),
                success: false,
                error: Some(message),
            },
        };
        state.tool_results.push(execution);
        state.advance_step();

        let mut details = Map::new();
        details.insert("step".into(), json!(step.step));
        details.insert("tool".into(), json!(step.tool));
        details.insert("success".into(), json!(success));
        self.pipeline
            .node_exit(state, Stage::Executor, elapsed_ms(start), details);
        Ok(())
    }

    /// Ask whether to keep executing.
    pub async fn reflect(&self, state: &mut RunState) -> Result<()> {
        let start = Instant::now();
        self.pipeline.node_enter(state, Stage::Reflector);

        let messages = prompts::reflector_messages(state);
        let response = self
            .invoker
            .invoke_primary(&messages, Some((&mut *state, Stage::Reflector)))
            .await?;
        let reflection = parse::parse_reflection(&response.text);
        if reflection.verdict == Verdict::ParseFailure {
            warn!("Reflector output was not valid JSON, stopping");
        }

        state.reflection = Some(reflection.reason);
        state.decision = Some(reflection.continue_);
        state.iteration += 1;

        let mut details = Map::new();
        details.insert("verdict".into(), json!(reflection.verdict.as_str()));
        details.insert("continue".into(), json!(reflection.continue_));
        details.insert("iteration".into(), json!(state.iteration));
        self.pipeline
            .node_exit(state, Stage::Reflector, elapsed_ms(start), details);
        Ok(())
    }

    /// Produce the final answer from everything gathered.
    pub async fn synthesize(&self, state: &mut RunState) -> Result<()> {
        let start = Instant::now();
        self.pipeline.node_enter(state, Stage::Synthesizer);

        let messages = prompts::synthesizer_messages(state);
        let response = self
            .invoker
            .invoke_primary(&messages, Some((&mut *state, Stage::Synthesizer)))
            .await?;
        state.final_answer = Some(response.text);

        self.pipeline
            .node_exit(state, Stage::Synthesizer, elapsed_ms(start), Map::new());
        Ok(())
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
