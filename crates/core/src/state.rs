//! The mutable aggregate for one run of the reasoning loop.

use crate::event::{AgentEvent, Stage};
use crate::provider::ModelRole;
use crate::tool::LoadedDocument;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of work the planner assigns to a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 1-based step number
    pub step: u32,

    /// Name of the tool to run
    pub tool: String,

    /// Short natural-language description of the action
    #[serde(default)]
    pub action: String,

    /// Tool parameters, passed through untouched
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// The record of one executed plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub step: u32,
    pub tool: String,
    /// Input summary (the step's action text)
    pub input: String,
    /// Tool output, or the failure message
    pub output: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One model call made on behalf of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub stage: Stage,
    pub role: ModelRole,
    pub prompt_preview: String,
    pub response_preview: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub duration_ms: f64,
}

/// Everything one run knows about itself.
///
/// Owned by the step engine for the duration of a run and lent to tools,
/// observers and the invocation layer one stage call at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run id
    pub id: String,
    pub query: String,
    pub files: Vec<String>,
    pub plan: Vec<PlanStep>,
    /// Index into `plan` of the next step to execute
    pub current_step: usize,
    pub tool_results: Vec<ToolExecution>,
    /// Latest reflection reason
    pub reflection: Option<String>,
    /// Latest continuation decision
    pub decision: Option<bool>,
    /// Number of completed reflect stages
    pub iteration: u32,
    pub final_answer: Option<String>,
    pub events: Vec<AgentEvent>,
    pub llm_calls: Vec<LlmCallRecord>,
    /// Documents tools read during the run, in load order
    #[serde(default)]
    pub loaded_documents: Vec<LoadedDocument>,
}

impl RunState {
    /// Fresh state for a query and its input files.
    pub fn new(query: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            files,
            plan: Vec::new(),
            current_step: 0,
            tool_results: Vec::new(),
            reflection: None,
            decision: None,
            iteration: 0,
            final_answer: None,
            events: Vec::new(),
            llm_calls: Vec::new(),
            loaded_documents: Vec::new(),
        }
    }

    /// The step `execute` would run next, if any.
    pub fn pending_step(&self) -> Option<&PlanStep> {
        self.plan.get(self.current_step)
    }

    /// Whether unexecuted plan steps remain.
    pub fn has_pending_steps(&self) -> bool {
        self.current_step < self.plan.len()
    }

    /// Move past the current step. Never moves beyond the end of the plan.
    pub fn advance_step(&mut self) {
        if self.current_step < self.plan.len() {
            self.current_step += 1;
        }
    }
}
