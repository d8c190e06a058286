//! Shared test helpers for dispatcher, engine and orchestrator tests.

use async_trait::async_trait;
use cogloop_core::error::ToolError;
use cogloop_core::state::RunState;
use cogloop_core::tool::{Tool, ToolKind, ToolOutput};
use serde_json::{Map, Value};
use std::future;
use std::sync::{Arc, Mutex};

// ── Models ───────────────────────────────────────────────────────────────

pub use cogloop_providers::test_helpers::ScriptedLoader;

// ── Tools ────────────────────────────────────────────────────────────────

/// Returns a fixed output and records the params of every call.
pub struct RecordingTool {
    kind: ToolKind,
    output: ToolOutput,
    seen: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl RecordingTool {
    pub fn replying(kind: ToolKind, text: &str) -> Self {
        Self::with_output(kind, ToolOutput::text(text))
    }

    pub fn with_output(kind: ToolKind, output: ToolOutput) -> Self {
        Self {
            kind,
            output,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<Map<String, Value>>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }
    fn description(&self) -> &str {
        "Records its calls"
    }
    async fn invoke(
        &self,
        params: &Map<String, Value>,
        _run: &RunState,
    ) -> Result<ToolOutput, ToolError> {
        self.seen.lock().unwrap().push(params.clone());
        Ok(self.output.clone())
    }
}

/// Always fails with the given reason.
pub struct FailingTool {
    kind: ToolKind,
    reason: String,
}

impl FailingTool {
    pub fn new(kind: ToolKind, reason: &str) -> Self {
        Self {
            kind,
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    async fn invoke(
        &self,
        _params: &Map<String, Value>,
        _run: &RunState,
    ) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.kind.name().into(),
            reason: self.reason.clone(),
        })
    }
}

/// Panics when called.
pub struct PanickingTool(pub ToolKind);

#[async_trait]
impl Tool for PanickingTool {
    fn kind(&self) -> ToolKind {
        self.0
    }
    fn description(&self) -> &str {
        "Panics"
    }
    async fn invoke(
        &self,
        _params: &Map<String, Value>,
        _run: &RunState,
    ) -> Result<ToolOutput, ToolError> {
        panic!("tool exploded");
    }
}

/// Never finishes.
pub struct StallingTool(pub ToolKind);

#[async_trait]
impl Tool for StallingTool {
    fn kind(&self) -> ToolKind {
        self.0
    }
    fn description(&self) -> &str {
        "Never returns"
    }
    async fn invoke(
        &self,
        _params: &Map<String, Value>,
        _run: &RunState,
    ) -> Result<ToolOutput, ToolError> {
        future::pending().await
    }
}
