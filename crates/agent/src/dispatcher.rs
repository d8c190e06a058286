//! Tool dispatch: resolve, call, time, report.

use cogloop_core::error::ToolError;
use cogloop_core::event::{EventKind, EventPipeline, Stage};
use cogloop_core::state::{PlanStep, RunState};
use cogloop_core::tool::{ToolOutcome, ToolRegistry};
use futures::FutureExt;
use serde_json::{Map, Value, json};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Calls registered tools on behalf of the executor stage.
///
/// Every call produces exactly one `tool_call` event, whatever the outcome.
/// Tool errors, unknown names and panics all become
/// [`ToolOutcome::Failure`]; nothing a tool does can abort the run.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    pipeline: Arc<EventPipeline>,
    preview_chars: usize,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, pipeline: Arc<EventPipeline>) -> Self {
        Self {
            registry,
            pipeline,
            preview_chars: 400,
        }
    }

    /// Set how much tool output goes into the event preview.
    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run the tool named by `step` against `run`.
    pub async fn dispatch(&self, step: &PlanStep, run: &mut RunState) -> ToolOutcome {
        let name = step.tool.trim();
        let start = Instant::now();

        let result = match self.registry.resolve(name) {
            Ok(tool) => {
                let call = tool.invoke(&step.params, run);
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(ToolError::Panicked(panic_message(panic.as_ref()))),
                }
            }
            Err(e) => Err(e),
        };
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut details = Map::new();
        details.insert("tool".into(), json!(name));
        details.insert(
            "input".into(),
            json!({ "action": step.action, "params": step.params }),
        );
        details.insert("duration_ms".into(), json!(duration_ms));

        match result {
            Ok(output) => {
                debug!(tool = name, duration_ms, "Tool call succeeded");
                details.insert("success".into(), json!(true));
                details.insert(
                    "output_preview".into(),
                    json!(head(&output.text, self.preview_chars)),
                );
                if let Some(extra) = &output.data {
                    details.insert("extra".into(), extra.clone());
                }
                self.pipeline
                    .append(run, Stage::Executor, EventKind::ToolCall, details);

                for doc in &output.documents {
                    let mut doc_details = Map::new();
                    doc_details.insert("path".into(), json!(doc.path));
                    doc_details.insert("chars".into(), json!(doc.chars));
                    doc_details.insert("lines".into(), json!(doc.lines));
                    self.pipeline.append(
                        run,
                        Stage::DocumentLoader,
                        EventKind::DocumentLoad,
                        doc_details,
                    );
                }
                run.loaded_documents.extend(output.documents.iter().cloned());
                ToolOutcome::Success(output)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(tool = name, error = %message, "Tool call failed");
                let visible = failure_output(name, &message);
                details.insert("success".into(), json!(false));
                details.insert("error".into(), Value::String(message.clone()));
                details.insert(
                    "output_preview".into(),
                    json!(head(&visible, self.preview_chars)),
                );
                self.pipeline
                    .append(run, Stage::Executor, EventKind::ToolCall, details);
                ToolOutcome::Failure { message }
            }
        }
    }
}

/// The text a failed step records as its output.
pub fn failure_output(tool: &str, message: &str) -> String {
    format!("Tool {tool} failed: {message}")
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

fn head(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingTool, PanickingTool, RecordingTool};
    use cogloop_core::tool::{LoadedDocument, ToolKind, ToolOutput};

    fn step(tool: &str, params: Value) -> PlanStep {
        PlanStep {
            step: 1,
            tool: tool.into(),
            action: "do it".into(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    fn dispatcher(registry: ToolRegistry) -> ToolDispatcher {
        ToolDispatcher::new(Arc::new(registry), Arc::new(EventPipeline::default()))
    }

    #[tokio::test]
    async fn success_emits_one_tool_call() {
        let mut registry = ToolRegistry::new();
        let tool = RecordingTool::replying(ToolKind::LegalRetriever, "ok");
        let seen = tool.seen();
        registry.register(tool);
        let dispatcher = dispatcher(registry);
        let mut run = RunState::new("q", vec![]);

        let outcome = dispatcher
            .dispatch(&step("legal_retriever", json!({"k": 3})), &mut run)
            .await;

        assert_eq!(outcome, ToolOutcome::Success(ToolOutput::text("ok")));
        assert_eq!(run.events.len(), 1);
        let event = &run.events[0];
        assert_eq!(event.kind, EventKind::ToolCall);
        assert_eq!(event.stage, Stage::Executor);
        assert_eq!(event.detail("success"), Some(&json!(true)));
        assert_eq!(event.detail("output_preview"), Some(&json!("ok")));
        assert_eq!(event.detail("input").unwrap()["params"]["k"], json!(3));
        // Params reach the tool with their JSON types intact.
        assert_eq!(seen.lock().unwrap()[0]["k"].as_i64(), Some(3));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure() {
        let dispatcher = dispatcher(ToolRegistry::new());
        let mut run = RunState::new("q", vec![]);

        let outcome = dispatcher.dispatch(&step("web_search", json!({})), &mut run).await;

        let ToolOutcome::Failure { message } = outcome else {
            panic!("expected failure");
        };
        assert!(message.contains("web_search"));
        assert_eq!(run.events[0].detail("success"), Some(&json!(false)));
        assert!(run.events[0].detail("error").is_some());
    }

    #[tokio::test]
    async fn tool_error_message_is_kept() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool::new(ToolKind::FinancialAnalyzer, "bad file"));
        let dispatcher = dispatcher(registry);
        let mut run = RunState::new("q", vec![]);

        let outcome = dispatcher
            .dispatch(&step("financial_analyzer", json!({})), &mut run)
            .await;

        assert_eq!(
            outcome,
            ToolOutcome::Failure {
                message: "bad file".into()
            }
        );
        assert_eq!(run.events[0].detail("error"), Some(&json!("bad file")));
        let preview = run.events[0].detail("output_preview").unwrap();
        assert!(preview.as_str().unwrap().contains("bad file"));
    }

    #[tokio::test]
    async fn panicking_tool_is_contained() {
        let mut registry = ToolRegistry::new();
        registry.register(PanickingTool(ToolKind::MarketingGenerator));
        let dispatcher = dispatcher(registry);
        let mut run = RunState::new("q", vec![]);

        let outcome = dispatcher
            .dispatch(&step("marketing_generator", json!({})), &mut run)
            .await;

        let ToolOutcome::Failure { message } = outcome else {
            panic!("expected failure");
        };
        assert!(message.contains("tool exploded"));
        assert_eq!(run.events.len(), 1);
    }

    #[tokio::test]
    async fn loaded_documents_are_announced() {
        let mut registry = ToolRegistry::new();
        registry.register(RecordingTool::with_output(
            ToolKind::DocumentLoader,
            ToolOutput {
                text: "[]".into(),
                data: None,
                documents: vec![LoadedDocument {
                    path: "a.txt".into(),
                    chars: 10,
                    lines: 2,
                }],
            },
        ));
        let dispatcher = dispatcher(registry);
        let mut run = RunState::new("q", vec![]);

        dispatcher
            .dispatch(&step("document_loader", json!({})), &mut run)
            .await;

        let kinds: Vec<_> = run.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::ToolCall, EventKind::DocumentLoad]);
        assert_eq!(run.events[1].stage, Stage::DocumentLoader);
        assert_eq!(run.events[1].detail("path"), Some(&json!("a.txt")));
        assert_eq!(run.loaded_documents.len(), 1);
        assert_eq!(run.loaded_documents[0].lines, 2);
    }

    #[test]
    fn failure_output_contains_message() {
        assert!(failure_output("financial_analyzer", "bad file").contains("bad file"));
    }
}
