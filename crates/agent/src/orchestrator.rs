//! One object owning everything a run needs.
//!
//! The orchestrator holds the slot manager, the stats, the event pipeline
//! and the engine. Each `run` resets the stats, pairs the caller's
//! observers with the run, and hands back either a [`RunReport`] or a
//! [`RunFailure`] that still carries the partial state.

use crate::dispatcher::ToolDispatcher;
use crate::engine::StepEngine;
use cogloop_config::AppConfig;
use cogloop_core::error::Error;
use cogloop_core::event::{EventKind, EventObserver, EventPipeline, Stage, SubscriptionId};
use cogloop_core::provider::{Acceleration, ModelLoader, ModelRole};
use cogloop_core::state::RunState;
use cogloop_core::tool::{LoadedDocument, ToolRegistry};
use cogloop_providers::{Invoker, ModelSlotManager};
use cogloop_telemetry::{LlmStats, StatsSnapshot};
use serde::Serialize;
use serde_json::{Map, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub stats: StatsSnapshot,
    /// Acceleration level each role last ran at
    pub backend: BTreeMap<ModelRole, Acceleration>,
}

impl RunReport {
    /// Documents the tools read, in load order.
    pub fn documents(&self) -> &[LoadedDocument] {
        &self.state.loaded_documents
    }
}

/// Run-scoped subscriptions, removed when dropped.
///
/// Also covers a run future dropped mid-flight, e.g. by a timeout.
struct ScopedSubscriptions<'a> {
    pipeline: &'a EventPipeline,
    ids: Vec<SubscriptionId>,
}

impl Drop for ScopedSubscriptions<'_> {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.pipeline.unsubscribe(id);
        }
    }
}

/// A run that aborted, with whatever it recorded before the error.
#[derive(Debug)]
pub struct RunFailure {
    pub error: Error,
    pub state: RunState,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {} failed: {}", self.state.id, self.error)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub struct Orchestrator {
    slots: Arc<ModelSlotManager>,
    stats: Arc<LlmStats>,
    pipeline: Arc<EventPipeline>,
    engine: StepEngine,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, loader: Arc<dyn ModelLoader>, tools: ToolRegistry) -> Self {
        let slots = Arc::new(ModelSlotManager::new(
            loader,
            config.models.acceleration_level,
        ));
        let stats = Arc::new(LlmStats::new());
        let pipeline = Arc::new(EventPipeline::new(config.events.channel_capacity));
        let invoker = Arc::new(Invoker::new(
            slots.clone(),
            stats.clone(),
            pipeline.clone(),
            config.decoding.clone(),
            config.engine.preview_chars,
        ));
        let dispatcher = ToolDispatcher::new(Arc::new(tools), pipeline.clone())
            .with_preview_chars(config.engine.preview_chars);
        let engine = StepEngine::new(invoker, dispatcher)
            .with_max_iterations(config.engine.max_iterations)
            .with_planner_attempts(config.engine.planner_attempts);

        Self {
            slots,
            stats,
            pipeline,
            engine,
        }
    }

    pub fn slots(&self) -> &Arc<ModelSlotManager> {
        &self.slots
    }

    pub fn stats(&self) -> &Arc<LlmStats> {
        &self.stats
    }

    /// The pipeline runs publish to. Long-lived subscribers go here.
    pub fn pipeline(&self) -> &Arc<EventPipeline> {
        &self.pipeline
    }

    pub fn engine(&self) -> &StepEngine {
        &self.engine
    }

    pub async fn run(&self, query: &str, files: Vec<String>) -> Result<RunReport, RunFailure> {
        self.run_observed(query, files, &[]).await
    }

    /// Run with `observers` subscribed for the duration of this run only.
    pub async fn run_observed(
        &self,
        query: &str,
        files: Vec<String>,
        observers: &[Arc<dyn EventObserver>],
    ) -> Result<RunReport, RunFailure> {
        self.stats.reset();
        let subscriptions = ScopedSubscriptions {
            pipeline: &self.pipeline,
            ids: observers
                .iter()
                .map(|o| self.pipeline.subscribe_shared(o.clone()))
                .collect(),
        };

        let mut state = RunState::new(query, files);
        info!(run_id = %state.id, files = state.files.len(), "Starting run");

        self.announce_inputs(&mut state).await;
        let outcome = self.engine.run(&mut state).await;

        drop(subscriptions);

        match outcome {
            Ok(()) => Ok(RunReport {
                state,
                stats: self.stats.snapshot(),
                backend: self.slots.report().await,
            }),
            Err(error) => {
                warn!(run_id = %state.id, error = %error, "Run aborted");
                Err(RunFailure { error, state })
            }
        }
    }

    /// Emit a `document_load` event for every input file.
    async fn announce_inputs(&self, state: &mut RunState) {
        let files = state.files.clone();
        for path in files {
            let mut details = Map::new();
            details.insert("path".into(), json!(path));
            match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    details.insert("bytes".into(), json!(meta.len()));
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Input file is not readable");
                    details.insert("error".into(), json!(e.to_string()));
                }
            }
            self.pipeline
                .append(state, Stage::DocumentLoader, EventKind::DocumentLoad, details);
        }
    }

    /// Release the resident model.
    pub async fn shutdown(&self) {
        self.slots.unload().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingTool, ScriptedLoader, StallingTool};
    use cogloop_core::event::AgentEvent;
    use cogloop_core::tool::ToolKind;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.models.acceleration_level = 0;
        config
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(RecordingTool::replying(ToolKind::LegalRetriever, "ok"));
        registry
    }

    const ONE_STEP: [&str; 3] = [
        r#"[{"step": 1, "tool": "legal_retriever", "action": "search"}]"#,
        r#"{"continue": false, "reason": "enough"}"#,
        "The answer",
    ];

    #[tokio::test]
    async fn run_returns_report() {
        let orchestrator = Orchestrator::new(
            &config(),
            Arc::new(ScriptedLoader::new(ONE_STEP.to_vec())),
            registry(),
        );

        let report = orchestrator.run("q", vec![]).await.unwrap();

        assert_eq!(report.state.final_answer.as_deref(), Some("The answer"));
        assert_eq!(report.stats.calls, 3);
        assert!(report.stats.total_tokens > 0);
        assert_eq!(
            report.stats.total_tokens,
            report.stats.prompt_tokens + report.stats.completion_tokens
        );
        assert_eq!(report.backend[&ModelRole::Primary], Acceleration::Level(0));
        assert_eq!(report.backend[&ModelRole::Secondary], Acceleration::Unloaded);
    }

    #[tokio::test]
    async fn stats_reset_between_runs() {
        let replies: Vec<&str> = ONE_STEP.iter().chain(ONE_STEP.iter()).copied().collect();
        let orchestrator = Orchestrator::new(
            &config(),
            Arc::new(ScriptedLoader::new(replies)),
            registry(),
        );

        orchestrator.run("first", vec![]).await.unwrap();
        let second = orchestrator.run("second", vec![]).await.unwrap();

        assert_eq!(second.stats.calls, 3);
    }

    #[tokio::test]
    async fn observers_are_scoped_to_the_run() {
        let orchestrator = Orchestrator::new(
            &config(),
            Arc::new(ScriptedLoader::new(ONE_STEP.to_vec())),
            registry(),
        );
        let seen: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn EventObserver> =
            Arc::new(move |_: &RunState, e: &AgentEvent| sink.lock().unwrap().push(e.kind));

        let report = orchestrator
            .run_observed("q", vec![], &[observer])
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().len(), report.state.events.len());
        assert_eq!(orchestrator.pipeline().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn observers_are_removed_when_the_run_is_cancelled() {
        let mut tools = ToolRegistry::new();
        tools.register(StallingTool(ToolKind::LegalRetriever));
        let orchestrator = Orchestrator::new(
            &config(),
            Arc::new(ScriptedLoader::new(ONE_STEP.to_vec())),
            tools,
        );
        let observer: Arc<dyn EventObserver> = Arc::new(|_: &RunState, _: &AgentEvent| {});

        let outcome = tokio::time::timeout(
            Duration::from_millis(200),
            orchestrator.run_observed("q", vec![], &[observer]),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(orchestrator.pipeline().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn input_files_are_announced() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hello").unwrap();
        let path = file.path().to_string_lossy().to_string();
        let orchestrator = Orchestrator::new(
            &config(),
            Arc::new(ScriptedLoader::new(ONE_STEP.to_vec())),
            registry(),
        );

        let report = orchestrator
            .run("q", vec![path.clone(), "/no/such/file.txt".into()])
            .await
            .unwrap();

        let loads: Vec<_> = report
            .state
            .events
            .iter()
            .filter(|e| e.kind == EventKind::DocumentLoad)
            .collect();
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0].detail("path"), Some(&json!(path)));
        assert_eq!(loads[0].detail("bytes"), Some(&json!(5)));
        assert!(loads[1].detail("error").is_some());
        // Announced before the planner starts.
        assert_eq!(report.state.events[0].kind, EventKind::DocumentLoad);
    }

    #[tokio::test]
    async fn failure_keeps_partial_state() {
        let loader = ScriptedLoader::new(ONE_STEP.to_vec()).failing_at(ModelRole::Primary, 0);
        let orchestrator = Orchestrator::new(&config(), Arc::new(loader), registry());
        let observer: Arc<dyn EventObserver> = Arc::new(|_: &RunState, _: &AgentEvent| {});

        let failure = orchestrator
            .run_observed("q", vec![], &[observer])
            .await
            .unwrap_err();

        assert!(matches!(failure.error, Error::Provider(_)));
        assert!(!failure.state.events.is_empty());
        assert!(failure.to_string().contains(&failure.state.id));
        assert_eq!(orchestrator.pipeline().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_unloads() {
        let orchestrator = Orchestrator::new(
            &config(),
            Arc::new(ScriptedLoader::new(ONE_STEP.to_vec())),
            registry(),
        );
        orchestrator.run("q", vec![]).await.unwrap();
        assert_eq!(orchestrator.slots().resident().await, Some(ModelRole::Primary));

        orchestrator.shutdown().await;

        assert_eq!(orchestrator.slots().resident().await, None);
    }
}
