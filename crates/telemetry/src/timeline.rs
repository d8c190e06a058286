//! Post-run timeline built from the event stream.

use cogloop_core::event::{AgentEvent, EventKind, EventObserver, Stage};
use cogloop_core::state::RunState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Time spent in one stage across a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StageTally {
    pub stage: Stage,
    pub visits: u32,
    pub total_ms: f64,
}

/// Calls made to one tool across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ToolTally {
    pub calls: u32,
    pub failures: u32,
    pub total_ms: f64,
}

/// What a [`RunTimeline`] has seen so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimelineSummary {
    /// Stages in order of first exit
    pub stages: Vec<StageTally>,
    pub tools: BTreeMap<String, ToolTally>,
    pub llm_calls: u32,
    pub llm_ms: f64,
    pub documents_loaded: u32,
    pub events: u32,
}

impl TimelineSummary {
    fn fold(&mut self, event: &AgentEvent) {
        self.events += 1;
        let duration = event
            .detail("duration_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        match event.kind {
            EventKind::NodeExit => {
                match self.stages.iter_mut().find(|t| t.stage == event.stage) {
                    Some(tally) => {
                        tally.visits += 1;
                        tally.total_ms += duration;
                    }
                    None => self.stages.push(StageTally {
                        stage: event.stage,
                        visits: 1,
                        total_ms: duration,
                    }),
                }
            }
            EventKind::ToolCall => {
                let name = event
                    .detail("tool")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let tally = self.tools.entry(name).or_default();
                tally.calls += 1;
                tally.total_ms += duration;
                if event.detail("success").and_then(|v| v.as_bool()) != Some(true) {
                    tally.failures += 1;
                }
            }
            EventKind::LlmCall => {
                self.llm_calls += 1;
                self.llm_ms += duration;
            }
            EventKind::DocumentLoad => self.documents_loaded += 1,
            EventKind::NodeEnter | EventKind::LlmCallPending => {}
        }
    }
}

impl std::fmt::Display for TimelineSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for tally in &self.stages {
            writeln!(
                f,
                "  {:<16} {:>3}x {:>10.1} ms",
                tally.stage.as_str(),
                tally.visits,
                tally.total_ms
            )?;
        }
        for (name, tally) in &self.tools {
            writeln!(
                f,
                "  tool {:<11} {:>3}x {:>10.1} ms  ({} failed)",
                name, tally.calls, tally.total_ms, tally.failures
            )?;
        }
        write!(
            f,
            "  {} LLM calls ({:.1} ms), {} documents, {} events",
            self.llm_calls, self.llm_ms, self.documents_loaded, self.events
        )
    }
}

/// Event observer that keeps a [`TimelineSummary`].
///
/// Clones share the same summary, so one clone can be subscribed to a
/// pipeline while another is kept for reading.
#[derive(Debug, Clone, Default)]
pub struct RunTimeline {
    summary: Arc<Mutex<TimelineSummary>>,
}

impl RunTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> TimelineSummary {
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventObserver for RunTimeline {
    fn on_event(&self, _run: &RunState, event: &AgentEvent) {
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fold(event);
    }
}
