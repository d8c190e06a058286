//! The invocation layer: one role, one set of messages, one completion.

use crate::slots::ModelSlotManager;
use cogloop_config::DecodingConfig;
use cogloop_core::error::ProviderError;
use cogloop_core::event::{EventKind, EventPipeline, Stage};
use cogloop_core::message::Message;
use cogloop_core::provider::{CompletionRequest, DecodingParams, ModelRole, Timings, Usage};
use cogloop_core::state::{LlmCallRecord, RunState};
use cogloop_telemetry::LlmStats;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Text plus accounting for one completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Usage,
    pub timings: Timings,
    /// Wall-clock time including any model swap
    pub duration_ms: f64,
}

/// Performs model calls through the slot manager.
///
/// Every completion is folded into the shared [`LlmStats`]. When a run is
/// supplied, an `llm_call_pending` event precedes the call and an
/// `llm_call` event plus an [`LlmCallRecord`] follow it.
pub struct Invoker {
    slots: Arc<ModelSlotManager>,
    stats: Arc<LlmStats>,
    pipeline: Arc<EventPipeline>,
    decoding: DecodingConfig,
    preview_chars: usize,
}

impl Invoker {
    pub fn new(
        slots: Arc<ModelSlotManager>,
        stats: Arc<LlmStats>,
        pipeline: Arc<EventPipeline>,
        decoding: DecodingConfig,
        preview_chars: usize,
    ) -> Self {
        Self {
            slots,
            stats,
            pipeline,
            decoding,
            preview_chars,
        }
    }

    pub fn slots(&self) -> &Arc<ModelSlotManager> {
        &self.slots
    }

    pub fn stats(&self) -> &Arc<LlmStats> {
        &self.stats
    }

    pub fn pipeline(&self) -> &Arc<EventPipeline> {
        &self.pipeline
    }

    /// Configured decoding defaults for a role. Override fields with struct
    /// update syntax and pass the result to [`Invoker::invoke`].
    pub fn defaults(&self, role: ModelRole) -> DecodingParams {
        self.decoding.for_role(role)
    }

    /// Call the primary model with its default decoding parameters.
    pub async fn invoke_primary(
        &self,
        messages: &[Message],
        run: Option<(&mut RunState, Stage)>,
    ) -> Result<LlmResponse, ProviderError> {
        let params = self.defaults(ModelRole::Primary);
        self.invoke(ModelRole::Primary, messages, params, run).await
    }

    /// Call the secondary model with its default decoding parameters.
    pub async fn invoke_secondary(
        &self,
        messages: &[Message],
        run: Option<(&mut RunState, Stage)>,
    ) -> Result<LlmResponse, ProviderError> {
        let params = self.defaults(ModelRole::Secondary);
        self.invoke(ModelRole::Secondary, messages, params, run).await
    }

    /// Lease `role`, run one completion and account for it.
    ///
    /// Load failures (after the CPU fallback) and inference errors are
    /// returned as-is; no `llm_call` event is emitted for a failed call.
    pub async fn invoke(
        &self,
        role: ModelRole,
        messages: &[Message],
        params: DecodingParams,
        mut run: Option<(&mut RunState, Stage)>,
    ) -> Result<LlmResponse, ProviderError> {
        let prompt_preview = preview_messages(messages, self.preview_chars);

        if let Some((run, stage)) = run.as_mut() {
            let mut details = serde_json::Map::new();
            details.insert("role".into(), json!(role));
            details.insert("prompt_preview".into(), json!(prompt_preview));
            self.pipeline
                .append(run, *stage, EventKind::LlmCallPending, details);
        }

        let start = Instant::now();
        let mut lease = self.slots.acquire(role).await?;
        let request = CompletionRequest {
            messages: messages.to_vec(),
            params,
        };
        let completion = tokio::task::spawn_blocking(move || lease.complete(&request))
            .await
            .map_err(|e| ProviderError::Worker(format!("inference task failed: {e}")))?
            .inspect_err(|e| warn!(role = %role, error = %e, "Model call failed"))?;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.stats.ingest(&completion);
        debug!(
            role = %role,
            prompt_tokens = completion.usage.prompt_tokens,
            completion_tokens = completion.usage.completion_tokens,
            duration_ms,
            "Model call complete"
        );

        if let Some((run, stage)) = run.as_mut() {
            let record = LlmCallRecord {
                stage: *stage,
                role,
                prompt_preview,
                response_preview: head(&completion.text, self.preview_chars),
                prompt_tokens: completion.usage.prompt_tokens,
                completion_tokens: completion.usage.completion_tokens,
                total_tokens: completion.usage.total_tokens,
                duration_ms,
            };
            let details = match serde_json::to_value(&record) {
                Ok(serde_json::Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            run.llm_calls.push(record);
            self.pipeline.append(run, *stage, EventKind::LlmCall, details);
        }

        Ok(LlmResponse {
            text: completion.text,
            usage: completion.usage,
            timings: completion.timings,
            duration_ms,
        })
    }
}

/// `ROLE: content` lines, cut at `max_chars` with a trailing `...`.
pub fn preview_messages(messages: &[Message], max_chars: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut len = 0;
    for message in messages {
        let line = format!("{}: {}", message.role.as_str().to_uppercase(), message.content);
        len += line.chars().count() + usize::from(!lines.is_empty());
        lines.push(line);
        if len >= max_chars {
            break;
        }
    }

    let text = lines.join("\n");
    if text.chars().count() > max_chars {
        let mut cut = head(&text, max_chars.saturating_sub(3));
        cut.push_str("...");
        cut
    } else {
        text
    }
}

fn head(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedLoader;

    fn invoker(loader: ScriptedLoader) -> Invoker {
        Invoker::new(
            Arc::new(ModelSlotManager::new(Arc::new(loader), 0)),
            Arc::new(LlmStats::new()),
            Arc::new(EventPipeline::default()),
            DecodingConfig::default(),
            400,
        )
    }

    #[test]
    fn preview_prefixes_roles() {
        let messages = vec![Message::system("be brief"), Message::user("hi")];
        assert_eq!(preview_messages(&messages, 400), "SYSTEM: be brief\nUSER: hi");
    }

    #[test]
    fn preview_truncates_with_ellipsis() {
        let messages = vec![Message::user("x".repeat(50))];
        let preview = preview_messages(&messages, 20);
        assert_eq!(preview.chars().count(), 20);
        assert!(preview.ends_with("..."));
        assert!(preview.starts_with("USER: xxx"));
    }

    #[test]
    fn preview_stops_after_limit_is_reached() {
        let messages = vec![
            Message::user("a".repeat(30)),
            Message::assistant("b"),
            Message::user("c"),
        ];
        let preview = preview_messages(&messages, 10);
        assert!(!preview.contains('b'));
    }

    #[tokio::test]
    async fn call_without_run_only_updates_stats() {
        let invoker = invoker(ScriptedLoader::new(vec!["four words of text"]));
        let response = invoker
            .invoke_primary(&[Message::user("hello")], None)
            .await
            .unwrap();
        assert_eq!(response.text, "four words of text");
        assert_eq!(response.usage.completion_tokens, 4);
        assert_eq!(invoker.stats().snapshot().calls, 1);
        assert_eq!(invoker.stats().snapshot().prompt_ms, 10.0);
    }

    #[tokio::test]
    async fn call_with_run_emits_pending_then_completed() {
        let invoker = invoker(ScriptedLoader::new(vec!["[]"]));
        let mut run = RunState::new("q", vec![]);

        invoker
            .invoke_primary(&[Message::user("plan it")], Some((&mut run, Stage::Planner)))
            .await
            .unwrap();

        let kinds: Vec<_> = run.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::LlmCallPending, EventKind::LlmCall]);
        assert!(run.events.iter().all(|e| e.stage == Stage::Planner));
        assert_eq!(
            run.events[0].detail("prompt_preview"),
            Some(&json!("USER: plan it"))
        );
        let done = &run.events[1];
        assert_eq!(done.detail("role"), Some(&json!("primary")));
        assert_eq!(done.detail("response_preview"), Some(&json!("[]")));
        assert!(done.detail("duration_ms").is_some());

        assert_eq!(run.llm_calls.len(), 1);
        assert_eq!(run.llm_calls[0].stage, Stage::Planner);
        assert_eq!(run.llm_calls[0].prompt_tokens, 2);
    }

    #[tokio::test]
    async fn role_shortcuts_apply_configured_defaults() {
        let loader = ScriptedLoader::new(vec!["a", "b"]);
        let journal = loader.journal();
        let invoker = invoker(loader);

        invoker.invoke_primary(&[Message::user("x")], None).await.unwrap();
        invoker.invoke_secondary(&[Message::user("y")], None).await.unwrap();

        let journal = journal.lock().unwrap();
        assert!(journal.contains(&"complete primary max_tokens=2048".to_string()));
        assert!(journal.contains(&"complete secondary max_tokens=1024".to_string()));
    }

    #[tokio::test]
    async fn per_call_override_wins() {
        let loader = ScriptedLoader::new(vec!["a"]);
        let journal = loader.journal();
        let invoker = invoker(loader);

        let params = DecodingParams {
            max_tokens: 64,
            ..invoker.defaults(ModelRole::Primary)
        };
        invoker
            .invoke(ModelRole::Primary, &[Message::user("x")], params, None)
            .await
            .unwrap();

        assert!(
            journal
                .lock()
                .unwrap()
                .contains(&"complete primary max_tokens=64".to_string())
        );
    }

    #[tokio::test]
    async fn load_failure_propagates_without_completion_event() {
        let loader = ScriptedLoader::new(vec!["never"]).failing_at(ModelRole::Primary, 0);
        let invoker = invoker(loader);
        let mut run = RunState::new("q", vec![]);

        let err = invoker
            .invoke_primary(&[Message::user("x")], Some((&mut run, Stage::Reflector)))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::LoadFailed { .. }));
        let kinds: Vec<_> = run.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::LlmCallPending]);
        assert!(run.llm_calls.is_empty());
        assert_eq!(invoker.stats().snapshot().calls, 0);
    }
}
