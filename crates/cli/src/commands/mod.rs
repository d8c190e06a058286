//! Subcommand implementations and the output helpers they share.

pub mod config_cmd;
pub mod interactive;
pub mod models;
pub mod query;

use cogloop_agent::{Orchestrator, RunFailure, RunReport};
use cogloop_config::AppConfig;
use cogloop_core::event::{AgentEvent, EventKind, EventPipeline};
use serde_json::Value;
use tokio::task::JoinHandle;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load().map_err(|e| format!("Failed to load config: {e}").into())
}

/// Build an orchestrator backed by the local GGUF loader.
#[cfg(feature = "local")]
pub fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let loader = std::sync::Arc::new(cogloop_providers::LocalLoader::new(config.models.clone()));
    Ok(Orchestrator::new(
        config,
        loader,
        cogloop_tools::default_registry(),
    ))
}

#[cfg(not(feature = "local"))]
pub fn build_orchestrator(_config: &AppConfig) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    Err("cogloop was built without local inference; rebuild with `--features local`".into())
}

// ── Live event stream ────────────────────────────────────────────────────

/// Print every event of the pipeline from a separate task.
///
/// The task ends once the subscription is removed from `pipeline`.
pub fn stream_events(pipeline: &EventPipeline) -> (cogloop_core::SubscriptionId, JoinHandle<u64>) {
    let mut stream = pipeline.subscribe_buffered();
    let id = stream.id;
    let handle = tokio::spawn(async move {
        while let Some(event) = stream.receiver.recv().await {
            eprintln!("{}", format_event(&event));
        }
        stream.dropped()
    });
    (id, handle)
}

/// Remove the subscription and wait for the printer to drain.
///
/// Returns how many events the printer missed, or `None` if its task
/// died. Either is reported on stderr.
pub async fn stop_stream(
    pipeline: &EventPipeline,
    id: cogloop_core::SubscriptionId,
    handle: JoinHandle<u64>,
) -> Option<u64> {
    pipeline.unsubscribe(id);
    match handle.await {
        Ok(dropped) => {
            if dropped > 0 {
                eprintln!("  ({dropped} events were not shown)");
            }
            Some(dropped)
        }
        Err(e) => {
            eprintln!("  (event printer stopped: {e})");
            None
        }
    }
}

/// One line per event, for humans.
pub fn format_event(event: &AgentEvent) -> String {
    let time = event
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S%.3f");
    let ms = |key: &str| event.detail(key).and_then(Value::as_f64).unwrap_or(0.0);
    let text = |key: &str| {
        event
            .detail(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let body = match event.kind {
        EventKind::NodeEnter => format!("→ {}", event.stage),
        EventKind::NodeExit => format!("← {} ({:.1} ms)", event.stage, ms("duration_ms")),
        EventKind::ToolCall => {
            let ok = event.detail("success").and_then(Value::as_bool) == Some(true);
            if ok {
                format!("⚙ {} ok ({:.1} ms)", text("tool"), ms("duration_ms"))
            } else {
                format!("⚙ {} failed: {}", text("tool"), text("error"))
            }
        }
        EventKind::LlmCallPending => format!("… waiting for {} model", text("role")),
        EventKind::LlmCall => format!(
            "✓ {} model: {} tokens in {:.1} ms",
            text("role"),
            event
                .detail("total_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            ms("duration_ms")
        ),
        EventKind::DocumentLoad => match event.detail("error") {
            Some(error) => format!("📄 {} unreadable: {}", text("path"), error),
            None => format!("📄 {}", text("path")),
        },
    };
    format!("  [{time}] {body}")
}

// ── Reports ──────────────────────────────────────────────────────────────

pub fn print_report(report: &RunReport) {
    let state = &report.state;

    println!();
    println!("📋 Plan ({} steps)", state.plan.len());
    for step in &state.plan {
        println!("  {}. {} — {}", step.step, step.tool, step.action);
    }

    println!();
    println!("🔧 Tool history");
    if state.tool_results.is_empty() {
        println!("  (no tools ran)");
    }
    for exec in &state.tool_results {
        let mark = if exec.success { "✅" } else { "❌" };
        println!("  {mark} step {} {}: {}", exec.step, exec.tool, first_line(&exec.output));
    }

    let documents = report.documents();
    if !documents.is_empty() {
        println!();
        println!("📄 Documents");
        for doc in documents {
            println!("  {} ({} lines, {} chars)", doc.path, doc.lines, doc.chars);
        }
    }

    println!();
    println!("💬 Answer");
    println!("{}", state.final_answer.as_deref().unwrap_or("(none)"));

    println!();
    println!("📊 LLM stats");
    println!("  Calls:        {}", report.stats.calls);
    println!(
        "  Tokens:       {} ({} prompt + {} completion)",
        report.stats.total_tokens, report.stats.prompt_tokens, report.stats.completion_tokens
    );
    println!(
        "  Time:         {:.2} ms prompt, {:.2} ms eval",
        report.stats.prompt_ms, report.stats.eval_ms
    );
    println!("  Throughput:   {:.2} tokens/s", report.stats.tokens_per_second);

    println!();
    println!("🖥  Backend");
    for (role, level) in &report.backend {
        println!("  {:<10} {level}", role.as_str());
    }
}

pub fn print_failure(failure: &RunFailure) {
    eprintln!();
    eprintln!("  ❌ {}", failure.error);
    eprintln!(
        "     {} events and {} tool results recorded before the failure",
        failure.state.events.len(),
        failure.state.tool_results.len()
    );
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
