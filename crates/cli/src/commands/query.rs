//! `cogloop query` — Run one request and print what happened.

use super::{
    build_orchestrator, load_config, print_failure, print_report, stop_stream, stream_events,
};
use cogloop_core::event::EventObserver;
use cogloop_telemetry::RunTimeline;
use std::sync::Arc;

pub async fn run(
    query: String,
    files: Vec<String>,
    json: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(&config)?;

    let live = (!quiet && !json).then(|| stream_events(orchestrator.pipeline()));
    let timeline = RunTimeline::new();
    let observers: Vec<Arc<dyn EventObserver>> = vec![Arc::new(timeline.clone())];

    let outcome = orchestrator.run_observed(&query, files, &observers).await;

    if let Some((id, handle)) = live {
        stop_stream(orchestrator.pipeline(), id, handle).await;
    }
    orchestrator.shutdown().await;

    match outcome {
        Ok(report) if json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Ok(report) => {
            print_report(&report);
            println!();
            println!("⏱  Timeline");
            println!("{}", timeline.summary());
        }
        Err(failure) => {
            print_failure(&failure);
            return Err(failure.into());
        }
    }

    Ok(())
}
