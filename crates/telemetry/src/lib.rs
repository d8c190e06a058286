//! LLM usage statistics and run timelines for Cogloop.
//!
//! [`LlmStats`] accumulates token and timing totals across every model call
//! an orchestrator makes; it is reset at the start of each run and read at
//! the end. [`RunTimeline`] is an event observer that folds a run's events
//! into per-stage durations and per-tool counts for post-run display.

pub mod stats;
pub mod timeline;

pub use stats::{LlmStats, StatsSnapshot};
pub use timeline::{RunTimeline, TimelineSummary, ToolTally};
