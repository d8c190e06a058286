//! # Cogloop Core
//!
//! Domain types, traits, and error definitions for the Cogloop reasoning
//! loop. This crate has **no backend dependencies**: it defines the run
//! state, the event pipeline, and the tool and model contracts that all
//! other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping model backends and tools without touching the engine
//! - Easy testing with scripted stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod state;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{AgentEvent, EventKind, EventObserver, EventPipeline, EventStream, Stage, SubscriptionId};
pub use message::{Message, Role};
pub use provider::{
    Acceleration, Completion, CompletionRequest, DecodingParams, LanguageModel, ModelLoader,
    ModelRole, Timings, Usage,
};
pub use state::{LlmCallRecord, PlanStep, RunState, ToolExecution};
pub use tool::{LoadedDocument, Tool, ToolKind, ToolOutcome, ToolOutput, ToolRegistry};
