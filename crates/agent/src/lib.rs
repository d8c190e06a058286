//! The Cogloop reasoning loop.
//!
//! A run follows a **Plan → Execute → Reflect → Synthesize** cycle:
//!
//! 1. **Plan**: the primary model turns the query into a JSON list of tool steps
//! 2. **Execute**: the next pending step is dispatched to its tool
//! 3. **Reflect**: the model decides whether to run another step
//! 4. **Synthesize**: the model writes the final answer from the tool history
//!
//! Execute and reflect repeat while the reflector asks to continue, steps
//! remain, and the iteration ceiling is not reached.

pub mod dispatcher;
pub mod engine;
pub mod orchestrator;
pub mod parse;
pub mod prompts;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatcher::ToolDispatcher;
pub use engine::{Node, StepEngine};
pub use orchestrator::{Orchestrator, RunFailure, RunReport};
pub use parse::{Reflection, Verdict, parse_plan, parse_reflection};
