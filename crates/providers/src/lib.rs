//! Model backends for Cogloop.
//!
//! - [`ModelSlotManager`] keeps at most one model resident and swaps it
//!   between roles on demand.
//! - [`Invoker`] turns a role plus messages into one completion, keeps
//!   running stats and reports each call to the run's event log.
//! - `LocalLoader` (feature `local`) instantiates GGUF weights with Candle.

pub mod invoker;
#[cfg(feature = "local")]
pub mod local;
pub mod slots;

#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_helpers;

pub use invoker::{Invoker, LlmResponse};
#[cfg(feature = "local")]
pub use local::LocalLoader;
pub use slots::{ModelLease, ModelSlotManager};
