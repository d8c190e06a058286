//! Built-in tool implementations for Cogloop.
//!
//! Domain tools (financial analysis, legal retrieval, marketing copy) are
//! supplied by the embedding application and registered next to these.

pub mod document_loader;

use cogloop_core::tool::ToolRegistry;

pub use document_loader::DocumentLoaderTool;

/// Create a tool registry with every built-in tool.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(DocumentLoaderTool::new());
    registry
}
