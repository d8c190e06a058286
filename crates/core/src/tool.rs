//! Tool trait — the abstraction over agent capabilities.
//!
//! The set of tools the planner may name is closed: every known tool has a
//! [`ToolKind`] variant, and the [`ToolRegistry`] maps each kind to the
//! collaborator that implements it. A name that does not parse into a
//! `ToolKind`, or a kind nobody registered, resolves to
//! [`ToolError::NotFound`].

use crate::error::ToolError;
use crate::state::RunState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Every tool the planner can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    FinancialAnalyzer,
    LegalRetriever,
    MarketingGenerator,
    DocumentLoader,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::FinancialAnalyzer,
        ToolKind::LegalRetriever,
        ToolKind::MarketingGenerator,
        ToolKind::DocumentLoader,
    ];

    /// The wire name used in plans.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FinancialAnalyzer => "financial_analyzer",
            Self::LegalRetriever => "legal_retriever",
            Self::MarketingGenerator => "marketing_generator",
            Self::DocumentLoader => "document_loader",
        }
    }

    /// Parse a wire name. Surrounding whitespace is ignored.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A file a tool read on behalf of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedDocument {
    pub path: String,
    pub chars: usize,
    pub lines: usize,
}

/// What a tool hands back on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text shown to the model
    pub text: String,

    /// Optional structured data, surfaced in the `tool_call` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Files read while producing the output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<LoadedDocument>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// The dispatcher's uniform view of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(ToolOutput),
    Failure { message: String },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// The core Tool trait.
///
/// Tools are external collaborators: the loop only needs their name,
/// a description for the planner, and a call that yields text.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Which known tool this implements.
    fn kind(&self) -> ToolKind;

    /// A description of what this tool does (shown to the planner).
    fn description(&self) -> &str;

    /// Run the tool. Expected failures come back as `Err`.
    async fn invoke(
        &self,
        params: &serde_json::Map<String, serde_json::Value>,
        run: &RunState,
    ) -> Result<ToolOutput, ToolError>;
}

/// A registry of available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<ToolKind, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool of the same kind.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.kind(), Arc::new(tool));
    }

    /// Get a tool by kind.
    pub fn get(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.tools.get(&kind).cloned()
    }

    /// Resolve a wire name to a registered tool.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        ToolKind::from_name(name)
            .and_then(|kind| self.get(kind))
            .ok_or_else(|| ToolError::NotFound(name.trim().to_string()))
    }

    /// `(kind, description)` for every registered tool, in a stable order.
    pub fn catalog(&self) -> Vec<(ToolKind, String)> {
        ToolKind::ALL
            .into_iter()
            .filter_map(|kind| {
                self.tools
                    .get(&kind)
                    .map(|tool| (kind, tool.description().to_string()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
