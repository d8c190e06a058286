//! Document loader tool: reads plain-text input files for the run.

use async_trait::async_trait;
use cogloop_core::error::ToolError;
use cogloop_core::state::RunState;
use cogloop_core::tool::{LoadedDocument, Tool, ToolKind, ToolOutput};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::Path;
use tracing::debug;

/// Extensions read as UTF-8 text.
const TEXT_SUFFIXES: &[&str] = &["txt", "md", "csv", "tsv", "json", "log"];

#[derive(Debug, Serialize)]
struct DocumentText {
    path: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub struct DocumentLoaderTool {
    /// Files larger than this are rejected per file.
    pub max_bytes: u64,
}

impl DocumentLoaderTool {
    pub fn new() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024,
        }
    }

    async fn load(&self, path: &str) -> Result<String, String> {
        let suffix = Path::new(path)
            .extension()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !TEXT_SUFFIXES.contains(&suffix.as_str()) {
            return Err(format!("Unsupported file type: .{suffix}"));
        }

        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("Failed to read file: {e}"))?;
        if meta.len() > self.max_bytes {
            return Err(format!(
                "File is {} bytes, limit is {}",
                meta.len(),
                self.max_bytes
            ));
        }

        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read file: {e}"))
    }
}

impl Default for DocumentLoaderTool {
    fn default() -> Self {
        Self::new()
    }
}

/// `params.files` (a list or a single path), falling back to the run's files.
fn requested_files(params: &Map<String, Value>, run: &RunState) -> Result<Vec<String>, ToolError> {
    match params.get("files") {
        None | Some(Value::Null) => Ok(run.files.clone()),
        Some(Value::String(path)) => Ok(vec![path.clone()]),
        Some(Value::Array(items)) if items.is_empty() => Ok(run.files.clone()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(String::from).ok_or_else(|| {
                    ToolError::InvalidArguments("'files' must contain only paths".into())
                })
            })
            .collect(),
        Some(_) => Err(ToolError::InvalidArguments(
            "'files' must be a path or a list of paths".into(),
        )),
    }
}

fn line_count(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        text.matches('\n').count() + 1
    }
}

#[async_trait]
impl Tool for DocumentLoaderTool {
    fn kind(&self) -> ToolKind {
        ToolKind::DocumentLoader
    }

    fn description(&self) -> &str {
        "Reads the given plain-text files (params.files, default: the run's input files) and returns their contents."
    }

    async fn invoke(
        &self,
        params: &Map<String, Value>,
        run: &RunState,
    ) -> Result<ToolOutput, ToolError> {
        let files = requested_files(params, run)?;

        let mut texts = Vec::with_capacity(files.len());
        let mut documents = Vec::with_capacity(files.len());
        for path in files {
            let (text, error) = match self.load(&path).await {
                Ok(text) => (text, None),
                Err(e) => {
                    debug!(path = %path, error = %e, "Document skipped");
                    (String::new(), Some(e))
                }
            };
            documents.push(LoadedDocument {
                path: path.clone(),
                chars: text.chars().count(),
                lines: line_count(&text),
            });
            texts.push(DocumentText { path, text, error });
        }

        let text = serde_json::to_string_pretty(&texts).map_err(|e| ToolError::ExecutionFailed {
            tool_name: ToolKind::DocumentLoader.name().into(),
            reason: e.to_string(),
        })?;

        Ok(ToolOutput {
            text,
            data: Some(json!({ "documents": documents })),
            documents,
        })
    }
}
