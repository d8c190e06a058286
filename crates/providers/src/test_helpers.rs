//! Scripted loaders and models for tests.
//!
//! Compiled for this crate's tests and, through the `test-support`
//! feature, for downstream test suites.

use cogloop_core::error::ProviderError;
use cogloop_core::provider::{
    Completion, CompletionRequest, LanguageModel, ModelLoader, ModelRole, Timings, Usage,
};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Shared record of everything the loader and its models did, in order.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// A loader whose models answer from one shared queue of scripted replies.
///
/// Every locate/instantiate/complete/reset/drop is written to the journal,
/// e.g. `"instantiate primary@20"`. Once the queue is empty the fallback
/// reply is used, if set; otherwise `complete` fails.
pub struct ScriptedLoader {
    journal: Journal,
    replies: Arc<Mutex<VecDeque<String>>>,
    fallback: Option<String>,
    prompts: Arc<Mutex<Vec<CompletionRequest>>>,
    failing: HashSet<(ModelRole, u32)>,
}

impl ScriptedLoader {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            journal: Arc::new(Mutex::new(Vec::new())),
            replies: Arc::new(Mutex::new(replies.into_iter().map(String::from).collect())),
            fallback: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
            failing: HashSet::new(),
        }
    }

    /// Reply with `text` once the script runs out.
    pub fn then_always(mut self, text: &str) -> Self {
        self.fallback = Some(text.to_string());
        self
    }

    /// Make `instantiate(role, _, level)` fail.
    pub fn failing_at(mut self, role: ModelRole, level: u32) -> Self {
        self.failing.insert((role, level));
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Every request the models received, in order.
    pub fn prompts(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        self.prompts.clone()
    }
}

impl ModelLoader for ScriptedLoader {
    fn locate(&self, role: ModelRole) -> Result<PathBuf, ProviderError> {
        self.journal.lock().unwrap().push(format!("locate {role}"));
        Ok(PathBuf::from(format!("/weights/{role}.gguf")))
    }

    fn instantiate(
        &self,
        role: ModelRole,
        _path: &Path,
        acceleration: u32,
    ) -> Result<Box<dyn LanguageModel>, ProviderError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("instantiate {role}@{acceleration}"));
        if self.failing.contains(&(role, acceleration)) {
            return Err(ProviderError::LoadFailed {
                role: role.to_string(),
                level: acceleration,
                reason: "no accelerator available".into(),
            });
        }
        Ok(Box::new(ScriptedModel {
            role,
            journal: self.journal.clone(),
            replies: self.replies.clone(),
            fallback: self.fallback.clone(),
            prompts: self.prompts.clone(),
        }))
    }
}

pub struct ScriptedModel {
    role: ModelRole,
    journal: Journal,
    replies: Arc<Mutex<VecDeque<String>>>,
    fallback: Option<String>,
    prompts: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl LanguageModel for ScriptedModel {
    fn complete(&mut self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!(
                "complete {} max_tokens={}",
                self.role, request.params.max_tokens
            ));
        self.prompts.lock().unwrap().push(request.clone());
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| ProviderError::Inference("no more scripted replies".into()))?;
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u32)
            .sum();
        let completion_tokens = text.split_whitespace().count() as u32;
        Ok(Completion {
            text,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            timings: Timings {
                prompt_ms: 10.0,
                eval_ms: 40.0,
            },
        })
    }

    fn reset(&mut self) -> Result<(), ProviderError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("reset {}", self.role));
        Ok(())
    }
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(format!("drop {}", self.role));
        }
    }
}
