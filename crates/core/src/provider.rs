//! Model backend contracts.
//!
//! A [`ModelLoader`] knows where the weights for each [`ModelRole`] live and
//! how to instantiate them at a given acceleration level. The resulting
//! [`LanguageModel`] performs blocking completions; the providers crate keeps
//! at most one of them resident and runs it on a blocking worker.

use crate::error::ProviderError;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A named purpose for a model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// Planning, reflection and synthesis
    Primary,
    /// Auxiliary generation (tool-side prompts)
    Secondary,
}

impl ModelRole {
    pub const ALL: [ModelRole; 2] = [ModelRole::Primary, ModelRole::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelRole {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(ProviderError::ModelNotFound(format!("unknown role '{other}'"))),
        }
    }
}

/// Sampling parameters for one completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodingParams {
    /// Temperature (0.0 = greedy)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Nucleus-sampling threshold
    pub top_p: f32,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1024,
            top_p: 0.95,
        }
    }
}

/// One completion request against a loaded model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub params: DecodingParams,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Backend-reported timings, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub prompt_ms: f64,
    pub eval_ms: f64,
}

/// The raw result of a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    pub timings: Timings,
}

/// A live, resident model instance.
///
/// Calls are blocking; callers run them off the async executor.
pub trait LanguageModel: Send {
    /// Generate a completion for the request.
    fn complete(&mut self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Best-effort reset before the instance is dropped.
    fn reset(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Knows how to materialize the weights for a role.
pub trait ModelLoader: Send + Sync {
    /// Resolve the weights file for a role.
    fn locate(&self, role: ModelRole) -> Result<PathBuf, ProviderError>;

    /// Instantiate the weights at `path` with the given acceleration level.
    ///
    /// Level 0 means fully unaccelerated.
    fn instantiate(
        &self,
        role: ModelRole,
        path: &Path,
        acceleration: u32,
    ) -> Result<Box<dyn LanguageModel>, ProviderError>;
}

/// The acceleration level a role last ran at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceleration {
    Unloaded,
    Level(u32),
}

impl Serialize for Acceleration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unloaded => serializer.serialize_str("unloaded"),
            Self::Level(level) => serializer.serialize_u32(*level),
        }
    }
}

impl std::fmt::Display for Acceleration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => f.write_str("unloaded"),
            Self::Level(0) => f.write_str("cpu"),
            Self::Level(level) => write!(f, "accelerated ({level} layers)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Primary".parse::<ModelRole>().unwrap(), ModelRole::Primary);
        assert_eq!(" secondary ".parse::<ModelRole>().unwrap(), ModelRole::Secondary);
        assert!("orchestrator".parse::<ModelRole>().is_err());
    }

    #[test]
    fn acceleration_serializes_as_number_or_sentinel() {
        assert_eq!(serde_json::to_string(&Acceleration::Level(0)).unwrap(), "0");
        assert_eq!(
            serde_json::to_string(&Acceleration::Unloaded).unwrap(),
            r#""unloaded""#
        );
    }

    #[test]
    fn acceleration_display() {
        assert_eq!(Acceleration::Level(0).to_string(), "cpu");
        assert_eq!(Acceleration::Level(35).to_string(), "accelerated (35 layers)");
    }
}
