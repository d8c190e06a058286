//! Local inference backend: runs GGUF-quantized models on this machine.
//!
//! Uses [Candle](https://github.com/huggingface/candle) (Rust-native ML) to
//! load llama-family GGUF weights from the configured model directory.
//! Nothing is downloaded: missing weights are reported as
//! [`ProviderError::ModelNotFound`].
//!
//! Acceleration level 0 runs on the CPU. Any level above 0 asks for CUDA
//! device 0; on a host without CUDA (or a build without the `cuda`
//! feature) that fails and the slot manager retries on the CPU.

use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use cogloop_config::ModelsConfig;
use cogloop_core::error::ProviderError;
use cogloop_core::message::{Message, Role};
use cogloop_core::provider::{
    Completion, CompletionRequest, LanguageModel, ModelLoader, ModelRole, Timings, Usage,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

// ── Chat templates ─────────────────────────────────────────────────────

/// Chat template format used to structure messages for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatTemplate {
    /// `<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{content}<|eot_id|>`
    Llama3,
    /// `<|im_start|>system\n{content}<|im_end|>\n`
    ChatML,
    /// `<|system|>\n{content}</s>\n`
    TinyLlama,
}

impl ChatTemplate {
    /// Pick a template from the weights file name.
    fn for_weights(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("llama-3") || name.contains("llama3") {
            Self::Llama3
        } else if name.contains("tinyllama") {
            Self::TinyLlama
        } else {
            Self::ChatML
        }
    }

    fn format(&self, messages: &[Message]) -> String {
        match self {
            Self::Llama3 => format_llama3(messages),
            Self::ChatML => format_chatml(messages),
            Self::TinyLlama => format_tinyllama(messages),
        }
    }

    /// End-of-turn markers, most specific first.
    fn stop_tokens(&self) -> &'static [&'static str] {
        match self {
            Self::Llama3 => &["<|eot_id|>", "<|end_of_text|>"],
            Self::ChatML => &["<|im_end|>", "<|endoftext|>"],
            Self::TinyLlama => &["</s>"],
        }
    }
}

fn format_llama3(messages: &[Message]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for msg in messages {
        prompt.push_str("<|start_header_id|>");
        prompt.push_str(msg.role.as_str());
        prompt.push_str("<|end_header_id|>\n\n");
        prompt.push_str(&msg.content);
        prompt.push_str("<|eot_id|>");
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

fn format_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn format_tinyllama(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        let tag = match msg.role {
            Role::System => "<|system|>\n",
            Role::User => "<|user|>\n",
            Role::Assistant => "<|assistant|>\n",
        };
        prompt.push_str(tag);
        prompt.push_str(&msg.content);
        prompt.push_str("</s>\n");
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

// ── Loader ─────────────────────────────────────────────────────────────

/// Loads GGUF weights for each role from the configured model directory.
pub struct LocalLoader {
    models: ModelsConfig,
}

impl LocalLoader {
    pub fn new(models: ModelsConfig) -> Self {
        Self { models }
    }

    fn device(acceleration: u32) -> Result<Device, ProviderError> {
        if acceleration == 0 {
            return Ok(Device::Cpu);
        }
        Device::new_cuda(0).map_err(|e| ProviderError::LoadFailed {
            role: String::new(),
            level: acceleration,
            reason: format!("CUDA device unavailable: {e}"),
        })
    }
}

impl ModelLoader for LocalLoader {
    fn locate(&self, role: ModelRole) -> Result<PathBuf, ProviderError> {
        let path = self.models.weights_path(role);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ProviderError::ModelNotFound(format!(
                "weights for role '{role}' not found at {}",
                path.display()
            )))
        }
    }

    fn instantiate(
        &self,
        role: ModelRole,
        path: &Path,
        acceleration: u32,
    ) -> Result<Box<dyn LanguageModel>, ProviderError> {
        let load_failed = |reason: String| ProviderError::LoadFailed {
            role: role.to_string(),
            level: acceleration,
            reason,
        };

        let device = Self::device(acceleration).map_err(|e| load_failed(e.to_string()))?;

        info!(
            role = %role,
            path = %path.display(),
            acceleration,
            context_size = self.models.context_size,
            batch_size = self.models.batch_size,
            "Loading local GGUF model"
        );

        let tokenizer_path = self.models.tokenizer_path(role);
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            load_failed(format!(
                "failed to load tokenizer {}: {e}",
                tokenizer_path.display()
            ))
        })?;

        let mut file = std::fs::File::open(path)
            .map_err(|e| load_failed(format!("failed to open GGUF file: {e}")))?;
        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| load_failed(format!("failed to parse GGUF file: {e}")))?;
        let weights = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| load_failed(format!("failed to load model weights: {e}")))?;

        let template = ChatTemplate::for_weights(path);
        let eos_token_id = template
            .stop_tokens()
            .iter()
            .find_map(|t| tokenizer.token_to_id(t))
            .or_else(|| tokenizer.token_to_id("</s>"))
            .unwrap_or(2);

        info!(role = %role, eos_token_id, ?template, "Local model loaded");

        Ok(Box::new(LocalModel {
            weights,
            tokenizer,
            device,
            template,
            eos_token_id,
            context_size: self.models.context_size as usize,
            seed: self.models.seed,
        }))
    }
}

// ── Model ──────────────────────────────────────────────────────────────

/// A resident model: tokenizer, weights and the device they live on.
struct LocalModel {
    weights: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    template: ChatTemplate,
    eos_token_id: u32,
    context_size: usize,
    seed: u64,
}

impl LocalModel {
    /// Prefill the prompt, then decode until EOS or `max_tokens`.
    fn generate(&mut self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let prompt = self.template.format(&request.messages);
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| ProviderError::Inference(format!("tokenization failed: {e}")))?;
        let prompt_ids = encoding.get_ids();
        let prompt_len = prompt_ids.len();
        let max_tokens = request.params.max_tokens as usize;

        if prompt_len >= self.context_size {
            return Err(ProviderError::Inference(format!(
                "prompt of {prompt_len} tokens does not fit a context of {}",
                self.context_size
            )));
        }
        let budget = max_tokens.min(self.context_size - prompt_len);

        debug!(
            prompt_tokens = prompt_len,
            max_tokens = budget,
            temperature = request.params.temperature,
            top_p = request.params.top_p,
            "Starting local generation"
        );

        let mut logits_processor = if request.params.temperature <= 0.0 {
            LogitsProcessor::new(self.seed, None, None)
        } else {
            LogitsProcessor::new(
                self.seed,
                Some(f64::from(request.params.temperature)),
                Some(f64::from(request.params.top_p)),
            )
        };

        // Prefill at position 0 also clears the previous call's KV cache.
        let prefill_start = Instant::now();
        let input = Tensor::new(prompt_ids, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let logits = self.weights.forward(&input, 0).map_err(map_candle_err)?;
        let mut next = sample_last(&logits, &mut logits_processor)?;
        let prompt_ms = prefill_start.elapsed().as_secs_f64() * 1000.0;

        let decode_start = Instant::now();
        let mut generated: Vec<u32> = Vec::new();
        while next != self.eos_token_id && generated.len() < budget {
            generated.push(next);
            if generated.len() == budget {
                break;
            }
            let input = Tensor::new(&[next][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
            let logits = self
                .weights
                .forward(&input, prompt_len + generated.len() - 1)
                .map_err(map_candle_err)?;
            next = sample_last(&logits, &mut logits_processor)?;
        }
        let eval_ms = decode_start.elapsed().as_secs_f64() * 1000.0;

        let output = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| ProviderError::Inference(format!("detokenization failed: {e}")))?;

        let mut text = output.trim();
        for stop in self.template.stop_tokens() {
            text = text.trim_end_matches(stop).trim_end();
        }

        let prompt_tokens = prompt_len as u32;
        let completion_tokens = generated.len() as u32;
        debug!(completion_tokens, eval_ms, "Generation complete");

        Ok(Completion {
            text: text.to_string(),
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            timings: Timings { prompt_ms, eval_ms },
        })
    }
}

/// Sample the next token from the logits of the last position.
fn sample_last(logits: &Tensor, processor: &mut LogitsProcessor) -> Result<u32, ProviderError> {
    let logits = logits.squeeze(0).map_err(map_candle_err)?;
    let logits = match logits.rank() {
        1 => logits,
        _ => {
            let last = logits.dim(0).map_err(map_candle_err)?.saturating_sub(1);
            logits.get(last).map_err(map_candle_err)?
        }
    };
    processor.sample(&logits).map_err(map_candle_err)
}

/// Map Candle errors to ProviderError.
fn map_candle_err(e: candle_core::Error) -> ProviderError {
    ProviderError::Inference(format!("Candle inference error: {e}"))
}

impl LanguageModel for LocalModel {
    fn complete(&mut self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.generate(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_follows_file_name() {
        assert_eq!(
            ChatTemplate::for_weights(Path::new("/m/Meta-Llama-3.1-8B-Instruct-Q4_K_M.gguf")),
            ChatTemplate::Llama3
        );
        assert_eq!(
            ChatTemplate::for_weights(Path::new("tinyllama-1.1b-chat.Q4_K_M.gguf")),
            ChatTemplate::TinyLlama
        );
        assert_eq!(
            ChatTemplate::for_weights(Path::new("qwen2-1_5b-instruct-q4_k_m.gguf")),
            ChatTemplate::ChatML
        );
    }

    #[test]
    fn chat_template_llama3() {
        let messages = vec![Message::system("Plan."), Message::user("Hello")];
        let prompt = format_llama3(&messages);
        assert!(prompt.starts_with("<|begin_of_text|>"));
        assert!(prompt.contains("<|start_header_id|>system<|end_header_id|>\n\nPlan.<|eot_id|>"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn chat_template_chatml() {
        let messages = vec![Message::system("You are helpful."), Message::user("Hi")];
        let prompt = format_chatml(&messages);
        assert!(prompt.contains("<|im_start|>system"));
        assert!(prompt.contains("<|im_start|>user\nHi<|im_end|>"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn chat_template_tinyllama() {
        let messages = vec![Message::system("You are helpful."), Message::user("Hello!")];
        let prompt = format_tinyllama(&messages);
        assert!(prompt.contains("<|system|>"));
        assert!(prompt.contains("<|user|>\nHello!</s>"));
        assert!(prompt.ends_with("<|assistant|>\n"));
    }

    #[test]
    fn cpu_device_at_level_zero() {
        assert!(matches!(LocalLoader::device(0), Ok(Device::Cpu)));
    }

    #[test]
    fn missing_weights_are_not_found() {
        let models = ModelsConfig {
            base_dir: PathBuf::from("/nonexistent/cogloop-weights"),
            ..ModelsConfig::default()
        };
        let loader = LocalLoader::new(models);
        assert!(matches!(
            loader.locate(ModelRole::Primary),
            Err(ProviderError::ModelNotFound(_))
        ));
    }
}
