pub mod t5;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use candle_transformers::generation::Sampling;

/// Persona preamble prepended to every customer message before generation.
pub const PROMPT_PREAMBLE: &str =
    "You are a helpful and friendly customer support assistant. Answer the customer query: ";

pub fn build_prompt(message: &str) -> String {
    format!("{PROMPT_PREAMBLE}{message}")
}

/// Sampling knobs applied identically to every request for the lifetime of
/// the process.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub sampling_enabled: bool,
    pub temperature: f64,
    pub top_k: usize,
    pub top_p: f64,
    pub repetition_penalty: f32,
    pub num_return_sequences: usize,
    /// Fixed sampling seed; `None` draws a fresh one per request.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 128,
            sampling_enabled: true,
            temperature: 0.7,
            top_k: 50,
            top_p: 0.9,
            repetition_penalty: 1.2,
            num_return_sequences: 1,
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn sampling(&self) -> Sampling {
        if !self.sampling_enabled || self.temperature <= 0.0 {
            return Sampling::ArgMax;
        }
        Sampling::TopKThenTopP {
            k: self.top_k,
            p: self.top_p,
            temperature: self.temperature,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}

/// Anything that turns a fully templated prompt into generated text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;
}

// ---------------------------------------------------------
// Service context shared by every request handler
// ---------------------------------------------------------
pub struct InferenceService {
    engine: Arc<dyn TextGenerator>,
    config: GenerationConfig,
}

impl InferenceService {
    pub fn new(engine: Arc<dyn TextGenerator>, config: GenerationConfig) -> Self {
        Self { engine, config }
    }

    pub async fn generate_reply(&self, message: &str) -> Result<String> {
        if self.config.num_return_sequences != 1 {
            bail!(
                "only single-sequence generation is supported (got {})",
                self.config.num_return_sequences
            );
        }
        let prompt = build_prompt(message);
        self.engine.generate(&prompt, &self.config).await
    }
}
