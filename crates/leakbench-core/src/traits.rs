//! The model-invocation boundary.
//!
//! The harness only needs `generate(model, prompt, options) -> text` plus
//! optional token counts; backends live in `leakbench-providers`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Trait for inference backends that answer prompts.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Human-readable backend name (e.g. "ollama").
    fn name(&self) -> &str;

    /// Produce a completion for one prompt.
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse>;

    /// Models the backend can serve. Backends without a listing return an empty list.
    async fn list_models(&self) -> anyhow::Result<Vec<BackendModel>> {
        Ok(Vec::new())
    }
}

/// Sampling options forwarded to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub num_ctx: u32,
    /// Omitted from the backend request when `None`.
    pub seed: Option<i64>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            num_ctx: 4096,
            seed: Some(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier as the backend knows it (e.g. "qwen2.5:7b").
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Model that actually answered.
    pub model: String,
    /// Raw completion text.
    pub response: String,
    pub prompt_eval_count: Option<u64>,
    pub eval_count: Option<u64>,
    pub total_duration_ns: Option<u64>,
}

/// A model reported by a backend listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendModel {
    pub name: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// One stored model answer, written per (model, example).
///
/// The evaluator needs only `example_id` and `response`; the remaining
/// fields are carried for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub example_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub total_duration_ns: Option<u64>,
}

impl RunOutput {
    pub fn new(example_id: &str, requested_model: &str, resp: GenerateResponse) -> Self {
        Self {
            example_id: example_id.to_string(),
            model: requested_model.to_string(),
            response: resp.response,
            prompt_eval_count: resp.prompt_eval_count,
            eval_count: resp.eval_count,
            total_duration_ns: resp.total_duration_ns,
        }
    }
}
