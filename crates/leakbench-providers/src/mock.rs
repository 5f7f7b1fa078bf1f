//! Mock backend for testing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use leakbench_core::traits::{BackendModel, GenerateRequest, GenerateResponse, ModelBackend};

/// A mock backend for running the pipeline without a model server.
///
/// Returns the response of the first rule whose key occurs in the prompt,
/// falling back to a default response.
pub struct MockBackend {
    /// Prompt substring → response, checked in insertion order.
    rules: Vec<(String, String)>,
    default_response: String,
    call_count: AtomicU32,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockBackend {
    pub fn new(rules: Vec<(String, String)>) -> Self {
        Self {
            rules,
            default_response: String::new(),
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn with_fixed_response(response: &str) -> Self {
        Self::new(Vec::new()).with_default(response)
    }

    pub fn with_default(mut self, response: &str) -> Self {
        self.default_response = response.to_string();
        self
    }

    /// Get the number of calls made to this backend.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }

        let response = self
            .rules
            .iter()
            .find(|(key, _)| request.prompt.contains(key.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_response.clone());

        Ok(GenerateResponse {
            model: request.model.clone(),
            prompt_eval_count: Some((request.prompt.len() / 4) as u64), // Rough estimate
            eval_count: Some((response.len() / 4) as u64),
            total_duration_ns: Some(1_000),
            response,
        })
    }

    async fn list_models(&self) -> anyhow::Result<Vec<BackendModel>> {
        Ok(vec![BackendModel {
            name: "mock-model".into(),
            size_bytes: None,
        }])
    }
}
