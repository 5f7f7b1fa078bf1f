//! Model-run engine.
//!
//! Sends every example prompt to every requested model and stores one
//! [`RunOutput`] file per (model, example) under
//! `<outdir>/<model>/<example id>.json`. Ids that are not already safe file
//! names get a digest suffix (see [`output_file_name`]). Runs are resumable:
//! outputs already on disk are detected by reading their `example_id` and
//! skipped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use crate::error::ProviderError;
use crate::model::Example;
use crate::traits::{GenerateRequest, GenerateResponse, GenerationOptions, ModelBackend, RunOutput};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

static UNSAFE_PATH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("invalid path sanitizer regex"));

/// Turn a model name or example id into a safe single path component.
pub fn sanitize_component(name: &str) -> String {
    UNSAFE_PATH_CHARS.replace_all(name, "_").into_owned()
}

/// File name for the output of `example_id`.
///
/// Safe ids are used as-is. Any other id is sanitized and suffixed with the
/// first eight hex digits of its SHA-256, so `q:1` and `q/1` land in
/// different files.
pub fn output_file_name(example_id: &str) -> String {
    let safe = sanitize_component(example_id);
    if safe == example_id {
        return format!("{safe}.json");
    }
    let digest = Sha256::digest(example_id.as_bytes());
    let suffix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("{safe}-{suffix}.json")
}

/// Configuration for the run engine.
#[derive(Debug, Clone)]
pub struct RunEngineConfig {
    /// Root directory; one subdirectory per model.
    pub outdir: PathBuf,
    pub options: GenerationOptions,
    /// Maximum concurrent backend requests.
    pub parallelism: usize,
    /// Retries on transient backend errors.
    pub max_retries: u32,
    /// Initial delay between retries, doubled after each attempt.
    pub retry_delay: Duration,
    /// Regenerate outputs that already exist.
    pub overwrite: bool,
    /// Only run the first N examples.
    pub limit: Option<usize>,
}

impl Default for RunEngineConfig {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("runs"),
            options: GenerationOptions::default(),
            parallelism: 1,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            overwrite: false,
            limit: None,
        }
    }
}

/// Per-model outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub model: String,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Progress reporting trait.
pub trait RunProgress: Send + Sync {
    fn on_model_start(&self, model: &str, pending: usize, skipped: usize);
    fn on_example_complete(&self, model: &str, example_id: &str);
    fn on_example_error(&self, model: &str, example_id: &str, error: &str);
    fn on_model_complete(&self, summary: &RunSummary, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopProgress;

impl RunProgress for NoopProgress {
    fn on_model_start(&self, _: &str, _: usize, _: usize) {}
    fn on_example_complete(&self, _: &str, _: &str) {}
    fn on_example_error(&self, _: &str, _: &str, _: &str) {}
    fn on_model_complete(&self, _: &RunSummary, _: Duration) {}
}

pub struct RunEngine {
    backend: Arc<dyn ModelBackend>,
    config: RunEngineConfig,
}

impl RunEngine {
    pub fn new(backend: Arc<dyn ModelBackend>, config: RunEngineConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &RunEngineConfig {
        &self.config
    }

    /// Directory holding the outputs of `model`.
    pub fn model_dir(&self, model: &str) -> PathBuf {
        self.config.outdir.join(sanitize_component(model))
    }

    /// Run every model over the examples, one model after another.
    ///
    /// Individual example failures are reported and counted; only filesystem
    /// setup problems abort the run.
    pub async fn run(
        &self,
        examples: &[Example],
        models: &[String],
        progress: &dyn RunProgress,
    ) -> Result<Vec<RunSummary>> {
        let examples = match self.config.limit {
            Some(n) => &examples[..n.min(examples.len())],
            None => examples,
        };

        let mut summaries = Vec::with_capacity(models.len());
        for model in models {
            summaries.push(self.run_model(examples, model, progress).await?);
        }
        Ok(summaries)
    }

    async fn run_model(
        &self,
        examples: &[Example],
        model: &str,
        progress: &dyn RunProgress,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let model_dir = self.model_dir(model);
        tokio::fs::create_dir_all(&model_dir)
            .await
            .with_context(|| format!("failed to create {}", model_dir.display()))?;

        let done = if self.config.overwrite {
            HashSet::new()
        } else {
            completed_ids(&model_dir)?
        };

        let mut summary = RunSummary {
            model: model.to_string(),
            ..Default::default()
        };
        let mut scheduled = HashSet::new();
        let mut pending = Vec::new();
        for ex in examples {
            if done.contains(&ex.id) || !scheduled.insert(ex.id.as_str()) {
                summary.skipped += 1;
            } else {
                pending.push(ex);
            }
        }

        tracing::info!(
            model,
            pending = pending.len(),
            skipped = summary.skipped,
            "starting model run"
        );
        progress.on_model_start(model, pending.len(), summary.skipped);

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut futures = FuturesUnordered::new();

        let dir = model_dir.as_path();

        for ex in pending {
            let semaphore = Arc::clone(&semaphore);
            futures.push(async move {
                let inner = async {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| anyhow::anyhow!("semaphore closed"))?;

                    let request = GenerateRequest {
                        model: model.to_string(),
                        prompt: ex.prompt.clone(),
                        options: self.config.options,
                    };
                    let response = generate_with_retry(
                        self.backend.as_ref(),
                        &request,
                        self.config.max_retries,
                        self.config.retry_delay,
                    )
                    .await?;

                    write_output(dir, &RunOutput::new(&ex.id, model, response)).await
                };
                (ex.id.as_str(), inner.await)
            });
        }

        while let Some((example_id, result)) = futures.next().await {
            match result {
                Ok(()) => {
                    summary.written += 1;
                    progress.on_example_complete(model, example_id);
                }
                Err(e) => {
                    tracing::error!("generation failed for {example_id}/{model}: {e:#}");
                    summary.failed += 1;
                    progress.on_example_error(model, example_id, &format!("{e:#}"));
                }
            }
        }

        let elapsed = start.elapsed();
        tracing::info!(
            model,
            written = summary.written,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "model run finished"
        );
        progress.on_model_complete(&summary, elapsed);
        Ok(summary)
    }
}

/// Call the backend, retrying transient errors with exponential backoff.
///
/// Permanent [`ProviderError`]s return immediately; a rate-limit hint
/// replaces the current delay.
pub async fn generate_with_retry(
    backend: &dyn ModelBackend,
    request: &GenerateRequest,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<GenerateResponse> {
    let mut last_error = None;
    let mut delay = retry_delay;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
        match backend.generate(request).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                if let Some(provider_err) = e.downcast_ref::<ProviderError>() {
                    if provider_err.is_permanent() {
                        return Err(e);
                    }
                    if let Some(ms) = provider_err.retry_after_ms() {
                        delay = Duration::from_millis(ms).min(MAX_BACKOFF);
                    }
                }
                tracing::debug!(model = %request.model, attempt, "backend call failed: {e:#}");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts made")))
}

/// Ids already answered in `model_dir`, read from the files themselves.
///
/// Unreadable files are ignored so a truncated write is simply redone.
pub fn completed_ids(model_dir: &Path) -> Result<HashSet<String>> {
    let mut done = HashSet::new();
    if !model_dir.is_dir() {
        return Ok(done);
    }
    let entries = std::fs::read_dir(model_dir)
        .with_context(|| format!("failed to list {}", model_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<RunOutput>(&s).ok());
        match parsed {
            Some(out) => {
                done.insert(out.example_id);
            }
            None => tracing::debug!("ignoring unreadable output {}", path.display()),
        }
    }
    Ok(done)
}

async fn write_output(model_dir: &Path, output: &RunOutput) -> Result<()> {
    let path = model_dir.join(output_file_name(&output.example_id));
    let json = serde_json::to_string_pretty(output).context("failed to serialize output")?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::debug!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OutputSpec, TaskType};
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` calls with `error`, then echoes the prompt.
    struct FlakyBackend {
        failures: u32,
        error: fn() -> ProviderError,
        calls: AtomicU32,
        prompts: Mutex<Vec<String>>,
    }

    impl FlakyBackend {
        fn new(failures: u32, error: fn() -> ProviderError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn ok() -> Self {
            Self::new(0, || ProviderError::Timeout(1))
        }
    }

    #[async_trait]
    impl ModelBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err((self.error)().into());
            }
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok(GenerateResponse {
                model: request.model.clone(),
                response: format!("echo: {}", request.prompt),
                prompt_eval_count: Some(3),
                eval_count: Some(2),
                total_duration_ns: None,
            })
        }
    }

    fn example(id: &str) -> Example {
        Example {
            id: id.into(),
            source: "IOL".into(),
            year: None,
            task_type: TaskType::Mcq,
            prompt: format!("prompt for {id}"),
            answer: json!("A"),
            output_spec: OutputSpec::McqLetter { allowed: None },
            meta: Map::new(),
        }
    }

    fn engine(backend: Arc<FlakyBackend>, outdir: &Path) -> RunEngine {
        RunEngine::new(
            backend,
            RunEngineConfig {
                outdir: outdir.to_path_buf(),
                retry_delay: Duration::from_millis(10),
                parallelism: 2,
                ..Default::default()
            },
        )
    }

    #[test]
    fn sanitizes_model_names() {
        assert_eq!(sanitize_component("qwen2.5:7b"), "qwen2.5_7b");
        assert_eq!(sanitize_component("library/llama3:8b-instruct"), "library_llama3_8b-instruct");
        assert_eq!(sanitize_component("a  b//c"), "a_b_c");
        assert_eq!(sanitize_component("plain-name_1.0"), "plain-name_1.0");
    }

    #[test]
    fn output_file_names_keep_distinct_ids_apart() {
        assert_eq!(output_file_name("iol-2019-1__iso2"), "iol-2019-1__iso2.json");

        let colon = output_file_name("q:1");
        let slash = output_file_name("q/1");
        assert!(colon.starts_with("q_1-") && colon.ends_with(".json"));
        assert!(slash.starts_with("q_1-"));
        assert_ne!(colon, slash);
        assert_ne!(output_file_name("q_1"), colon);
        assert_eq!(output_file_name("q:1"), colon);
    }

    #[tokio::test]
    async fn ids_that_sanitize_alike_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FlakyBackend::ok());
        let examples = vec![example("q:1"), example("q/1"), example("q_1")];
        let summaries = engine(Arc::clone(&backend), dir.path())
            .run(&examples, &["m".to_string()], &NoopProgress)
            .await
            .unwrap();
        assert_eq!(summaries[0].written, 3);

        let files = std::fs::read_dir(dir.path().join("m")).unwrap().count();
        assert_eq!(files, 3);
        let done = completed_ids(&dir.path().join("m")).unwrap();
        assert_eq!(done.len(), 3);
        assert!(done.contains("q:1") && done.contains("q/1") && done.contains("q_1"));
    }

    #[tokio::test]
    async fn writes_one_file_per_example() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FlakyBackend::ok());
        let engine = engine(Arc::clone(&backend), dir.path());

        let examples = vec![example("a"), example("b"), example("c")];
        let summaries = engine
            .run(&examples, &["qwen2.5:7b".to_string()], &NoopProgress)
            .await
            .unwrap();

        assert_eq!(summaries[0].written, 3);
        let path = dir.path().join("qwen2.5_7b").join("b.json");
        let out: RunOutput = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(out.example_id, "b");
        assert_eq!(out.model, "qwen2.5:7b");
        assert_eq!(out.response, "echo: prompt for b");
        assert_eq!(out.prompt_eval_count, Some(3));
    }

    #[tokio::test]
    async fn resumes_from_existing_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let examples = vec![example("a"), example("b")];
        let models = vec!["m".to_string()];

        let first = Arc::new(FlakyBackend::ok());
        engine(Arc::clone(&first), dir.path())
            .run(&examples[..1], &models, &NoopProgress)
            .await
            .unwrap();

        let second = Arc::new(FlakyBackend::ok());
        let summaries = engine(Arc::clone(&second), dir.path())
            .run(&examples, &models, &NoopProgress)
            .await
            .unwrap();

        assert_eq!(summaries[0].skipped, 1);
        assert_eq!(summaries[0].written, 1);
        assert_eq!(*second.prompts.lock().unwrap(), vec!["prompt for b".to_string()]);
    }

    #[tokio::test]
    async fn overwrite_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let examples = vec![example("a"), example("b"), example("c")];
        let models = vec!["m".to_string()];

        engine(Arc::new(FlakyBackend::ok()), dir.path())
            .run(&examples, &models, &NoopProgress)
            .await
            .unwrap();

        let backend = Arc::new(FlakyBackend::ok());
        let engine = RunEngine::new(
            Arc::clone(&backend) as Arc<dyn ModelBackend>,
            RunEngineConfig {
                outdir: dir.path().to_path_buf(),
                overwrite: true,
                limit: Some(2),
                ..Default::default()
            },
        );
        let summaries = engine.run(&examples, &models, &NoopProgress).await.unwrap();

        assert_eq!(summaries[0].written, 2);
        assert_eq!(summaries[0].skipped, 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FlakyBackend::ok());
        let summaries = engine(Arc::clone(&backend), dir.path())
            .run(&[example("a"), example("a")], &["m".to_string()], &NoopProgress)
            .await
            .unwrap();
        assert_eq!(summaries[0].written, 1);
        assert_eq!(summaries[0].skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let backend = FlakyBackend::new(2, || ProviderError::NetworkError("reset".into()));
        let request = GenerateRequest {
            model: "m".into(),
            prompt: "hi".into(),
            options: GenerationOptions::default(),
        };
        let resp = generate_with_retry(&backend, &request, 3, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(resp.response, "echo: hi");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let backend = FlakyBackend::new(5, || ProviderError::ModelNotFound("nope".into()));
        let request = GenerateRequest {
            model: "nope".into(),
            prompt: "hi".into(),
            options: GenerationOptions::default(),
        };
        let err = generate_with_retry(&backend, &request, 3, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ProviderError>().is_some());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_count_as_failures() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FlakyBackend::new(u32::MAX, || ProviderError::Timeout(1)));
        let engine = RunEngine::new(
            Arc::clone(&backend) as Arc<dyn ModelBackend>,
            RunEngineConfig {
                outdir: dir.path().to_path_buf(),
                max_retries: 1,
                retry_delay: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let summaries = engine
            .run(&[example("a")], &["m".to_string()], &NoopProgress)
            .await
            .unwrap();
        assert_eq!(summaries[0].failed, 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(!dir.path().join("m").join("a.json").exists());
    }

    #[test]
    fn completed_ids_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.json"), r#"{"example_id": "x", "response": ""}"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let done = completed_ids(dir.path()).unwrap();
        assert_eq!(done.len(), 1);
        assert!(done.contains("x"));
    }
}
