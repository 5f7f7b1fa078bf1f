//! The `leakbench run` command.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use comfy_table::{Cell, Table};

use leakbench_core::dataset::load_examples;
use leakbench_core::engine::{RunEngine, RunProgress, RunSummary};
use leakbench_providers::config::load_config_from;
use leakbench_providers::create_backend;

/// Flags of `leakbench run`; `None` means "take it from the config".
pub struct RunArgs {
    pub dataset: PathBuf,
    pub models: Vec<String>,
    pub outdir: Option<PathBuf>,
    pub base_url: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub num_ctx: Option<u32>,
    pub seed: Option<i64>,
    pub limit: usize,
    pub overwrite: bool,
    pub parallelism: Option<usize>,
    pub config: Option<PathBuf>,
}

/// Console progress reporter.
#[derive(Default)]
struct ConsoleReporter {
    done: AtomicUsize,
    pending: AtomicUsize,
}

impl RunProgress for ConsoleReporter {
    fn on_model_start(&self, model: &str, pending: usize, skipped: usize) {
        self.done.store(0, Ordering::Relaxed);
        self.pending.store(pending, Ordering::Relaxed);
        eprintln!("\n{model}: {pending} to run, {skipped} already done");
    }

    fn on_example_complete(&self, model: &str, example_id: &str) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let pending = self.pending.load(Ordering::Relaxed);
        eprintln!("  [{done}/{pending}] {model} :: {example_id}");
    }

    fn on_example_error(&self, model: &str, example_id: &str, error: &str) {
        self.done.fetch_add(1, Ordering::Relaxed);
        eprintln!("  ERROR: {model} :: {example_id}: {error}");
    }

    fn on_model_complete(&self, summary: &RunSummary, elapsed: Duration) {
        eprintln!(
            "{}: {} written, {} skipped, {} failed ({:.1}s)",
            summary.model,
            summary.written,
            summary.skipped,
            summary.failed,
            elapsed.as_secs_f64()
        );
    }
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let models: Vec<String> = args
        .models
        .iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    anyhow::ensure!(!models.is_empty(), "at least one model is required");

    let mut config = load_config_from(args.config.as_deref())?;
    if let Some(url) = &args.base_url {
        config.set_base_url(url);
    }
    if let Some(dir) = args.outdir {
        config.output_dir = dir;
    }
    if let Some(p) = args.parallelism {
        config.parallelism = p;
    }
    if let Some(t) = args.temperature {
        config.generation.temperature = t;
    }
    if let Some(p) = args.top_p {
        config.generation.top_p = p;
    }
    if let Some(n) = args.num_ctx {
        config.generation.num_ctx = n;
    }
    if let Some(s) = args.seed {
        config.generation.seed = Some(s);
    }

    anyhow::ensure!(config.parallelism >= 1, "parallelism must be at least 1");
    anyhow::ensure!(
        (0.0..=2.0).contains(&config.generation.temperature),
        "temperature must be between 0.0 and 2.0"
    );
    anyhow::ensure!(
        (0.0..=1.0).contains(&config.generation.top_p),
        "top_p must be between 0.0 and 1.0"
    );

    let examples = load_examples(&args.dataset)?;
    let backend = create_backend(&config.backend, config.timeout())?;

    let mut engine_config = config.engine_config();
    engine_config.overwrite = args.overwrite;
    engine_config.limit = (args.limit > 0).then_some(args.limit);

    let run_count = engine_config
        .limit
        .map_or(examples.len(), |n| n.min(examples.len()));
    eprintln!(
        "leakbench v{}: {} examples x {} models via {} -> {}",
        env!("CARGO_PKG_VERSION"),
        run_count,
        models.len(),
        backend.name(),
        engine_config.outdir.display()
    );

    let engine = RunEngine::new(Arc::from(backend), engine_config);
    let reporter = ConsoleReporter::default();
    let summaries = engine.run(&examples, &models, &reporter).await?;

    print_summary(&summaries);

    let failed: usize = summaries.iter().map(|s| s.failed).sum();
    if failed > 0 {
        eprintln!("{failed} example(s) failed; rerun the same command to retry them.");
    }
    Ok(())
}

fn print_summary(summaries: &[RunSummary]) {
    let mut table = Table::new();
    table.set_header(vec!["Model", "Written", "Skipped", "Failed"]);

    for s in summaries {
        table.add_row(vec![
            Cell::new(&s.model),
            Cell::new(s.written),
            Cell::new(s.skipped),
            Cell::new(s.failed),
        ]);
    }

    eprintln!("\n{table}");
}
