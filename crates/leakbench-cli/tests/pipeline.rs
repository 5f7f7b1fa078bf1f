//! Offline end-to-end pipeline: variants, run, eval, gap.
//!
//! The mock backend only recognizes the original language names, so it
//! stands in for a model that memorized the original questions.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use leakbench_core::dataset::{example_from_record, write_jsonl, Dataset};
use leakbench_core::engine::{NoopProgress, RunEngine, RunEngineConfig};
use leakbench_core::evaluate::{evaluate_run_dir, EvalOptions};
use leakbench_core::gap::compute_gap;
use leakbench_core::model::Example;
use leakbench_core::report::EvalReport;
use leakbench_core::variant::expand_with_variants;
use leakbench_providers::mock::MockBackend;

fn originals() -> Vec<Example> {
    let records = vec![
        json!({
            "id": "iol-2019-1",
            "source": "IOL",
            "year": 2019,
            "task_type": "mcq",
            "prompt": "Which Kanuri word means water?\nA. nji\nB. kam\nC. tau\nD. su",
            "answer": "A",
            "output_spec": {"type": "mcq_letter", "allowed": ["A", "B", "C", "D"]},
            "meta": {"variantable": {"spans": [{"text": "Kanuri", "kind": "l1"}]}}
        }),
        json!({
            "id": "uklo-2020-4",
            "source": "UKLO",
            "year": 2020,
            "task_type": "matching",
            "prompt": "Match the Sakha words at and ot to glosses a and b.",
            "answer": {"1": "b", "2": "a"},
            "output_spec": {"type": "json_mapping"},
            "meta": {"variantable": {"spans": [{"text": "Sakha", "kind": "l1"}]}}
        }),
    ];
    records
        .into_iter()
        .enumerate()
        .map(|(i, r)| example_from_record(i + 1, r).unwrap())
        .collect()
}

fn memorizing_backend() -> Arc<MockBackend> {
    Arc::new(
        MockBackend::new(vec![
            ("Kanuri".to_string(), "The answer is A.".to_string()),
            ("Sakha".to_string(), r#"{"1": "b", "2": "a"}"#.to_string()),
        ])
        .with_default("I am not sure."),
    )
}

async fn run_and_eval(
    backend: Arc<MockBackend>,
    examples: Vec<Example>,
    dataset_path: &Path,
    rundir: &Path,
) -> EvalReport {
    write_jsonl(dataset_path, &examples).unwrap();

    let engine = RunEngine::new(
        backend,
        RunEngineConfig {
            outdir: rundir.to_path_buf(),
            parallelism: 2,
            ..Default::default()
        },
    );
    let summaries = engine
        .run(&examples, &["mock:latest".to_string()], &NoopProgress)
        .await
        .unwrap();
    assert_eq!(summaries[0].written, examples.len());
    assert_eq!(summaries[0].failed, 0);

    let dataset = Dataset::load(dataset_path).unwrap();
    evaluate_run_dir(&dataset, dataset_path, rundir, EvalOptions::default()).unwrap()
}

#[tokio::test]
async fn memorized_originals_show_a_gap() {
    let dir = TempDir::new().unwrap();
    let backend = memorizing_backend();

    let orig = run_and_eval(
        backend.clone(),
        originals(),
        &dir.path().join("orig.jsonl"),
        &dir.path().join("runs/orig"),
    )
    .await;
    let orig_model = &orig.models["mock_latest"];
    assert_eq!(orig_model.n, 2);
    assert_eq!(orig_model.accuracy, 1.0);

    let expanded = expand_with_variants(&originals(), 2);
    assert_eq!(expanded.len(), 6);
    let iso = run_and_eval(
        backend.clone(),
        expanded,
        &dir.path().join("iso.jsonl"),
        &dir.path().join("runs/iso"),
    )
    .await;
    let iso_model = &iso.models["mock_latest"];
    assert_eq!(iso_model.n, 6);
    assert!((iso_model.accuracy - 2.0 / 6.0).abs() < 1e-9);
    assert_eq!(backend.call_count(), 8);

    let gap = compute_gap(&orig, &iso, "orig.json", "iso.json");
    assert!(gap.excluded.is_empty());
    let model_gap = &gap.models["mock_latest"];
    assert!((model_gap.accuracy_gap - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(model_gap.original_n, 2);
    assert_eq!(model_gap.isomorphic_n, 6);
    assert!(model_gap.by_task_gap["mcq"] > 0.0);
    assert!(model_gap.by_task_gap["matching"] > 0.0);
}

#[tokio::test]
async fn rerun_resumes_without_calling_backend() {
    let dir = TempDir::new().unwrap();
    let dataset_path = dir.path().join("orig.jsonl");
    let rundir = dir.path().join("runs");

    let first = run_and_eval(memorizing_backend(), originals(), &dataset_path, &rundir).await;

    let backend = memorizing_backend();
    let engine = RunEngine::new(
        backend.clone(),
        RunEngineConfig {
            outdir: rundir.clone(),
            ..Default::default()
        },
    );
    let summaries = engine
        .run(&originals(), &["mock:latest".to_string()], &NoopProgress)
        .await
        .unwrap();
    assert_eq!(summaries[0].written, 0);
    assert_eq!(summaries[0].skipped, 2);
    assert_eq!(backend.call_count(), 0);

    let dataset = Dataset::load(&dataset_path).unwrap();
    let second = evaluate_run_dir(&dataset, &dataset_path, &rundir, EvalOptions::default()).unwrap();
    assert_eq!(first.models, second.models);
}
