//! Evaluator: scores stored model outputs against a dataset.
//!
//! The run directory holds one subdirectory per model and one
//! [`RunOutput`] JSON file per answered example. Subdirectories and files
//! are visited in name order so reports are reproducible. A model's files are
//! split into contiguous chunks scored on scoped threads; the partial
//! accumulators are merged back in chunk order.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::dataset::Dataset;
use crate::prediction::parse_prediction;
use crate::report::{EvalReport, ModelReport};
use crate::scoring::score_example;
use crate::statistics::ModelAccumulator;
use crate::traits::RunOutput;

#[derive(Debug, Clone, Copy, Default)]
pub struct EvalOptions {
    /// Keep one detail record per scored example.
    pub include_details: bool,
}

/// Evaluate every model subdirectory of `rundir`.
///
/// Outputs whose `example_id` is not in the dataset are skipped silently.
/// Unreadable output files are skipped with a warning. A gold answer that
/// cannot be scored aborts the evaluation.
pub fn evaluate_run_dir(
    dataset: &Dataset,
    dataset_path: &Path,
    rundir: &Path,
    options: EvalOptions,
) -> Result<EvalReport> {
    let mut report = EvalReport {
        dataset: dataset_path.display().to_string(),
        rundir: rundir.display().to_string(),
        ..Default::default()
    };

    for model_dir in sorted_entries(rundir, |p| p.is_dir())? {
        let Some(name) = model_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let model_report = evaluate_model_dir(dataset, &model_dir, options)?;
        tracing::info!(
            model = name,
            n = model_report.n,
            accuracy = model_report.accuracy,
            "evaluated model"
        );
        report.models.insert(name.to_string(), model_report);
    }

    Ok(report)
}

/// Score one model's outputs.
pub fn evaluate_model_dir(dataset: &Dataset, model_dir: &Path, options: EvalOptions) -> Result<ModelReport> {
    let files = sorted_entries(model_dir, |p| {
        p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json")
    })?;

    let workers = std::thread::available_parallelism().map_or(1, |n| n.get());
    let chunk_size = files.len().div_ceil(workers).max(1);

    let partials: Vec<Result<ModelAccumulator>> = std::thread::scope(|scope| {
        let handles: Vec<_> = files
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || score_files(dataset, chunk, options)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("evaluation worker panicked")))
            })
            .collect()
    });

    let mut acc = new_accumulator(options);
    for partial in partials {
        let partial = partial?;
        tracing::debug!(scored = partial.count(), "merging evaluation chunk");
        acc.merge(partial);
    }
    Ok(acc.finish())
}

fn new_accumulator(options: EvalOptions) -> ModelAccumulator {
    if options.include_details {
        ModelAccumulator::with_details()
    } else {
        ModelAccumulator::default()
    }
}

fn score_files(dataset: &Dataset, files: &[PathBuf], options: EvalOptions) -> Result<ModelAccumulator> {
    let mut acc = new_accumulator(options);
    for path in files {
        let output = match read_output(path) {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!("skipping {}: {e:#}", path.display());
                continue;
            }
        };
        let Some(example) = dataset.get(&output.example_id) else {
            tracing::debug!("no example {} in dataset, skipping", output.example_id);
            continue;
        };

        let pred = parse_prediction(&example.output_spec, &output.response);
        let result = score_example(example, &pred)?;
        acc.record(example, &pred, &result);
    }
    Ok(acc)
}

fn read_output(path: &Path) -> Result<RunOutput> {
    let content = std::fs::read_to_string(path).context("failed to read output file")?;
    serde_json::from_str(&content).context("invalid output file")
}

fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("failed to list {}", dir.display()))?.path();
        if keep(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Example, OutputSpec, TaskType, TextOptions};
    use serde_json::{json, Map, Value};

    fn example(id: &str, task_type: TaskType, answer: Value, year: Option<i64>) -> Example {
        let output_spec = match task_type {
            TaskType::Matching => OutputSpec::JsonMapping { keys: None },
            TaskType::Mcq => OutputSpec::McqLetter { allowed: None },
            TaskType::ShortText => OutputSpec::ShortText(TextOptions::default()),
        };
        Example {
            id: id.into(),
            source: "IOL".into(),
            year,
            task_type,
            prompt: "p".into(),
            answer,
            output_spec,
            meta: Map::new(),
        }
    }

    fn write_output(dir: &Path, model: &str, id: &str, response: &str) {
        let model_dir = dir.join(model);
        std::fs::create_dir_all(&model_dir).unwrap();
        let body = json!({"example_id": id, "model": model, "response": response});
        std::fs::write(model_dir.join(format!("{id}.json")), body.to_string()).unwrap();
    }

    fn dataset() -> Dataset {
        Dataset::from_examples(vec![
            example("m1", TaskType::Mcq, json!("B"), Some(2019)),
            example("j1", TaskType::Matching, json!({"1": "a", "2": "b"}), Some(2019)),
            example("t1", TaskType::ShortText, json!(["cat", "kitty"]), None),
        ])
    }

    #[test]
    fn evaluates_each_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_output(dir.path(), "alpha", "m1", "The answer is B.");
        write_output(dir.path(), "alpha", "j1", "{\"1\": \"a\", \"2\": \"x\"}");
        write_output(dir.path(), "alpha", "t1", "  Kitty ");
        write_output(dir.path(), "beta", "m1", "no idea");

        let report = evaluate_run_dir(&dataset(), Path::new("d.jsonl"), dir.path(), EvalOptions::default())
            .unwrap();

        assert_eq!(report.dataset, "d.jsonl");
        assert_eq!(report.models.keys().collect::<Vec<_>>(), vec!["alpha", "beta"]);

        let alpha = &report.models["alpha"];
        assert_eq!(alpha.n, 3);
        assert!((alpha.accuracy - 2.5 / 3.0).abs() < 1e-9);
        assert_eq!(alpha.by_task["matching"], 0.5);
        assert_eq!(alpha.by_year["2019"], 0.75);
        assert_eq!(alpha.by_year["unknown"], 1.0);
        assert!(alpha.details.is_none());

        let beta = &report.models["beta"];
        assert_eq!(beta.n, 1);
        assert_eq!(beta.accuracy, 0.0);
    }

    #[test]
    fn unknown_ids_and_bad_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_output(dir.path(), "alpha", "m1", "B");
        write_output(dir.path(), "alpha", "removed", "B");
        std::fs::write(dir.path().join("alpha").join("junk.json"), "{oops").unwrap();
        std::fs::write(dir.path().join("alpha").join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("stray.json"), "{}").unwrap();

        let report = evaluate_run_dir(&dataset(), Path::new("d"), dir.path(), EvalOptions::default())
            .unwrap();
        assert_eq!(report.models.len(), 1);
        assert_eq!(report.models["alpha"].n, 1);
        assert_eq!(report.models["alpha"].accuracy, 1.0);
    }

    #[test]
    fn details_mode() {
        let dir = tempfile::tempdir().unwrap();
        write_output(dir.path(), "alpha", "j1", "nothing here");

        let report = evaluate_run_dir(
            &dataset(),
            Path::new("d"),
            dir.path(),
            EvalOptions { include_details: true },
        )
        .unwrap();

        let details = report.models["alpha"].details.as_ref().unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].id, "j1");
        assert_eq!(details[0].parse, Value::Null);
        let info = serde_json::to_value(&details[0].info).unwrap();
        assert_eq!(info["reason"], "pred_not_dict");
    }

    #[test]
    fn many_outputs_merge_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut examples = Vec::new();
        for i in 0..50 {
            let id = format!("q{i:03}");
            let year = if i % 2 == 0 { Some(2019) } else { Some(2020) };
            examples.push(example(&id, TaskType::Mcq, json!("B"), year));
            let response = if i % 5 == 0 { "A" } else { "B" };
            write_output(dir.path(), "alpha", &id, response);
        }
        let ds = Dataset::from_examples(examples);

        let report = evaluate_run_dir(&ds, Path::new("d"), dir.path(), EvalOptions { include_details: true })
            .unwrap();
        let alpha = &report.models["alpha"];
        assert_eq!(alpha.n, 50);
        assert!((alpha.accuracy - 0.8).abs() < 1e-9);
        assert!((alpha.by_year["2019"] - 0.8).abs() < 1e-9);

        let ids: Vec<&str> = alpha
            .details
            .as_ref()
            .unwrap()
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids.len(), 50);
        assert_eq!(ids, sorted);
    }

    #[test]
    fn bad_gold_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_output(dir.path(), "alpha", "bad", "{\"1\": \"a\"}");
        let ds = Dataset::from_examples(vec![example("bad", TaskType::Matching, json!("a"), None)]);

        let err = evaluate_run_dir(&ds, Path::new("d"), dir.path(), EvalOptions::default()).unwrap_err();
        assert!(format!("{err:#}").contains("bad"));
    }

    #[test]
    fn empty_model_dir_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("idle")).unwrap();
        let report = evaluate_run_dir(&dataset(), Path::new("d"), dir.path(), EvalOptions::default())
            .unwrap();
        assert_eq!(report.models["idle"].n, 0);
        assert_eq!(report.models["idle"].accuracy, 0.0);
        assert!(report.models["idle"].by_task.is_empty());
    }

    #[test]
    fn missing_rundir_is_an_error() {
        let err = evaluate_run_dir(
            &dataset(),
            Path::new("d"),
            Path::new("/nonexistent/rundir"),
            EvalOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rundir"));
    }
}
