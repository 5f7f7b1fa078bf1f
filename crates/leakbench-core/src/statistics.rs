//! Running score statistics.
//!
//! Accumulators only keep a sum and a count, so partial results computed in
//! any order (or on different workers) can be merged into the same totals.

use std::collections::BTreeMap;

use crate::model::Example;
use crate::prediction::Prediction;
use crate::report::{ExampleDetail, ModelReport};
use crate::scoring::ScoreResult;

/// Sum and count of scores.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeanAccumulator {
    sum: f64,
    count: usize,
}

impl MeanAccumulator {
    pub fn add(&mut self, score: f64) {
        self.sum += score;
        self.count += 1;
    }

    pub fn merge(&mut self, other: &MeanAccumulator) {
        self.sum += other.sum;
        self.count += other.count;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean score; `0.0` for an empty accumulator.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Everything tracked for one model while evaluating its outputs.
#[derive(Debug, Clone, Default)]
pub struct ModelAccumulator {
    overall: MeanAccumulator,
    by_task: BTreeMap<String, MeanAccumulator>,
    by_source: BTreeMap<String, MeanAccumulator>,
    by_year: BTreeMap<String, MeanAccumulator>,
    details: Option<Vec<ExampleDetail>>,
}

impl ModelAccumulator {
    /// An accumulator that also keeps per-example detail records.
    pub fn with_details() -> Self {
        Self {
            details: Some(Vec::new()),
            ..Default::default()
        }
    }

    /// Record one scored example. Buckets are created on first use.
    pub fn record(&mut self, example: &Example, pred: &Prediction, result: &ScoreResult) {
        let score = result.score;
        self.overall.add(score);
        self.by_task
            .entry(example.task_type.to_string())
            .or_default()
            .add(score);
        self.by_source
            .entry(example.source.clone())
            .or_default()
            .add(score);
        self.by_year
            .entry(example.year_bucket())
            .or_default()
            .add(score);

        if let Some(details) = &mut self.details {
            details.push(ExampleDetail {
                id: example.id.clone(),
                source: example.source.clone(),
                year: example.year,
                task_type: example.task_type.to_string(),
                score,
                parse: pred.to_value(),
                info: result.info.clone(),
            });
        }
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: ModelAccumulator) {
        self.overall.merge(&other.overall);
        merge_buckets(&mut self.by_task, &other.by_task);
        merge_buckets(&mut self.by_source, &other.by_source);
        merge_buckets(&mut self.by_year, &other.by_year);
        match (&mut self.details, other.details) {
            (Some(mine), Some(theirs)) => mine.extend(theirs),
            (None, Some(theirs)) => self.details = Some(theirs),
            _ => {}
        }
    }

    pub fn count(&self) -> usize {
        self.overall.count()
    }

    pub fn finish(self) -> ModelReport {
        ModelReport {
            n: self.overall.count(),
            accuracy: self.overall.mean(),
            by_task: means(&self.by_task),
            by_source: means(&self.by_source),
            by_year: means(&self.by_year),
            details: self.details,
        }
    }
}

fn merge_buckets(into: &mut BTreeMap<String, MeanAccumulator>, from: &BTreeMap<String, MeanAccumulator>) {
    for (key, acc) in from {
        into.entry(key.clone()).or_default().merge(acc);
    }
}

fn means(buckets: &BTreeMap<String, MeanAccumulator>) -> BTreeMap<String, f64> {
    buckets.iter().map(|(k, acc)| (k.clone(), acc.mean())).collect()
}
