//! Memorization-gap analysis: original accuracy minus isomorphic accuracy.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::report::{self, EvalReport};

/// Gap between an original-dataset report and an isomorphic-dataset report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapReport {
    pub original_path: String,
    pub isomorphic_path: String,
    pub models: BTreeMap<String, ModelGap>,
    /// Models present in only one of the two reports. Not written to disk.
    #[serde(skip)]
    pub excluded: Vec<ExcludedModel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelGap {
    pub original_accuracy: f64,
    pub isomorphic_accuracy: f64,
    pub accuracy_gap: f64,
    pub original_n: usize,
    pub isomorphic_n: usize,
    pub by_task_gap: BTreeMap<String, f64>,
    pub by_source_gap: BTreeMap<String, f64>,
}

/// Which side a model was missing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSide {
    Original,
    Isomorphic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedModel {
    pub model: String,
    pub missing_from: MissingSide,
}

impl std::fmt::Display for ExcludedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.missing_from {
            MissingSide::Original => "original",
            MissingSide::Isomorphic => "isomorphic",
        };
        write!(f, "{} (missing from {side} report)", self.model)
    }
}

/// Compare two evaluation reports model by model.
///
/// Only models present in both reports are compared; the rest are listed in
/// [`GapReport::excluded`]. Per-task and per-source gaps cover keys present
/// on both sides.
pub fn compute_gap(
    original: &EvalReport,
    isomorphic: &EvalReport,
    original_path: &str,
    isomorphic_path: &str,
) -> GapReport {
    let mut models = BTreeMap::new();
    let mut excluded = Vec::new();

    for (name, orig) in &original.models {
        let Some(iso) = isomorphic.models.get(name) else {
            excluded.push(ExcludedModel {
                model: name.clone(),
                missing_from: MissingSide::Isomorphic,
            });
            continue;
        };

        models.insert(
            name.clone(),
            ModelGap {
                original_accuracy: orig.accuracy,
                isomorphic_accuracy: iso.accuracy,
                accuracy_gap: orig.accuracy - iso.accuracy,
                original_n: orig.n,
                isomorphic_n: iso.n,
                by_task_gap: bucket_gap(&orig.by_task, &iso.by_task),
                by_source_gap: bucket_gap(&orig.by_source, &iso.by_source),
            },
        );
    }

    excluded.extend(
        isomorphic
            .models
            .keys()
            .filter(|name| !original.models.contains_key(*name))
            .map(|name| ExcludedModel {
                model: name.clone(),
                missing_from: MissingSide::Original,
            }),
    );

    GapReport {
        original_path: original_path.to_string(),
        isomorphic_path: isomorphic_path.to_string(),
        models,
        excluded,
    }
}

/// Load both reports from disk and compare them.
pub fn compute_gap_from_files(original: &Path, isomorphic: &Path) -> Result<GapReport> {
    let orig = EvalReport::load_json(original)?;
    let iso = EvalReport::load_json(isomorphic)?;
    Ok(compute_gap(
        &orig,
        &iso,
        &original.display().to_string(),
        &isomorphic.display().to_string(),
    ))
}

fn bucket_gap(orig: &BTreeMap<String, f64>, iso: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    orig.iter()
        .filter_map(|(k, o)| iso.get(k).map(|i| (k.clone(), o - i)))
        .collect()
}

impl GapReport {
    pub fn save_json(&self, path: &Path) -> Result<()> {
        report::save_json(self, path)
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        report::load_json(path)
    }

    /// Plain-text summary, one line per model.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "original:   {}\nisomorphic: {}\n\n",
            self.original_path, self.isomorphic_path
        ));
        if self.models.is_empty() {
            out.push_str("No models in common.\n");
        }
        for (name, gap) in &self.models {
            out.push_str(&format!(
                "{name}: original {:.1}% (n={}), isomorphic {:.1}% (n={}), gap {:+.1} pts\n",
                gap.original_accuracy * 100.0,
                gap.original_n,
                gap.isomorphic_accuracy * 100.0,
                gap.isomorphic_n,
                gap.accuracy_gap * 100.0
            ));
            for (task, delta) in &gap.by_task_gap {
                out.push_str(&format!("  task {task}: {:+.1} pts\n", delta * 100.0));
            }
            for (source, delta) in &gap.by_source_gap {
                out.push_str(&format!("  source {source}: {:+.1} pts\n", delta * 100.0));
            }
        }
        out
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!(
            "**Memorization gap:** {} models compared, {} excluded\n\n",
            self.models.len(),
            self.excluded.len()
        ));

        if !self.models.is_empty() {
            md.push_str("| Model | Original | Isomorphic | Gap | n (orig/iso) |\n");
            md.push_str("|-------|----------|------------|-----|--------------|\n");
            for (name, gap) in &self.models {
                md.push_str(&format!(
                    "| {} | {:.1}% | {:.1}% | {:+.1}% | {}/{} |\n",
                    name,
                    gap.original_accuracy * 100.0,
                    gap.isomorphic_accuracy * 100.0,
                    gap.accuracy_gap * 100.0,
                    gap.original_n,
                    gap.isomorphic_n
                ));
            }
            md.push('\n');
        }

        let with_tasks: Vec<_> = self
            .models
            .iter()
            .filter(|(_, g)| !g.by_task_gap.is_empty())
            .collect();
        if !with_tasks.is_empty() {
            md.push_str("### By task\n\n");
            md.push_str("| Model | Task | Gap |\n");
            md.push_str("|-------|------|-----|\n");
            for (name, gap) in with_tasks {
                for (task, delta) in &gap.by_task_gap {
                    md.push_str(&format!("| {} | {} | {:+.1}% |\n", name, task, delta * 100.0));
                }
            }
            md.push('\n');
        }

        if !self.excluded.is_empty() {
            md.push_str("### Excluded\n\n");
            for e in &self.excluded {
                md.push_str(&format!("- {e}\n"));
            }
        }

        md
    }
}
