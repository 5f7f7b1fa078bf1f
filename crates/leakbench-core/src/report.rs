//! Evaluation report types with JSON persistence.
//!
//! Reports are read back leniently: missing or non-numeric accuracy fields
//! load as `0.0` and missing maps load as empty, so a hand-edited or older
//! report still feeds the gap analyzer.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::scoring::ScoreInfo;

/// Top-level output of the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    /// Path of the dataset that was scored.
    #[serde(default)]
    pub dataset: String,
    /// Root directory of the per-model outputs.
    #[serde(default)]
    pub rundir: String,
    /// One entry per model subdirectory.
    #[serde(default)]
    pub models: BTreeMap<String, ModelReport>,
}

/// Aggregate scores for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    #[serde(default, deserialize_with = "lenient_count")]
    pub n: usize,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub accuracy: f64,
    #[serde(default, deserialize_with = "lenient_map")]
    pub by_task: BTreeMap<String, f64>,
    #[serde(default, deserialize_with = "lenient_map")]
    pub by_source: BTreeMap<String, f64>,
    #[serde(default, deserialize_with = "lenient_map")]
    pub by_year: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ExampleDetail>>,
}

/// Per-example record kept in detail mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleDetail {
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub year: Option<i64>,
    #[serde(default)]
    pub task_type: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: f64,
    /// Parsed prediction, `null` when nothing was extracted.
    #[serde(default)]
    pub parse: Value,
    #[serde(default)]
    pub info: ScoreInfo,
}

impl EvalReport {
    pub fn save_json(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

/// Write any serializable report as pretty JSON, creating parent directories.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read report from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse report JSON in {}", path.display()))
}

/// Best-effort numeric reading of a JSON value; anything unusable is `0.0`.
pub fn value_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_f64(&value))
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let n = value_to_f64(&value);
    Ok(if n > 0.0 { n as usize } else { 0 })
}

fn lenient_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), value_to_f64(v))).collect(),
        _ => BTreeMap::new(),
    })
}
