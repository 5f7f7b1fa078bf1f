//! Scoring canonical predictions against gold answers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ScoreError;
use crate::model::{Example, OutputSpec};
use crate::prediction::{normalize_text, Prediction};

/// Maximum number of mismatched keys recorded for a mapping answer.
pub const MAX_MISMATCHES: usize = 20;
/// Maximum number of acceptable answers echoed back on a `short_text` miss.
pub const MAX_GOLD_SAMPLES: usize = 10;

/// Why a prediction scored zero without being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PredNotDict,
    NoLetter,
    Empty,
}

/// One key where the predicted mapping disagrees with the gold mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMismatch {
    pub key: String,
    pub gold: Option<String>,
    pub pred: Option<String>,
}

/// Diagnostics attached to a score. Only the fields relevant to the
/// strategy that produced the score are set; a perfect score has none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mismatches: Option<Vec<KeyMismatch>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_any: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pred: Option<Value>,
}

impl ScoreInfo {
    fn failed(reason: FailureReason) -> Self {
        Self {
            reason: Some(reason),
            ..Default::default()
        }
    }

    fn disagreement(gold: Value, pred: Value) -> Self {
        Self {
            gold: Some(gold),
            pred: Some(pred),
            ..Default::default()
        }
    }
}

/// A score in `[0, 1]` plus diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub score: f64,
    pub info: ScoreInfo,
}

impl ScoreResult {
    fn new(score: f64, info: ScoreInfo) -> Self {
        Self { score, info }
    }

    fn hit() -> Self {
        Self::new(1.0, ScoreInfo::default())
    }
}

/// Score a parsed prediction against the example's gold answer.
///
/// The only error is a `json_mapping` example whose gold is not a mapping.
pub fn score_example(example: &Example, pred: &Prediction) -> Result<ScoreResult, ScoreError> {
    let gold = &example.answer;

    match &example.output_spec {
        OutputSpec::JsonMapping { keys } => {
            let Value::Object(gold_map) = gold else {
                return Err(ScoreError::GoldNotMapping {
                    id: example.id.clone(),
                });
            };
            let Prediction::Mapping(pred_map) = pred else {
                return Ok(ScoreResult::new(0.0, ScoreInfo::failed(FailureReason::PredNotDict)));
            };

            let keys: Vec<&str> = match keys {
                Some(keys) if !keys.is_empty() => keys.iter().map(String::as_str).collect(),
                _ => gold_map.keys().map(String::as_str).collect(),
            };

            let mut correct = 0usize;
            let mut mismatches = Vec::new();
            for &key in &keys {
                let gv = gold_map.get(key).and_then(value_text);
                let pv = pred_map.get(key).and_then(value_text);
                match (&gv, &pv) {
                    (Some(g), Some(p)) if g == p => correct += 1,
                    _ => mismatches.push(KeyMismatch {
                        key: key.to_string(),
                        gold: gv,
                        pred: pv,
                    }),
                }
            }

            let total = keys.len();
            let score = if total == 0 {
                0.0
            } else {
                correct as f64 / total as f64
            };
            mismatches.truncate(MAX_MISMATCHES);

            Ok(ScoreResult::new(
                score,
                ScoreInfo {
                    correct: Some(correct),
                    total: Some(total),
                    mismatches: Some(mismatches),
                    ..Default::default()
                },
            ))
        }

        OutputSpec::McqLetter { .. } => {
            let Some(pv) = pred.as_text() else {
                return Ok(ScoreResult::new(0.0, ScoreInfo::failed(FailureReason::NoLetter)));
            };
            let gv = value_text(gold).unwrap_or_default().to_uppercase();
            let pv = pv.trim().to_uppercase();
            if pv == gv {
                Ok(ScoreResult::hit())
            } else {
                Ok(ScoreResult::new(
                    0.0,
                    ScoreInfo::disagreement(Value::String(gv), Value::String(pv)),
                ))
            }
        }

        OutputSpec::ShortText(opts) => {
            let Some(pv) = pred.as_text() else {
                return Ok(ScoreResult::new(0.0, ScoreInfo::failed(FailureReason::Empty)));
            };
            let pv = normalize_text(&pv, *opts);

            match gold {
                Value::Array(items) => {
                    let acceptable: BTreeSet<String> = items
                        .iter()
                        .map(|g| normalize_text(&display_value(g), *opts))
                        .collect();
                    if acceptable.contains(&pv) {
                        Ok(ScoreResult::hit())
                    } else {
                        Ok(ScoreResult::new(
                            0.0,
                            ScoreInfo {
                                gold_any: Some(
                                    acceptable.into_iter().take(MAX_GOLD_SAMPLES).collect(),
                                ),
                                pred: Some(Value::String(pv)),
                                ..Default::default()
                            },
                        ))
                    }
                }
                scalar => {
                    let gv = normalize_text(&display_value(scalar), *opts);
                    if pv == gv {
                        Ok(ScoreResult::hit())
                    } else {
                        Ok(ScoreResult::new(
                            0.0,
                            ScoreInfo::disagreement(Value::String(gv), Value::String(pv)),
                        ))
                    }
                }
            }
        }

        OutputSpec::Unrecognized(_) => {
            let pv = pred.to_value();
            if &pv == gold {
                Ok(ScoreResult::hit())
            } else {
                Ok(ScoreResult::new(0.0, ScoreInfo::disagreement(gold.clone(), pv)))
            }
        }
    }
}

/// Trimmed string form of a mapping value; `null` counts as absent.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(display_value(other).trim().to_string()),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
