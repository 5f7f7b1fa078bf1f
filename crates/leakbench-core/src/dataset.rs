//! JSONL dataset loader and validator.
//!
//! Loading is strict: the first malformed record aborts the whole load, since
//! every downstream statistic assumes a fully valid dataset. Softer problems
//! are reported separately by [`validate_dataset`].

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::DatasetError;
use crate::model::{Example, OutputSpec, TaskType};

const REQUIRED_FIELDS: [&str; 6] = ["id", "source", "task_type", "prompt", "answer", "output_spec"];

/// Read newline-delimited JSON records, skipping blank lines.
pub fn read_jsonl(path: &Path) -> Result<Vec<Value>, DatasetError> {
    Ok(read_numbered(path)?.into_iter().map(|(_, v)| v).collect())
}

fn read_numbered(path: &Path) -> Result<Vec<(usize, Value)>, DatasetError> {
    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|source| DatasetError::InvalidJson {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        records.push((idx + 1, value));
    }
    Ok(records)
}

/// Write rows as newline-delimited JSON, creating parent directories.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = std::io::BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut out, row).context("failed to serialize record")?;
        out.write_all(b"\n")?;
    }
    out.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Load and validate every example in a JSONL file.
pub fn load_examples(path: &Path) -> Result<Vec<Example>, DatasetError> {
    read_numbered(path)?
        .into_iter()
        .map(|(line, record)| example_from_record(line, record))
        .collect()
}

/// A validated example together with the record it was read from.
///
/// The raw object keeps fields the typed model drops (unknown keys, the
/// original spelling of `year` and `output_spec`), so tools that rewrite a
/// dataset can emit records unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    pub raw: Map<String, Value>,
    pub example: Example,
}

/// Load every record in a JSONL file, validating each one like
/// [`load_examples`] but keeping the raw object alongside.
pub fn load_records(path: &Path) -> Result<Vec<DatasetRecord>, DatasetError> {
    read_numbered(path)?
        .into_iter()
        .map(|(line, record)| {
            let raw = match &record {
                Value::Object(map) => map.clone(),
                _ => return Err(DatasetError::NotAnObject { line }),
            };
            let example = example_from_record(line, record)?;
            Ok(DatasetRecord { raw, example })
        })
        .collect()
}

/// Build an [`Example`] from one raw record.
///
/// `line` is only used for records that are not objects at all; every other
/// error names the record id.
pub fn example_from_record(line: usize, record: Value) -> Result<Example, DatasetError> {
    let Value::Object(mut row) = record else {
        return Err(DatasetError::NotAnObject { line });
    };

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|k| !row.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        let id = row
            .get("id")
            .and_then(scalar_to_string)
            .unwrap_or_else(|| "<no id>".to_string());
        return Err(DatasetError::MissingFields { id, fields: missing });
    }

    let id = match row.get("id").and_then(scalar_to_string) {
        Some(id) => id,
        None => {
            return Err(DatasetError::InvalidField {
                id: "<no id>".into(),
                field: "id",
                reason: format!("expected a string, got {}", row["id"]),
            })
        }
    };
    let invalid = |field: &'static str, reason: String| DatasetError::InvalidField {
        id: id.clone(),
        field,
        reason,
    };

    let source = row
        .get("source")
        .and_then(scalar_to_string)
        .ok_or_else(|| invalid("source", format!("expected a string, got {}", row["source"])))?;

    let task_type = match &row["task_type"] {
        Value::String(s) => s.parse::<TaskType>().map_err(|_| DatasetError::UnknownTaskType {
            id: id.clone(),
            value: s.clone(),
        })?,
        other => return Err(invalid("task_type", format!("expected a string, got {other}"))),
    };

    let prompt = match row.remove("prompt") {
        Some(Value::String(s)) => s,
        other => {
            return Err(invalid(
                "prompt",
                format!("expected a string, got {}", other.unwrap_or(Value::Null)),
            ))
        }
    };

    let year = match row.get("year") {
        None | Some(Value::Null) => None,
        Some(value) => Some(coerce_year(value).ok_or_else(|| {
            invalid("year", format!("{value} is not an integer"))
        })?),
    };

    let output_spec = OutputSpec::from_value(row.remove("output_spec").unwrap_or(Value::Null))
        .map_err(|reason| invalid("output_spec", reason))?;

    let meta = match row.remove("meta") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(meta)) => meta,
        Some(other) => return Err(invalid("meta", format!("must be an object, got {other}"))),
    };

    let answer = row.remove("answer").unwrap_or(Value::Null);

    Ok(Example {
        id,
        source,
        year,
        task_type,
        prompt,
        answer,
        output_spec,
        meta,
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn single_letter(s: &str) -> Option<char> {
    let mut chars = s.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}

fn coerce_year(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A loaded dataset with an id index.
///
/// When ids repeat, lookups resolve to the last record with that id.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    examples: Vec<Example>,
    index: HashMap<String, usize>,
}

impl Dataset {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        Ok(Self::from_examples(load_examples(path)?))
    }

    pub fn from_examples(examples: Vec<Example>) -> Self {
        let index = examples
            .iter()
            .enumerate()
            .map(|(i, ex)| (ex.id.clone(), i))
            .collect();
        Self { examples, index }
    }

    pub fn get(&self, id: &str) -> Option<&Example> {
        self.index.get(id).map(|&i| &self.examples[i])
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

/// A non-fatal problem found in a loaded dataset.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The example id (if applicable).
    pub example_id: Option<String>,
    /// Warning message.
    pub message: String,
}

/// Check a dataset for problems that do not prevent loading.
pub fn validate_dataset(examples: &[Example]) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let warn = |id: &str, message: String| ValidationWarning {
        example_id: Some(id.to_string()),
        message,
    };

    let mut seen_ids = HashSet::new();
    for ex in examples {
        if !seen_ids.insert(ex.id.as_str()) {
            warnings.push(warn(&ex.id, format!("duplicate example ID: {}", ex.id)));
        }
    }

    for ex in examples {
        if ex.prompt.trim().is_empty() {
            warnings.push(warn(&ex.id, "prompt is empty".into()));
        }

        match &ex.output_spec {
            OutputSpec::JsonMapping { .. } if !ex.answer.is_object() => {
                warnings.push(warn(&ex.id, "json_mapping gold answer is not a mapping".into()));
            }
            spec @ OutputSpec::McqLetter { .. } => {
                let gold = ex.answer.as_str().and_then(single_letter);
                if !gold.is_some_and(|c| spec.allows_letter(c)) {
                    warnings.push(warn(
                        &ex.id,
                        format!("mcq_letter gold {} is not an allowed letter", ex.answer),
                    ));
                }
            }
            OutputSpec::Unrecognized(_) => {
                warnings.push(warn(
                    &ex.id,
                    format!(
                        "output_spec type '{}' is not recognized; strict equality will be used",
                        ex.output_spec.kind()
                    ),
                ));
            }
            _ => {}
        }

        if let Some(orig) = ex.iso_of() {
            if !seen_ids.contains(orig) {
                warnings.push(warn(
                    &ex.id,
                    format!("variant of '{orig}' which is not in the dataset"),
                ));
            }
        }
    }

    warnings
}
