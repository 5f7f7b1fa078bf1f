//! Core data model types for leakbench.
//!
//! An [`Example`] is one auto-gradable question. Its [`OutputSpec`] selects the
//! grading strategy used by [`crate::prediction`] and [`crate::scoring`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of question. Closed set; anything else is rejected at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Matching,
    Mcq,
    ShortText,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Matching => "matching",
            TaskType::Mcq => "mcq",
            TaskType::ShortText => "short_text",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matching" => Ok(TaskType::Matching),
            "mcq" => Ok(TaskType::Mcq),
            "short_text" => Ok(TaskType::ShortText),
            other => Err(format!("unknown task_type: {other}")),
        }
    }
}

/// Normalization switches for `short_text` grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextOptions {
    /// Lower-case both sides before comparing.
    pub lower: bool,
    /// Drop every character that is neither a word character nor whitespace.
    pub strip_punct: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            lower: true,
            strip_punct: false,
        }
    }
}

/// Grading configuration attached to an example, discriminated by `type`.
///
/// Types other than the three known ones are kept verbatim in
/// [`OutputSpec::Unrecognized`] and graded with the fallback strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum OutputSpec {
    /// Gold is a string→string mapping. `keys` restricts the compared keys.
    JsonMapping { keys: Option<Vec<String>> },
    /// Gold is a single letter. `allowed` defaults to A through Z.
    McqLetter { allowed: Option<BTreeSet<char>> },
    /// Gold is a string or a list of acceptable strings.
    ShortText(TextOptions),
    /// Any other `type` (or none at all); the raw object is preserved.
    Unrecognized(Map<String, Value>),
}

impl OutputSpec {
    /// The `type` tag as written in the dataset.
    pub fn kind(&self) -> &str {
        match self {
            OutputSpec::JsonMapping { .. } => "json_mapping",
            OutputSpec::McqLetter { .. } => "mcq_letter",
            OutputSpec::ShortText(_) => "short_text",
            OutputSpec::Unrecognized(raw) => raw.get("type").and_then(Value::as_str).unwrap_or(""),
        }
    }

    /// Whether `letter` is accepted by an `mcq_letter` spec.
    pub fn allows_letter(&self, letter: char) -> bool {
        match self {
            OutputSpec::McqLetter {
                allowed: Some(allowed),
            } => allowed.contains(&letter),
            _ => letter.is_ascii_uppercase(),
        }
    }

    /// Parse an `output_spec` object. The error is a human-readable reason.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(raw) = value else {
            return Err("output_spec must be an object".into());
        };

        match raw.get("type").and_then(Value::as_str) {
            Some("json_mapping") => {
                let keys = match raw.get("keys") {
                    None | Some(Value::Null) => None,
                    Some(Value::Array(items)) => Some(
                        items
                            .iter()
                            .map(|k| match k {
                                Value::String(s) => Ok(s.clone()),
                                Value::Number(n) => Ok(n.to_string()),
                                other => Err(format!("keys entries must be strings, got {other}")),
                            })
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                    Some(other) => return Err(format!("keys must be a list, got {other}")),
                };
                Ok(OutputSpec::JsonMapping { keys })
            }
            Some("mcq_letter") => {
                let allowed = match raw.get("allowed") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(parse_letters(s.chars())?),
                    Some(Value::Array(items)) => {
                        let mut letters = Vec::with_capacity(items.len());
                        for item in items {
                            let mut chars = item.as_str().map(str::chars).ok_or_else(|| {
                                format!("allowed entries must be letters, got {item}")
                            })?;
                            match (chars.next(), chars.next()) {
                                (Some(c), None) => letters.push(c),
                                _ => return Err(format!("allowed entries must be single letters, got {item}")),
                            }
                        }
                        Some(parse_letters(letters.into_iter())?)
                    }
                    Some(other) => return Err(format!("allowed must be a list of letters, got {other}")),
                };
                Ok(OutputSpec::McqLetter { allowed })
            }
            Some("short_text") => {
                let defaults = TextOptions::default();
                Ok(OutputSpec::ShortText(TextOptions {
                    lower: bool_field(&raw, "lower", defaults.lower)?,
                    strip_punct: bool_field(&raw, "strip_punct", defaults.strip_punct)?,
                }))
            }
            _ => Ok(OutputSpec::Unrecognized(raw)),
        }
    }
}

fn parse_letters(chars: impl Iterator<Item = char>) -> Result<BTreeSet<char>, String> {
    chars
        .map(|c| {
            if c.is_ascii_alphabetic() {
                Ok(c.to_ascii_uppercase())
            } else {
                Err(format!("'{c}' is not a letter"))
            }
        })
        .collect()
}

fn bool_field(raw: &Map<String, Value>, name: &str, default: bool) -> Result<bool, String> {
    match raw.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(format!("{name} must be a boolean, got {other}")),
    }
}

impl TryFrom<Value> for OutputSpec {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        OutputSpec::from_value(value)
    }
}

impl From<OutputSpec> for Value {
    fn from(spec: OutputSpec) -> Self {
        let mut out = Map::new();
        match spec {
            OutputSpec::JsonMapping { keys } => {
                out.insert("type".into(), "json_mapping".into());
                if let Some(keys) = keys {
                    out.insert("keys".into(), keys.into());
                }
            }
            OutputSpec::McqLetter { allowed } => {
                out.insert("type".into(), "mcq_letter".into());
                if let Some(allowed) = allowed {
                    let letters: Vec<Value> =
                        allowed.into_iter().map(|c| Value::String(c.to_string())).collect();
                    out.insert("allowed".into(), Value::Array(letters));
                }
            }
            OutputSpec::ShortText(opts) => {
                out.insert("type".into(), "short_text".into());
                out.insert("lower".into(), opts.lower.into());
                out.insert("strip_punct".into(), opts.strip_punct.into());
            }
            OutputSpec::Unrecognized(raw) => return Value::Object(raw),
        }
        Value::Object(out)
    }
}

/// One auto-gradable question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Unique key, stable across pipeline stages.
    pub id: String,
    /// Competition or origin code.
    pub source: String,
    /// Year of the competition, when known.
    pub year: Option<i64>,
    pub task_type: TaskType,
    /// Text shown to the model.
    pub prompt: String,
    /// Gold value; its shape depends on `output_spec`.
    pub answer: Value,
    pub output_spec: OutputSpec,
    /// Free-form auxiliary data (span annotations, variant provenance).
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Example {
    /// Aggregation bucket for `year`: the year as a string, or `"unknown"`.
    pub fn year_bucket(&self) -> String {
        self.year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Id of the original example if this record is an isomorphic variant.
    pub fn iso_of(&self) -> Option<&str> {
        self.meta.get("iso_of").and_then(Value::as_str)
    }
}
