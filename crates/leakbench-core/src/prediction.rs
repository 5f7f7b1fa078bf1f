//! Parsing raw model responses into canonical predictions.
//!
//! Parsing never fails: when nothing usable is found the result is
//! [`Prediction::Missing`], which the scorer turns into a zero score with a
//! machine-readable reason.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::{OutputSpec, TextOptions};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("invalid whitespace regex"));

static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("invalid punctuation regex"));

// Matched against upper-cased text.
static ANSWER_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bANSWER(?:\s+IS)?\s*[:=]?\s*\(?([A-Z])\b").expect("invalid answer marker regex")
});

static STANDALONE_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z])\b").expect("invalid letter regex"));

static ANY_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]").expect("invalid letter regex"));

/// Canonical value extracted from a model response.
///
/// Serializes as the bare value (`{...}`, `"B"`, `"text"`, or `null`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Prediction {
    Mapping(Map<String, Value>),
    Letter(char),
    Text(String),
    Missing,
}

impl Prediction {
    pub fn is_missing(&self) -> bool {
        matches!(self, Prediction::Missing)
    }

    /// The prediction as a JSON value, `null` when missing.
    pub fn to_value(&self) -> Value {
        match self {
            Prediction::Mapping(map) => Value::Object(map.clone()),
            Prediction::Letter(c) => Value::String(c.to_string()),
            Prediction::Text(s) => Value::String(s.clone()),
            Prediction::Missing => Value::Null,
        }
    }

    /// Flat string form used for letter and text comparisons.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Prediction::Mapping(map) => Some(Value::Object(map.clone()).to_string()),
            Prediction::Letter(c) => Some(c.to_string()),
            Prediction::Text(s) => Some(s.clone()),
            Prediction::Missing => None,
        }
    }
}

/// Parse a raw response according to the output spec.
pub fn parse_prediction(spec: &OutputSpec, response: &str) -> Prediction {
    match spec {
        OutputSpec::JsonMapping { .. } => extract_json_object(response)
            .map(Prediction::Mapping)
            .unwrap_or(Prediction::Missing),
        OutputSpec::McqLetter { .. } => extract_letter(spec, response)
            .map(Prediction::Letter)
            .unwrap_or(Prediction::Missing),
        OutputSpec::ShortText(opts) => Prediction::Text(normalize_text(response, *opts)),
        OutputSpec::Unrecognized(_) => Prediction::Text(normalize_ws(response)),
    }
}

/// Collapse every whitespace run to one space and trim.
pub fn normalize_ws(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// The `short_text` normalization, shared by parser and scorer.
pub fn normalize_text(s: &str, opts: TextOptions) -> String {
    let mut out = normalize_ws(s);
    if opts.lower {
        out = out.to_lowercase();
    }
    if opts.strip_punct {
        out = normalize_ws(&NON_WORD.replace_all(&out, ""));
    }
    out
}

/// Find a JSON object in free text.
///
/// Tries the whole trimmed response first, then the span from the first `{`
/// to the last `}`.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(Value::Object(map)) = serde_json::from_str(trimmed) {
            return Some(map);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Pick the answer letter out of a response.
///
/// Order of preference: an explicit "answer is X" marker, the first
/// standalone single-letter token the spec allows, then the first letter
/// anywhere in the text. The chosen letter must be allowed.
fn extract_letter(spec: &OutputSpec, response: &str) -> Option<char> {
    let upper = response.to_uppercase();
    let captured = |caps: regex::Captures<'_>| caps.get(1).and_then(|m| m.as_str().chars().next());

    if let Some(letter) = ANSWER_MARKER
        .captures_iter(&upper)
        .filter_map(captured)
        .find(|&c| spec.allows_letter(c))
    {
        return Some(letter);
    }

    if let Some(letter) = STANDALONE_LETTER
        .captures_iter(&upper)
        .filter_map(captured)
        .find(|&c| spec.allows_letter(c))
    {
        return Some(letter);
    }

    let first = ANY_LETTER.find(&upper)?.as_str().chars().next()?;
    spec.allows_letter(first).then_some(first)
}
