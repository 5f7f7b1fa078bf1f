//! Deterministic isomorphic variant generation.
//!
//! Each variant `k` of example `e` draws from its own RNG seeded by the first
//! eight bytes of `SHA-256("{e}::{k}")`, so any variant can be regenerated in
//! isolation, on any machine, in any order.
//!
//! Two transformations are available. When the example annotates spans in
//! `meta.variantable.spans`, every distinct span text is replaced by a
//! synthetic token. Otherwise enumerated lines (`1. ...`, `A. ...`) are
//! shuffled in place.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::dataset::DatasetRecord;
use crate::model::Example;

const CONSONANTS: [char; 17] = [
    'p', 't', 'k', 'b', 'd', 'g', 'm', 'n', 's', 'z', 'r', 'l', 'f', 'v', 'j', 'h', 'w',
];
const VOWELS: [char; 5] = ['a', 'e', 'i', 'o', 'u'];

/// Probability that a mystery-language token ends in an extra consonant.
const CODA_PROBABILITY: f64 = 0.4;

/// Minimum number of matching lines before a list is shuffled.
const MIN_SHUFFLE_LINES: usize = 4;

/// Redraws attempted before a colliding token gets a numeric suffix.
const MAX_REDRAWS: usize = 32;

static NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\.\s+").expect("invalid numbered item regex"));

static LETTERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Z])\.\s+").expect("invalid lettered item regex"));

/// A span annotation from `meta.variantable.spans`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Span {
    pub text: String,
    /// `"en"` for gloss placeholders; anything else, including a missing or
    /// non-string kind, is treated as `"l1"`.
    #[serde(default = "default_kind", deserialize_with = "lenient_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "l1".to_string()
}

fn lenient_kind<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(kind) => kind,
        _ => default_kind(),
    })
}

/// Which transformation produced a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantMethod {
    SpanSubstitution,
    BlockShuffle,
}

impl VariantMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantMethod::SpanSubstitution => "span_substitution",
            VariantMethod::BlockShuffle => "block_shuffle",
        }
    }
}

/// The RNG for variant `k` of `example_id`.
pub fn rng_for(example_id: &str, k: u32) -> StdRng {
    let digest = Sha256::digest(format!("{example_id}::{k}").as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    StdRng::seed_from_u64(u64::from_le_bytes(seed))
}

/// Emit every example followed by its variants `1..=k`.
pub fn expand_with_variants(examples: &[Example], k: u32) -> Vec<Example> {
    let mut out = Vec::with_capacity(examples.len() * (k as usize + 1));
    for example in examples {
        out.push(example.clone());
        out.extend((1..=k).map(|j| make_variant(example, j)));
    }
    out
}

/// Expand raw dataset records: each original row is emitted exactly as it was
/// read, followed by its variants `1..=k`.
///
/// A variant row is a copy of the original row with `id`, `prompt` and `meta`
/// replaced, so fields the typed model does not know about survive.
pub fn expand_records(records: &[DatasetRecord], k: u32) -> Vec<Value> {
    let mut out = Vec::with_capacity(records.len() * (k as usize + 1));
    for record in records {
        out.push(Value::Object(record.raw.clone()));
        for j in 1..=k {
            let variant = make_variant(&record.example, j);
            let mut row = record.raw.clone();
            row.insert("id".into(), Value::String(variant.id));
            row.insert("prompt".into(), Value::String(variant.prompt));
            row.insert("meta".into(), Value::Object(variant.meta));
            out.push(Value::Object(row));
        }
    }
    out
}

/// Build variant `k` (k ≥ 1) of an example. The original is not touched.
pub fn make_variant(example: &Example, k: u32) -> Example {
    let mut rng = rng_for(&example.id, k);
    let mut variant = example.clone();
    variant.id = format!("{}__iso{k}", example.id);

    let spans = annotated_spans(&example.meta);
    let method = if spans.is_empty() {
        variant.prompt = shuffle_enumerated_blocks(&example.prompt, &mut rng);
        VariantMethod::BlockShuffle
    } else {
        let (prompt, mapping) = apply_span_substitution(&example.prompt, &spans, &mut rng);
        variant.prompt = prompt;
        let mapping: Map<String, Value> = mapping
            .into_iter()
            .map(|(src, token)| (src, Value::String(token)))
            .collect();
        variant
            .meta
            .insert("iso_span_mapping".into(), Value::Object(mapping));
        VariantMethod::SpanSubstitution
    };

    variant
        .meta
        .insert("iso_of".into(), Value::String(example.id.clone()));
    variant.meta.insert("iso_k".into(), Value::from(k));
    variant
        .meta
        .insert("iso_method".into(), Value::String(method.as_str().into()));
    variant
}

/// Spans with non-empty text from `meta.variantable.spans`. Malformed entries
/// are ignored.
pub fn annotated_spans(meta: &Map<String, Value>) -> Vec<Span> {
    let Some(Value::Array(entries)) = meta
        .get("variantable")
        .and_then(|v| v.get("spans"))
    else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| Span::deserialize(entry).ok())
        .filter(|span| !span.text.is_empty())
        .collect()
}

/// Generate a synthetic token for a span kind.
///
/// `"en"` yields an English gloss placeholder `wugNNN`; anything else yields a
/// pronounceable mystery-language word of one to three CV syllables.
pub fn pseudo_token(rng: &mut StdRng, kind: &str) -> String {
    if kind == "en" {
        return format!("wug{}", rng.gen_range(10..=999));
    }

    let syllables = rng.gen_range(1..=3);
    let mut token = String::with_capacity(syllables * 2 + 1);
    for _ in 0..syllables {
        token.push(CONSONANTS[rng.gen_range(0..CONSONANTS.len())]);
        token.push(VOWELS[rng.gen_range(0..VOWELS.len())]);
    }
    if rng.gen_bool(CODA_PROBABILITY) {
        token.push(CONSONANTS[rng.gen_range(0..CONSONANTS.len())]);
    }
    token
}

/// Replace every annotated span in `text` with a synthetic token.
///
/// The first occurrence of a span text decides its kind; repeats reuse the
/// same token and no two span texts share a token. Longer span texts are
/// substituted first, and text already substituted is never rewritten.
pub fn apply_span_substitution(
    text: &str,
    spans: &[Span],
    rng: &mut StdRng,
) -> (String, BTreeMap<String, String>) {
    let mut mapping = BTreeMap::new();
    let mut used = HashSet::new();

    for span in spans {
        if mapping.contains_key(&span.text) {
            continue;
        }
        let token = fresh_token(rng, &span.kind, &used);
        used.insert(token.clone());
        mapping.insert(span.text.clone(), token);
    }

    let mut sources: Vec<&String> = mapping.keys().collect();
    sources.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    // (text, already substituted)
    let mut pieces: Vec<(String, bool)> = vec![(text.to_string(), false)];
    for src in sources {
        let token = &mapping[src];
        let mut next = Vec::with_capacity(pieces.len());
        for (piece, done) in pieces {
            if done || !piece.contains(src.as_str()) {
                next.push((piece, done));
                continue;
            }
            let mut parts = piece.split(src.as_str()).peekable();
            while let Some(part) = parts.next() {
                if !part.is_empty() {
                    next.push((part.to_string(), false));
                }
                if parts.peek().is_some() {
                    next.push((token.clone(), true));
                }
            }
        }
        pieces = next;
    }

    let out: String = pieces.into_iter().map(|(piece, _)| piece).collect();
    (out, mapping)
}

fn fresh_token(rng: &mut StdRng, kind: &str, used: &HashSet<String>) -> String {
    let mut token = pseudo_token(rng, kind);
    for _ in 0..MAX_REDRAWS {
        if !used.contains(&token) {
            return token;
        }
        token = pseudo_token(rng, kind);
    }
    let mut n = 2;
    loop {
        let candidate = format!("{token}{n}");
        if !used.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Shuffle the content of enumerated lines, leaving every other line alone.
///
/// Numbered (`1. `) and lettered (`A. `) lines are handled independently, and
/// only when at least four lines of that style exist.
pub fn shuffle_enumerated_blocks(prompt: &str, rng: &mut StdRng) -> String {
    let mut lines: Vec<&str> = prompt.split('\n').collect();
    let mut changed = false;

    for pattern in [&*NUMBERED_ITEM, &*LETTERED_ITEM] {
        let positions: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| pattern.is_match(line))
            .map(|(i, _)| i)
            .collect();
        if positions.len() < MIN_SHUFFLE_LINES {
            continue;
        }

        let mut contents: Vec<&str> = positions.iter().map(|&i| lines[i]).collect();
        contents.shuffle(rng);
        for (&i, line) in positions.iter().zip(contents) {
            lines[i] = line;
        }
        changed = true;
    }

    if changed {
        lines.join("\n")
    } else {
        prompt.to_string()
    }
}
