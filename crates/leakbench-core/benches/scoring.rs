use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Map, Value};

use leakbench_core::model::{Example, OutputSpec, TaskType, TextOptions};
use leakbench_core::prediction::{parse_prediction, Prediction};
use leakbench_core::scoring::score_example;
use leakbench_core::statistics::ModelAccumulator;
use leakbench_core::variant::expand_with_variants;

fn make_example(i: usize) -> Example {
    let (task_type, answer, output_spec) = match i % 3 {
        0 => {
            let gold: Map<String, Value> = (0..12)
                .map(|k| (k.to_string(), json!(format!("opt{}", (k + i) % 12))))
                .collect();
            (TaskType::Matching, Value::Object(gold), OutputSpec::JsonMapping { keys: None })
        }
        1 => (TaskType::Mcq, json!("C"), OutputSpec::McqLetter { allowed: None }),
        _ => (
            TaskType::ShortText,
            json!(["wugamel", "wug amel", "the wugamel"]),
            OutputSpec::ShortText(TextOptions::default()),
        ),
    };

    let mut meta = Map::new();
    meta.insert(
        "variantable".into(),
        json!({"spans": [
            {"text": "kanuri", "kind": "l1"},
            {"text": "sakha", "kind": "l1"},
            {"text": "English", "kind": "en"}
        ]}),
    );

    Example {
        id: format!("ex-{i}"),
        source: ["IOL", "UKLO", "NACLO"][i % 3].to_string(),
        year: Some(2010 + (i % 12) as i64),
        task_type,
        prompt: format!(
            "Here are words in kanuri and sakha with English glosses.\n1. kanuri tab\n2. sakha tib\n3. kanuri tob\n4. sakha tub\nQuestion {i}?"
        ),
        answer,
        output_spec,
        meta,
    }
}

fn response_for(example: &Example) -> String {
    match example.task_type {
        TaskType::Matching => {
            let body: Vec<String> = (0..12).map(|k| format!("\"{k}\": \"opt{k}\"")).collect();
            format!("My answer:\n{{{}}}", body.join(", "))
        }
        TaskType::Mcq => "The answer is C.".to_string(),
        TaskType::ShortText => " The  Wugamel ".to_string(),
    }
}

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");

    let examples: Vec<Example> = (0..300).map(make_example).collect();
    let preds: Vec<Prediction> = examples
        .iter()
        .map(|ex| parse_prediction(&ex.output_spec, &response_for(ex)))
        .collect();

    group.bench_function("score_300", |b| {
        b.iter(|| {
            for (ex, pred) in examples.iter().zip(&preds) {
                let _ = score_example(black_box(ex), black_box(pred));
            }
        })
    });

    group.bench_function("aggregate_300", |b| {
        b.iter(|| {
            let mut acc = ModelAccumulator::default();
            for (ex, pred) in examples.iter().zip(&preds) {
                if let Ok(result) = score_example(ex, pred) {
                    acc.record(ex, pred, &result);
                }
            }
            acc.finish()
        })
    });

    group.bench_function("expand_variants_k3", |b| {
        b.iter(|| expand_with_variants(black_box(&examples[..100]), black_box(3)))
    });

    group.finish();
}

criterion_group!(benches, bench_score);
criterion_main!(benches);
