//! The `leakbench validate` command.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;

use leakbench_core::dataset::{load_examples, validate_dataset};

pub fn execute(dataset: PathBuf) -> Result<()> {
    let examples = load_examples(&dataset)?;

    let mut by_task: BTreeMap<&str, usize> = BTreeMap::new();
    for ex in &examples {
        *by_task.entry(ex.task_type.as_str()).or_default() += 1;
    }
    let variants = examples.iter().filter(|ex| ex.iso_of().is_some()).count();

    println!("Dataset: {} ({} examples)", dataset.display(), examples.len());
    for (task, count) in &by_task {
        println!("  {task}: {count}");
    }
    if variants > 0 {
        println!("  isomorphic variants: {variants}");
    }

    let warnings = validate_dataset(&examples);
    for w in &warnings {
        let prefix = w
            .example_id
            .as_ref()
            .map(|id| format!("  [{id}]"))
            .unwrap_or_else(|| "  ".to_string());
        println!("{prefix} WARNING: {}", w.message);
    }

    if warnings.is_empty() {
        println!("Dataset valid.");
    } else {
        println!("\n{} warning(s) found.", warnings.len());
    }

    Ok(())
}
