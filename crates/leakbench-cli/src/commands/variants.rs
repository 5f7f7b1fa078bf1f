//! The `leakbench variants` command.

use std::path::PathBuf;

use anyhow::Result;

use leakbench_core::dataset::{load_records, write_jsonl};
use leakbench_core::variant::expand_records;

pub fn execute(dataset: PathBuf, out: PathBuf, k: u32) -> Result<()> {
    let records = load_records(&dataset)?;
    let expanded = expand_records(&records, k);

    tracing::info!(
        originals = records.len(),
        total = expanded.len(),
        k,
        "generated isomorphic variants"
    );
    write_jsonl(&out, &expanded)?;

    println!(
        "Wrote {} examples ({} originals, {} variants each) to {}",
        expanded.len(),
        records.len(),
        k,
        out.display()
    );
    Ok(())
}
