//! The `leakbench init` command.

use std::path::Path;

use anyhow::{Context, Result};

use leakbench_providers::config::SAMPLE_CONFIG;

pub fn execute() -> Result<()> {
    let path = Path::new("leakbench.toml");
    if path.exists() {
        println!("leakbench.toml already exists, skipping.");
    } else {
        std::fs::write(path, SAMPLE_CONFIG).context("failed to write leakbench.toml")?;
        println!("Created leakbench.toml");
    }

    println!("\nNext steps:");
    println!("  1. Run: leakbench validate --dataset data/dataset.jsonl");
    println!("  2. Run: leakbench variants --dataset data/dataset.jsonl --out data/iso.jsonl --k 3");
    println!("  3. Run: leakbench run --dataset data/dataset.jsonl --models qwen2.5:7b --outdir runs/orig");
    println!("  4. Run: leakbench eval --dataset data/dataset.jsonl --rundir runs/orig --report reports/orig.json");
    println!("  5. Repeat 3-4 for data/iso.jsonl, then: leakbench gap --original reports/orig.json --isomorphic reports/iso.json --out reports/gap.json");

    Ok(())
}
