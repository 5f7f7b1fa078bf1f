//! The `leakbench gap` command.

use std::path::PathBuf;

use anyhow::Result;

use leakbench_core::gap::compute_gap_from_files;

pub fn execute(original: PathBuf, isomorphic: PathBuf, out: PathBuf, format: String) -> Result<()> {
    let report = compute_gap_from_files(&original, &isomorphic)?;

    for excluded in &report.excluded {
        tracing::warn!("model excluded from gap report: {excluded}");
    }

    report.save_json(&out)?;

    match format.as_str() {
        "markdown" | "md" => {
            println!("{}", report.to_markdown());
        }
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print!("{}", report.to_text());
        }
    }

    eprintln!("Gap report saved to: {}", out.display());
    Ok(())
}
