//! The `leakbench eval` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use leakbench_core::dataset::Dataset;
use leakbench_core::evaluate::{evaluate_run_dir, EvalOptions};
use leakbench_core::report::EvalReport;

pub fn execute(dataset_path: PathBuf, rundir: PathBuf, report_path: PathBuf, include_details: bool) -> Result<()> {
    let dataset = Dataset::load(&dataset_path)?;
    tracing::info!(examples = dataset.len(), "loaded dataset");

    let report = evaluate_run_dir(
        &dataset,
        &dataset_path,
        &rundir,
        EvalOptions { include_details },
    )?;

    print_summary(&report);

    report.save_json(&report_path)?;
    eprintln!("Report saved to: {}", report_path.display());
    Ok(())
}

fn print_summary(report: &EvalReport) {
    if report.models.is_empty() {
        eprintln!("No model outputs found in {}", report.rundir);
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["Model", "N", "Accuracy", "By task"]);

    for (model, stats) in &report.models {
        let by_task = stats
            .by_task
            .iter()
            .map(|(task, acc)| format!("{task} {:.1}%", acc * 100.0))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(model),
            Cell::new(stats.n),
            Cell::new(format!("{:.1}%", stats.accuracy * 100.0)),
            Cell::new(by_task),
        ]);
    }

    eprintln!("\n{table}");
}
