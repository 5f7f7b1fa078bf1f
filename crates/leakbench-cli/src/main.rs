//! leakbench CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "leakbench",
    version,
    about = "Benchmark-integrity harness: measure the memorization gap between original and isomorphic questions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a dataset with deterministic isomorphic variants
    Variants {
        /// Input JSONL dataset
        #[arg(long)]
        dataset: PathBuf,

        /// Output JSONL path (originals followed by their variants)
        #[arg(long)]
        out: PathBuf,

        /// Variants per example
        #[arg(long, default_value = "3")]
        k: u32,
    },

    /// Send dataset prompts to models and store the raw outputs
    Run {
        /// JSONL dataset
        #[arg(long)]
        dataset: PathBuf,

        /// Comma-separated model tags (e.g. "qwen2.5:7b,llama3.1:8b")
        #[arg(long, value_delimiter = ',', required = true)]
        models: Vec<String>,

        /// Root directory for per-model outputs [default: from config, "runs"]
        #[arg(long)]
        outdir: Option<PathBuf>,

        /// Ollama base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f64>,

        /// Nucleus sampling threshold
        #[arg(long)]
        top_p: Option<f64>,

        /// Context window size
        #[arg(long)]
        num_ctx: Option<u32>,

        /// Sampling seed
        #[arg(long)]
        seed: Option<i64>,

        /// Only run the first N examples (0 = all)
        #[arg(long, default_value = "0")]
        limit: usize,

        /// Regenerate outputs that already exist
        #[arg(long)]
        overwrite: bool,

        /// Max concurrent requests
        #[arg(long)]
        parallelism: Option<usize>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Score stored model outputs against a dataset
    Eval {
        /// JSONL dataset the outputs answer
        #[arg(long)]
        dataset: PathBuf,

        /// Directory containing one subdirectory per model
        #[arg(long)]
        rundir: PathBuf,

        /// Where to write the report JSON
        #[arg(long)]
        report: PathBuf,

        /// Include per-example details in the report
        #[arg(long)]
        include_details: bool,
    },

    /// Compute the memorization gap between two eval reports
    Gap {
        /// Report for the original dataset
        #[arg(long)]
        original: PathBuf,

        /// Report for the isomorphic dataset
        #[arg(long)]
        isomorphic: PathBuf,

        /// Where to write the gap report JSON
        #[arg(long)]
        out: PathBuf,

        /// Console output format: text, json, markdown
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Validate a JSONL dataset
    Validate {
        /// Path to the dataset
        #[arg(long)]
        dataset: PathBuf,
    },

    /// List models available on the configured backend
    ListModels {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create a starter config file
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("leakbench=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Variants { dataset, out, k } => commands::variants::execute(dataset, out, k),
        Commands::Run {
            dataset,
            models,
            outdir,
            base_url,
            temperature,
            top_p,
            num_ctx,
            seed,
            limit,
            overwrite,
            parallelism,
            config,
        } => {
            let args = commands::run::RunArgs {
                dataset,
                models,
                outdir,
                base_url,
                temperature,
                top_p,
                num_ctx,
                seed,
                limit,
                overwrite,
                parallelism,
                config,
            };
            commands::run::execute(args).await
        }
        Commands::Eval {
            dataset,
            rundir,
            report,
            include_details,
        } => commands::eval::execute(dataset, rundir, report, include_details),
        Commands::Gap {
            original,
            isomorphic,
            out,
            format,
        } => commands::gap::execute(original, isomorphic, out, format),
        Commands::Validate { dataset } => commands::validate::execute(dataset),
        Commands::ListModels { config } => commands::list_models::execute(config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
