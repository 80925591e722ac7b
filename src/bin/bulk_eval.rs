/// Bulk evaluation over directories of prediction files.
///
/// For each dataset directory under --base-path, scores every `.txt` file with
/// the metrics of the chosen compute mode and writes raw, reduced and CSV
/// results to `{dataset}_eval/`. Files that fail are reported and skipped.
/// All soft-validation logs are printed at the end.

use clap::Parser;
use std::path::PathBuf;

use frugal_prompts::config::Config;
use frugal_prompts::eval::bulk::{evaluate_directory, ComputeMode};
use frugal_prompts::eval::Evaluator;
use frugal_prompts::logging;

#[derive(Parser)]
#[command(name = "bulk-eval", about = "Score every prediction file in a set of dataset directories")]
struct Cli {
    /// Directory holding one sub-directory per dataset
    #[arg(long, default_value = "evaluate_final")]
    base_path: PathBuf,

    /// CPU (lexical, BERTScore, DEB) or GPU (BLEURT, length) metrics
    #[arg(long, value_enum)]
    mode: ComputeMode,

    /// Dataset directories to evaluate; totals are inferred from the name
    #[arg(long = "dataset", default_values_t = ["topical_chat_all".to_string(), "multi_session_chat_all".to_string()])]
    datasets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration and initialize logging
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });
    logging::init_logging(&config);

    let evaluator = Evaluator::new(&config);

    // 3. Evaluate each dataset directory
    let mut all_logs = Vec::new();
    for dataset in &cli.datasets {
        let report = match evaluate_directory(&evaluator, &cli.base_path, dataset, cli.mode).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(dataset = %dataset, error = %e, "Skipping dataset directory");
                println!("Exception occurred for {}: {}", dataset, e);
                continue;
            }
        };

        for outputs in &report.evaluated {
            let csv = std::fs::read_to_string(&outputs.csv)?;
            println!("{}", outputs.csv.display());
            print!("{}", csv);
        }
        for (file, error) in &report.failed {
            println!("Exception occurred for {}: {}", file.display(), error);
        }
        all_logs.extend(report.logs);
    }

    // 4. Print collected soft-validation logs
    let rule = "*".repeat(45);
    println!("{}", rule);
    println!("All logs");
    for (file_metric, message) in &all_logs {
        println!("{}", rule);
        println!("{}", file_metric);
        println!("{}", message);
    }

    Ok(())
}
