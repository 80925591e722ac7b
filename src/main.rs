use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use frugal_prompts::config::Config;
use frugal_prompts::dialogue::ground_truth::{
    multi_session_chat_sessions, persona_chat_sessions, topical_chat_sessions, write_sessions,
};
use frugal_prompts::dispatch::{LocalDispatcher, RateLimitedDispatcher};
use frugal_prompts::eval::report::{summarize, ResultsObject};
use frugal_prompts::eval::{Evaluator, Metric};
use frugal_prompts::experiment::ExperimentArgs;
use frugal_prompts::generation::{run_generation, Dispatcher};
use frugal_prompts::logging;
use frugal_prompts::prompt::filler::PromptBuilder;
use frugal_prompts::prompt::template::{TemplateSpec, TemplateTable};
use frugal_prompts::responder::create_responder;

#[derive(Parser)]
#[command(name = "frugal-prompts", version, about = "Prompt-strategy experiments for dialogue response generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate responses for an experiment and write the prediction file
    Generate {
        #[command(flatten)]
        args: ExperimentArgs,

        /// API key for the hosted model (overrides responder.openai_api_key)
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: Option<String>,

        /// Score the predictions once they are written
        #[arg(short = 'e', long)]
        eval_mode: bool,
    },
    /// Score an experiment's prediction file and write its .eval.json
    Evaluate {
        #[command(flatten)]
        args: ExperimentArgs,

        /// Comma-separated metrics (default: every metric the configuration can serve)
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
    },
    /// Build a context file from a raw dataset dump
    GroundTruth {
        #[arg(long, value_enum)]
        source: GroundTruthSource,

        /// Raw dump: Topical Chat JSON, PersonaChat text or MSC JSONL
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// MSC history mode: 1 grows history within the session, later
        /// versions roll the previous session's text
        #[arg(long, default_value_t = 1)]
        msc_version: u32,
    },
    /// Print the template an experiment resolves to
    Template {
        #[command(flatten)]
        args: ExperimentArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GroundTruthSource {
    TopicalChat,
    PersonaChat,
    MultiSessionChat,
}

/// Look up the experiment's template in the configured table.
fn resolve_template(config: &Config, args: &ExperimentArgs) -> Result<TemplateSpec> {
    let table = TemplateTable::load(Path::new(&config.data.template_table))?;
    tracing::debug!(rows = table.len(), "Template table loaded");
    let template = table.lookup(&args.template_query())?;
    tracing::info!(placeholders = template.placeholder_count(), "Template found");
    Ok(template)
}

/// Create the dispatcher for the experiment's model.
fn create_dispatcher(config: &Config, args: &ExperimentArgs) -> Result<Dispatcher> {
    let responder = create_responder(args.model.as_str(), &config.responder)?;
    if args.model.is_hosted() {
        Ok(Dispatcher::RateLimited(RateLimitedDispatcher::new(
            responder,
            args.batch_size,
            &config.dispatch,
        )))
    } else {
        Ok(Dispatcher::Local(LocalDispatcher::new(responder, args.batch_size, args.num_gpus)))
    }
}

/// Metrics to compute when none are named on the command line.
fn default_metrics(config: &Config) -> Vec<Metric> {
    if config.evaluation.scorer_url.is_some() {
        vec![
            Metric::Bleu,
            Metric::Meteor,
            Metric::Rouge,
            Metric::Bert,
            Metric::Deb,
            Metric::Bleurt,
            Metric::Length,
        ]
    } else {
        tracing::info!("No scorer service configured, computing lexical metrics only");
        vec![Metric::Bleu, Metric::Meteor, Metric::Rouge, Metric::Length]
    }
}

async fn evaluate(config: &Config, args: &ExperimentArgs, metrics: &[Metric]) -> Result<()> {
    let output_dir = Path::new(&config.data.output_dir);
    let predictions = args.output_path(output_dir);
    tracing::info!(path = %predictions.display(), "Evaluating predictions");

    let evaluator = Evaluator::new(config);
    let evaluation = evaluator.compute(&predictions, metrics).await?;
    for (file_metric, message) in &evaluation.logs {
        tracing::warn!(file_metric = %file_metric, "{}", message);
    }

    let reduced = summarize(&evaluation, args.dataset.total_instances());
    let results = ResultsObject::from_reduced(&reduced);
    println!("{}", serde_json::to_string_pretty(&results)?);
    results.save(&args.eval_path(output_dir))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // 3. Initialize logging
    logging::init_logging(&config);

    // 4. Handle subcommands
    match cli.command {
        Commands::Generate { args, openai_api_key, eval_mode } => {
            args.validate()?;
            if openai_api_key.is_some() {
                config.responder.openai_api_key = openai_api_key;
            }
            let template = resolve_template(&config, &args)?;
            let flags = args.shape_flags();
            let builder = PromptBuilder::new(Some(template), flags.resolve())?;
            let dispatcher = create_dispatcher(&config, &args)?;

            let input = args.input_file(Path::new(&config.data.context_root));
            let output = args.output_path(Path::new(&config.data.output_dir));
            tracing::info!(
                dataset = args.dataset.as_str(),
                model = args.model.as_str(),
                input = %input.display(),
                "Starting generation run"
            );
            let summary = run_generation(&builder, &dispatcher, &input, &output, Path::new(&config.data.tmp_dir)).await?;
            println!("Saving to {}", summary.output_path.display());
            tracing::info!(
                run_id = %summary.run_id,
                prompts = summary.prompts,
                written = summary.written,
                "Generation finished"
            );

            if eval_mode {
                evaluate(&config, &args, &default_metrics(&config)).await?;
            }
        }

        Commands::Evaluate { args, metrics } => {
            args.validate()?;
            let metrics = if metrics.is_empty() {
                default_metrics(&config)
            } else {
                Metric::parse_list(&metrics)?
            };
            evaluate(&config, &args, &metrics).await?;
        }

        Commands::GroundTruth { source, input, output, msc_version } => {
            let raw = std::fs::read_to_string(&input)?;
            let sessions = match source {
                GroundTruthSource::TopicalChat => topical_chat_sessions(&raw)?,
                GroundTruthSource::PersonaChat => persona_chat_sessions(&raw),
                GroundTruthSource::MultiSessionChat => multi_session_chat_sessions(&raw, msc_version)?,
            };
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let written = write_sessions(&sessions, &output)?;
            println!("Wrote {} turns from {} dialogues to {}", written, sessions.len(), output.display());
        }

        Commands::Template { args } => {
            args.validate()?;
            let template = resolve_template(&config, &args)?;
            println!("{}", template);
        }
    }

    Ok(())
}
