/// Generation runs: prompts in, filtered prediction file out.
///
/// A run assembles prompts, sends them through a dispatcher, writes every
/// prediction to an intermediate file named after a short run id, then filters
/// that file into the final JSONL output.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dispatch::{LocalDispatcher, RateLimitedDispatcher};
use crate::errors::HarnessError;
use crate::prompt::filler::PromptBuilder;
use crate::prompt::PromptRecord;

/// Key counts a well-formed prediction line may have.
pub const PREDICTION_KEY_COUNTS: [usize; 2] = [6, 7];

/// One line of a prediction file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(rename = "prompts", alias = "prompt")]
    pub prompt: String,
    pub current_utterance: String,
    pub predicted_response: String,
    pub gold_response: String,
    pub history: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<usize>,
}

impl PredictionRecord {
    pub fn from_prompt(record: PromptRecord, predicted_response: String) -> Self {
        PredictionRecord {
            prompt: record.prompt,
            current_utterance: record.current_utterance,
            predicted_response,
            gold_response: record.gold_response,
            history: record.history,
            summary: record.summary,
            id: Some(record.id),
        }
    }
}

/// Either dispatcher, chosen by model.
pub enum Dispatcher {
    RateLimited(RateLimitedDispatcher),
    Local(LocalDispatcher),
}

impl Dispatcher {
    pub async fn dispatch(&self, prompts: &[String]) -> Result<Vec<String>, HarnessError> {
        match self {
            Dispatcher::RateLimited(d) => Ok(d.dispatch(prompts).await.responses),
            Dispatcher::Local(d) => Ok(d.dispatch(prompts).await?),
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct GenerationSummary {
    pub run_id: String,
    pub prompts: usize,
    pub written: usize,
    pub intermediate_path: PathBuf,
    pub output_path: PathBuf,
}

/// Six uppercase hex characters identifying a run.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}

pub async fn run_generation(
    builder: &PromptBuilder,
    dispatcher: &Dispatcher,
    input: &Path,
    output: &Path,
    tmp_dir: &Path,
) -> Result<GenerationSummary, HarnessError> {
    // 1. Assemble prompts
    let records = builder.build_prompts_from_path(input)?;
    let prompts: Vec<String> = records.iter().map(|r| r.prompt.clone()).collect();
    tracing::info!(input = %input.display(), prompts = prompts.len(), "Generating responses");

    // 2. Dispatch
    let responses = dispatcher.dispatch(&prompts).await?;
    if responses.len() != records.len() {
        return Err(HarnessError::Responder(format!(
            "expected {} responses, got {}",
            records.len(),
            responses.len()
        )));
    }

    // 3. Intermediate file
    let run_id = new_run_id();
    std::fs::create_dir_all(tmp_dir)?;
    let intermediate_path = tmp_dir.join(format!("intermediate_file_{}.txt", run_id));
    tracing::info!(path = %intermediate_path.display(), "Writing intermediate predictions");
    {
        let mut out = std::io::BufWriter::new(std::fs::File::create(&intermediate_path)?);
        for (record, response) in records.into_iter().zip(responses) {
            let prediction = PredictionRecord::from_prompt(record, response);
            writeln!(out, "{}", serde_json::to_string(&prediction)?)?;
        }
        out.flush()?;
    }

    // 4. Filter into the final output
    let filtered = filter_predictions(&intermediate_path)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = std::io::BufWriter::new(std::fs::File::create(output)?);
    for entry in &filtered {
        writeln!(out, "{}", serde_json::to_string(entry)?)?;
    }
    out.flush()?;
    tracing::info!(path = %output.display(), written = filtered.len(), "Saved predictions");

    Ok(GenerationSummary {
        run_id,
        prompts: prompts.len(),
        written: filtered.len(),
        intermediate_path,
        output_path: output.to_path_buf(),
    })
}

/// Read a prediction file, dropping blank lines, exact duplicate lines, lines
/// that are not JSON objects and objects whose key count is not 6 or 7.
/// First-seen order is kept.
pub fn filter_predictions(path: &Path) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, HarnessError> {
    let content = std::fs::read_to_string(path)?;
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut dropped = 0usize;

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !seen.insert(line) {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(map)) if PREDICTION_KEY_COUNTS.contains(&map.len()) => kept.push(map),
            _ => dropped += 1,
        }
    }

    tracing::info!(kept = kept.len(), dropped, "Filtered predictions");
    Ok(kept)
}
