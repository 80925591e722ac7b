/// Reading prediction files for evaluation.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::HarnessError;

/// Speaker labels a model may echo at the start of its response.
pub const SPEAKER_PREFIXES: [&str; 4] = ["Person1: ", "Person2: ", "Bot: ", "User: "];

/// Stand-in for an empty prediction.
pub const NO_RESPONSE: &str = "NO RESPONSE";

/// Stand-in for a record without a summary.
pub const NO_SUMMARY: &str = "NO SUMMARY";

/// One scored instance. Optional fields are checked per metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalInstance {
    pub predicted_response: String,
    pub gold_response: Option<String>,
    pub history: Option<String>,
    pub current_utterance: Option<String>,
    pub prompt: Option<String>,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
struct RawPrediction {
    #[serde(default)]
    predicted_response: Option<String>,
    #[serde(default, alias = "response")]
    gold_response: Option<String>,
    #[serde(default)]
    history: Option<String>,
    #[serde(default)]
    current_utterance: Option<String>,
    #[serde(default, alias = "prompt")]
    prompts: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Parsed file plus the bookkeeping the evaluator reports.
#[derive(Debug, Clone, Default)]
pub struct ParsedPredictions {
    pub instances: Vec<EvalInstance>,
    /// Non-blank lines in the file; the numerator of the correction factor.
    pub line_count: usize,
    pub stripped_prefixes: usize,
    pub empty_responses: usize,
    pub skipped_lines: usize,
}

/// Remove one leading speaker label (with or without the trailing space).
pub fn strip_speaker_prefix(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    SPEAKER_PREFIXES.iter().find_map(|prefix| {
        trimmed
            .strip_prefix(prefix)
            .or_else(|| trimmed.strip_prefix(prefix.trim_end()))
    })
}

pub fn parse_predictions(content: &str) -> ParsedPredictions {
    let mut parsed = ParsedPredictions::default();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        parsed.line_count += 1;

        let raw: RawPrediction = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(line = index, error = %e, "Skipping malformed prediction line");
                parsed.skipped_lines += 1;
                continue;
            }
        };

        // ground-truth files carry no prediction; score the gold response
        let Some(mut predicted) = raw.predicted_response.or_else(|| raw.gold_response.clone()) else {
            tracing::warn!(line = index, "Skipping line without predicted_response or gold_response");
            parsed.skipped_lines += 1;
            continue;
        };

        if let Some(rest) = strip_speaker_prefix(&predicted) {
            predicted = rest.to_string();
            parsed.stripped_prefixes += 1;
        }
        if predicted.trim().is_empty() {
            predicted = NO_RESPONSE.to_string();
            parsed.empty_responses += 1;
        }

        parsed.instances.push(EvalInstance {
            predicted_response: predicted,
            gold_response: raw.gold_response,
            history: raw.history,
            current_utterance: raw.current_utterance,
            prompt: raw.prompts,
            summary: raw.summary.unwrap_or_else(|| NO_SUMMARY.to_string()),
        });
    }

    tracing::info!(
        instances = parsed.instances.len(),
        stripped_prefixes = parsed.stripped_prefixes,
        empty_responses = parsed.empty_responses,
        skipped = parsed.skipped_lines,
        "Parsed predictions"
    );
    parsed
}

pub fn read_predictions(path: &Path) -> Result<ParsedPredictions, HarnessError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_predictions(&content))
}

fn history_key(instance: &EvalInstance) -> String {
    format!(
        "{}\n{}",
        instance.current_utterance.as_deref().unwrap_or("").trim(),
        instance.gold_response.as_deref().unwrap_or("").trim()
    )
}

/// Attach histories from the gold file, keyed by current utterance and gold
/// response. Instances without a gold match are dropped; the count of dropped
/// instances is returned alongside.
pub fn fill_in_history(gold: &[EvalInstance], data: Vec<EvalInstance>) -> (Vec<EvalInstance>, usize) {
    let histories: HashMap<String, &str> = gold
        .iter()
        .filter_map(|g| g.history.as_deref().map(|h| (history_key(g), h)))
        .collect();

    let mut unmatched = 0;
    let filled: Vec<EvalInstance> = data
        .into_iter()
        .filter_map(|instance| match histories.get(&history_key(&instance)) {
            Some(history) => Some(EvalInstance { history: Some(history.to_string()), ..instance }),
            None => {
                unmatched += 1;
                None
            }
        })
        .collect();

    if unmatched > 0 {
        tracing::warn!(unmatched, "Predictions without a gold history were dropped");
    }
    (filled, unmatched)
}
