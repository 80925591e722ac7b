/// Metric evaluation over prediction files.
///
/// The evaluator parses a prediction file, fills in missing histories from the
/// dataset's gold file, checks each metric's required fields and computes the
/// metrics one after another. Lexical metrics run locally (the expensive ones
/// sharded over blocking workers), model-based ones go to the scorer service.

pub mod bulk;
pub mod lexical;
pub mod predictions;
pub mod remote;
pub mod report;
pub mod shard;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{Config, EvaluationConfig};
use crate::errors::HarnessError;
use predictions::{fill_in_history, read_predictions, EvalInstance};
use remote::{make_batches, score_sequential, HttpScorer, ModelMetric, Scorer, SubScores};

/// Shard tiers for METEOR at <1000, <3000 and larger inputs.
pub const METEOR_SHARD_TIERS: [usize; 3] = [6, 12, 24];
/// Shard tiers for ROUGE at <1000, <3000 and larger inputs.
pub const ROUGE_SHARD_TIERS: [usize; 3] = [32, 64, 96];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Bleu,
    Meteor,
    Rouge,
    Bert,
    Bleurt,
    Deb,
    Ctc,
    Length,
}

/// Fields a metric needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    PredictionAndReference,
    /// Soft warning when `current_utterance` is absent.
    PredictionAndHistory,
    /// Soft warning when the prompt is absent.
    Prediction,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Bleu,
        Metric::Meteor,
        Metric::Rouge,
        Metric::Bert,
        Metric::Bleurt,
        Metric::Deb,
        Metric::Ctc,
        Metric::Length,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Bleu => "bleu",
            Metric::Meteor => "meteor",
            Metric::Rouge => "rouge",
            Metric::Bert => "bert",
            Metric::Bleurt => "bleurt",
            Metric::Deb => "deb",
            Metric::Ctc => "ctc",
            Metric::Length => "length",
        }
    }

    pub fn precondition(self) -> Precondition {
        match self {
            Metric::Bleu | Metric::Meteor | Metric::Rouge | Metric::Bert | Metric::Bleurt => {
                Precondition::PredictionAndReference
            }
            Metric::Deb | Metric::Ctc => Precondition::PredictionAndHistory,
            Metric::Length => Precondition::Prediction,
        }
    }

    /// Scorer-service metric backing this one, if any.
    pub fn model_metric(self) -> Option<ModelMetric> {
        match self {
            Metric::Bert => Some(ModelMetric::Bert),
            Metric::Bleurt => Some(ModelMetric::Bleurt),
            Metric::Deb => Some(ModelMetric::Deb),
            Metric::Ctc => Some(ModelMetric::Ctc),
            _ => None,
        }
    }

    /// Parse a list of metric names, failing on the first unknown one.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<Metric>, HarnessError> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s.trim())
            .ok_or_else(|| HarnessError::UnsupportedMetric(s.to_string()))
    }
}

/// Check `data` against a precondition. Missing required fields are errors;
/// the returned string is a soft warning to collect.
pub fn check_precondition(precondition: Precondition, data: &[EvalInstance]) -> Result<Option<String>, HarnessError> {
    let missing = |field: &str, idx: usize| {
        HarnessError::validation(field, &format!("Key {} not found in the data at {}", field, idx))
    };

    match precondition {
        Precondition::PredictionAndReference => {
            if let Some(idx) = data.iter().position(|i| i.gold_response.is_none()) {
                return Err(missing("gold_response", idx));
            }
            Ok(None)
        }
        Precondition::PredictionAndHistory => {
            if let Some(idx) = data.iter().position(|i| i.history.is_none()) {
                return Err(missing("history", idx));
            }
            Ok(data
                .iter()
                .position(|i| i.current_utterance.is_none())
                .map(|idx| format!("Key current_utterance not found in the data at {}, scoring history only", idx)))
        }
        Precondition::Prediction => Ok(data
            .iter()
            .position(|i| i.prompt.is_none())
            .map(|idx| format!("Key prompts not found in the data at {}, prompt length skipped", idx))),
    }
}

/// Per-metric scores for one file.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// metric -> sub-metric -> one score per evaluated instance
    pub scores: BTreeMap<String, SubScores>,
    pub evaluated_instances: usize,
    /// Non-blank lines in the prediction file.
    pub file_lines: usize,
    pub dropped_without_history: usize,
    /// `(file_metric, message)` soft-validation notes.
    pub logs: Vec<(String, String)>,
}

pub struct Evaluator {
    settings: EvaluationConfig,
    msc_verification_file: PathBuf,
    tc_verification_file: PathBuf,
    scorer: Option<Arc<dyn Scorer>>,
}

impl Evaluator {
    pub fn new(config: &Config) -> Self {
        let scorer = config
            .evaluation
            .scorer_url
            .clone()
            .map(|url| Arc::new(HttpScorer::new(url)) as Arc<dyn Scorer>);
        Evaluator {
            settings: config.evaluation.clone(),
            msc_verification_file: PathBuf::from(&config.data.msc_verification_file),
            tc_verification_file: PathBuf::from(&config.data.tc_verification_file),
            scorer,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Gold file for the dataset named in `path`.
    pub fn verification_file(&self, path: &Path) -> Result<&Path, HarnessError> {
        let name = path.to_string_lossy();
        if name.contains("multi_session") {
            Ok(&self.msc_verification_file)
        } else if name.contains("topical_chat") {
            Ok(&self.tc_verification_file)
        } else {
            Err(HarnessError::UnknownDataset(name.into_owned()))
        }
    }

    pub async fn compute(&self, path: &Path, metrics: &[Metric]) -> Result<Evaluation, HarnessError> {
        // 1. Parse predictions
        let parsed = read_predictions(path)?;
        let file_lines = parsed.line_count;
        let mut data = parsed.instances;

        // 2. Fill in histories from the gold file
        let mut dropped_without_history = 0;
        if data.first().is_some_and(|i| i.history.is_none()) {
            let gold_path = self.verification_file(path)?;
            tracing::info!(gold = %gold_path.display(), "Filling in missing histories");
            let gold = read_predictions(gold_path)?;
            let (filled, dropped) = fill_in_history(&gold.instances, data);
            data = filled;
            dropped_without_history = dropped;
        }

        // 3. Check preconditions
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut logs = Vec::new();
        for metric in metrics {
            if let Some(message) = check_precondition(metric.precondition(), &data)? {
                tracing::warn!(file = %file_name, metric = %metric, "{}", message);
                logs.push((format!("{}_{}", file_name, metric), message));
            }
        }

        // 4. Score
        let mut scores = BTreeMap::new();
        for metric in metrics {
            tracing::info!(metric = %metric, instances = data.len(), "Computing metric");
            let sub_scores = self.compute_metric(*metric, &data).await?;
            scores.insert(metric.name().to_string(), sub_scores);
        }

        Ok(Evaluation {
            scores,
            evaluated_instances: data.len(),
            file_lines,
            dropped_without_history,
            logs,
        })
    }

    async fn compute_metric(&self, metric: Metric, data: &[EvalInstance]) -> Result<SubScores, HarnessError> {
        let predictions: Vec<String> = data.iter().map(|i| i.predicted_response.clone()).collect();
        let references: Vec<String> = data
            .iter()
            .map(|i| i.gold_response.clone().unwrap_or_default())
            .collect();

        match metric {
            Metric::Bleu => {
                let scores = predictions
                    .iter()
                    .zip(&references)
                    .map(|(p, r)| lexical::bleu_averaged(p, r))
                    .collect();
                Ok(SubScores::from([("bleu".to_string(), scores)]))
            }
            Metric::Meteor => {
                let pairs: Vec<(String, String)> = predictions.into_iter().zip(references).collect();
                let shards = shard::shard_count(pairs.len(), METEOR_SHARD_TIERS, self.settings.max_workers);
                let scores = shard::parallel_map_ordered(pairs, shards, |(p, r)| lexical::meteor(p, r)).await?;
                Ok(SubScores::from([("meteor".to_string(), scores)]))
            }
            Metric::Rouge => {
                let pairs: Vec<(String, String)> = predictions.into_iter().zip(references).collect();
                let shards = shard::shard_count(pairs.len(), ROUGE_SHARD_TIERS, self.settings.max_workers);
                let scores = shard::parallel_map_ordered(pairs, shards, |(p, r)| lexical::rouge(p, r)).await?;
                Ok(SubScores::from([
                    ("rouge1".to_string(), scores.iter().map(|s| s.rouge1.fmeasure).collect()),
                    ("rouge2".to_string(), scores.iter().map(|s| s.rouge2.fmeasure).collect()),
                    ("rougeL".to_string(), scores.iter().map(|s| s.rouge_l.fmeasure).collect()),
                ]))
            }
            Metric::Length => {
                let mut sub = SubScores::new();
                sub.insert(
                    "response_length".to_string(),
                    predictions.iter().map(|p| lexical::token_length(p) as f64).collect(),
                );
                if !data.is_empty() && data.iter().all(|i| i.prompt.is_some()) {
                    sub.insert(
                        "prompt_length".to_string(),
                        data.iter()
                            .map(|i| lexical::token_length(i.prompt.as_deref().unwrap_or("")) as f64)
                            .collect(),
                    );
                }
                Ok(sub)
            }
            Metric::Bert | Metric::Bleurt => {
                let batch_size = if metric == Metric::Bert {
                    self.settings.bert_batch_size
                } else {
                    self.settings.bleurt_batch_size
                };
                let batches = make_batches(&predictions, Some(&references), None, batch_size);
                self.score_remote(metric, batches).await
            }
            Metric::Deb | Metric::Ctc => {
                let contexts: Vec<String> = data.iter().map(dialogue_context).collect();
                let batch_size = if metric == Metric::Deb {
                    self.settings.deb_batch_size
                } else {
                    self.settings.ctc_batch_size
                };
                let batches = make_batches(&predictions, None, Some(&contexts), batch_size);
                self.score_remote(metric, batches).await
            }
        }
    }

    async fn score_remote(&self, metric: Metric, batches: Vec<remote::ScoreBatch>) -> Result<SubScores, HarnessError> {
        let model_metric = metric
            .model_metric()
            .ok_or_else(|| HarnessError::UnsupportedMetric(metric.name().to_string()))?;
        let scorer = self.scorer.as_ref().ok_or_else(|| {
            HarnessError::Scorer(format!("{} requires evaluation.scorer_url to be set", metric))
        })?;
        Ok(score_sequential(scorer.as_ref(), model_metric, batches).await?)
    }
}

/// History followed by the current utterance when there is one.
fn dialogue_context(instance: &EvalInstance) -> String {
    let history = instance.history.as_deref().unwrap_or("");
    match instance.current_utterance.as_deref() {
        Some(current) => format!("{}\n{}", history, current),
        None => history.to_string(),
    }
}
