/// Model-based metrics served by an external scorer service.
///
/// BERTScore, BLEURT, DEB and CTC need large models, so the harness only
/// sends batches of candidates with their references or dialogue contexts and
/// reads back one score per candidate for every sub-metric.

use std::collections::BTreeMap;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScorerError {
    /// Transport failure
    #[error("Request error: {0}")]
    Request(String),

    /// Scorer service returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Response did not line up with the batch
    #[error("Malformed scorer response: {0}")]
    Response(String),

    #[error("Scorer not configured: {0}")]
    NotConfigured(String),
}

/// Metrics computed by the scorer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMetric {
    Bert,
    Bleurt,
    Deb,
    Ctc,
}

impl ModelMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelMetric::Bert => "bert",
            ModelMetric::Bleurt => "bleurt",
            ModelMetric::Deb => "deb",
            ModelMetric::Ctc => "ctc",
        }
    }
}

/// One scorer request. `references` is set for reference-based metrics,
/// `contexts` for dialogue-coherence metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBatch {
    pub candidates: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<String>,
}

/// Sub-metric name -> one score per candidate.
pub type SubScores = BTreeMap<String, Vec<f64>>;

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, metric: ModelMetric, batch: &ScoreBatch) -> Result<SubScores, ScorerError>;
}

#[derive(Deserialize)]
struct ScoreResponse {
    scores: SubScores,
}

/// Scorer reached over HTTP at `{base_url}/score/{metric}`.
pub struct HttpScorer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpScorer {
    pub fn new(base_url: String) -> Self {
        HttpScorer {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(&self, metric: ModelMetric, batch: &ScoreBatch) -> Result<SubScores, ScorerError> {
        let url = format!("{}/score/{}", self.base_url, metric.as_str());
        let response = self
            .client
            .post(&url)
            .json(batch)
            .send()
            .await
            .map_err(|e| ScorerError::Request(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ScorerError::Api { status, message: body });
        }

        let parsed: ScoreResponse = response
            .json()
            .await
            .map_err(|e| ScorerError::Response(format!("Failed to parse scorer response: {}", e)))?;
        Ok(parsed.scores)
    }
}

/// Score `batches` one after another and concatenate every sub-metric.
pub async fn score_sequential(
    scorer: &dyn Scorer,
    metric: ModelMetric,
    batches: Vec<ScoreBatch>,
) -> Result<SubScores, ScorerError> {
    let pb = ProgressBar::new(batches.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{pos}/{len}] {msg} [{elapsed_precise} / {eta_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(format!("{}...", metric.as_str()));

    let mut merged = SubScores::new();
    for batch in &batches {
        let scores = scorer.score(metric, batch).await?;
        for (name, values) in scores {
            if values.len() != batch.candidates.len() {
                return Err(ScorerError::Response(format!(
                    "{} returned {} scores for {} candidates",
                    name,
                    values.len(),
                    batch.candidates.len()
                )));
            }
            merged.entry(name).or_default().extend(values);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(merged)
}

/// Cut parallel columns into request batches of at most `batch_size`.
pub fn make_batches(
    candidates: &[String],
    references: Option<&[String]>,
    contexts: Option<&[String]>,
    batch_size: usize,
) -> Vec<ScoreBatch> {
    let batch_size = batch_size.max(1);
    (0..candidates.len())
        .step_by(batch_size)
        .map(|start| {
            let end = (start + batch_size).min(candidates.len());
            ScoreBatch {
                candidates: candidates[start..end].to_vec(),
                references: references.map(|r| r[start..end].to_vec()).unwrap_or_default(),
                contexts: contexts.map(|c| c[start..end].to_vec()).unwrap_or_default(),
            }
        })
        .collect()
}
