/// Reduction of per-instance scores into run summaries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::HarnessError;
use crate::eval::remote::SubScores;
use crate::eval::Evaluation;

/// metric -> sub-metric -> scaled mean
pub type ReducedScores = BTreeMap<String, BTreeMap<String, f64>>;

/// Share of the dataset that was actually evaluated.
pub fn correction_factor(evaluated: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    evaluated as f64 / total as f64
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean of every sub-metric, scaled by `factor`.
pub fn reduce(scores: &BTreeMap<String, SubScores>, factor: f64) -> ReducedScores {
    scores
        .iter()
        .map(|(metric, subs)| {
            let reduced = subs
                .iter()
                .map(|(name, values)| (name.clone(), mean(values) * factor))
                .collect();
            (metric.clone(), reduced)
        })
        .collect()
}

/// Reduce an evaluation against the dataset's full instance count.
pub fn summarize(evaluation: &Evaluation, total_instances: usize) -> ReducedScores {
    let factor = correction_factor(evaluation.file_lines, total_instances);
    tracing::info!(
        file_lines = evaluation.file_lines,
        evaluated = evaluation.evaluated_instances,
        total_instances,
        factor,
        "Reducing scores"
    );
    reduce(&evaluation.scores, factor)
}

/// Named summary written next to a run's predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsObject {
    #[serde(rename = "BLEU")]
    pub bleu: Option<f64>,
    #[serde(rename = "METEOR")]
    pub meteor: Option<f64>,
    #[serde(rename = "ROUGE-1")]
    pub rouge1: Option<f64>,
    #[serde(rename = "ROUGE-2")]
    pub rouge2: Option<f64>,
    #[serde(rename = "ROUGE-L")]
    pub rouge_l: Option<f64>,
    #[serde(rename = "BERTScore-p")]
    pub bertscore_p: Option<f64>,
    #[serde(rename = "BERTScore-r")]
    pub bertscore_r: Option<f64>,
    #[serde(rename = "BERTScore-F1")]
    pub bertscore_f1: Option<f64>,
    #[serde(rename = "DEB")]
    pub deb: Option<f64>,
    #[serde(rename = "BLEURT")]
    pub bleurt: Option<f64>,
    /// -1 when predictions carried no prompts.
    pub prompt_len: f64,
    pub output_len: Option<f64>,
}

impl ResultsObject {
    pub fn from_reduced(reduced: &ReducedScores) -> Self {
        let get = |metric: &str, sub: &str| reduced.get(metric).and_then(|m| m.get(sub)).copied();
        ResultsObject {
            bleu: get("bleu", "bleu"),
            meteor: get("meteor", "meteor"),
            rouge1: get("rouge", "rouge1"),
            rouge2: get("rouge", "rouge2"),
            rouge_l: get("rouge", "rougeL"),
            bertscore_p: get("bert", "precision"),
            bertscore_r: get("bert", "recall"),
            bertscore_f1: get("bert", "f1"),
            deb: get("deb", "deb"),
            bleurt: get("bleurt", "scores"),
            prompt_len: get("length", "prompt_length").unwrap_or(-1.0),
            output_len: get("length", "response_length"),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), HarnessError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!(path = %path.display(), "Saved evaluation summary");
        Ok(())
    }
}

/// Two lines: sub-metric names, then their values, in metric order.
pub fn reduced_csv(reduced: &ReducedScores) -> String {
    let (names, values): (Vec<String>, Vec<String>) = reduced
        .values()
        .flat_map(|subs| subs.iter().map(|(name, value)| (name.clone(), value.to_string())))
        .unzip();
    format!("{}\n{}\n", names.join(","), values.join(","))
}

/// Files written for one evaluated prediction file in bulk mode.
#[derive(Debug, Clone)]
pub struct BulkOutputs {
    pub raw: PathBuf,
    pub reduced: PathBuf,
    pub csv: PathBuf,
}

/// Write `{stem}_{mode}.json`, `{stem}_{mode}_reduced.json` and
/// `{stem}_{mode}_reduced.csv` into `out_dir`.
pub fn write_bulk_outputs(
    out_dir: &Path,
    stem: &str,
    mode: &str,
    scores: &BTreeMap<String, SubScores>,
    reduced: &ReducedScores,
) -> Result<BulkOutputs, HarnessError> {
    std::fs::create_dir_all(out_dir)?;
    let outputs = BulkOutputs {
        raw: out_dir.join(format!("{}_{}.json", stem, mode)),
        reduced: out_dir.join(format!("{}_{}_reduced.json", stem, mode)),
        csv: out_dir.join(format!("{}_{}_reduced.csv", stem, mode)),
    };
    std::fs::write(&outputs.raw, serde_json::to_string(scores)?)?;
    std::fs::write(&outputs.reduced, serde_json::to_string_pretty(reduced)?)?;
    std::fs::write(&outputs.csv, reduced_csv(reduced))?;
    tracing::debug!(dir = %out_dir.display(), stem, mode, "Wrote bulk evaluation outputs");
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scores() -> BTreeMap<String, SubScores> {
        BTreeMap::from([
            ("bleu".to_string(), SubScores::from([("bleu".to_string(), vec![0.2, 0.4])])),
            (
                "rouge".to_string(),
                SubScores::from([
                    ("rouge1".to_string(), vec![1.0, 0.0]),
                    ("rouge2".to_string(), vec![0.5, 0.5]),
                    ("rougeL".to_string(), vec![1.0, 1.0]),
                ]),
            ),
            ("length".to_string(), SubScores::from([("response_length".to_string(), vec![4.0, 6.0])])),
        ])
    }

    #[test]
    fn test_correction_factor() {
        assert_eq!(correction_factor(8150, 16300), 0.5);
        assert_eq!(correction_factor(3, 0), 0.0);
    }

    #[test]
    fn test_reduce_scales_means() {
        let reduced = reduce(&sample_scores(), 0.5);
        assert!((reduced["bleu"]["bleu"] - 0.15).abs() < 1e-12);
        assert_eq!(reduced["rouge"]["rougeL"], 0.5);
        assert_eq!(reduced["length"]["response_length"], 2.5);

        let empty = BTreeMap::from([("bleu".to_string(), SubScores::from([("bleu".to_string(), vec![])]))]);
        assert_eq!(reduce(&empty, 1.0)["bleu"]["bleu"], 0.0);
    }

    #[test]
    fn test_results_object_names() {
        let reduced = reduce(&sample_scores(), 1.0);
        let results = ResultsObject::from_reduced(&reduced);
        assert_eq!(results.prompt_len, -1.0);
        assert_eq!(results.output_len, Some(5.0));
        assert!(results.bertscore_f1.is_none());

        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["ROUGE-L"], 1.0);
        assert_eq!(value["prompt_len"], -1.0);
        assert!(value["BLEURT"].is_null());
    }

    #[test]
    fn test_bulk_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let scores = sample_scores();
        let reduced = reduce(&scores, 1.0);
        let outputs = write_bulk_outputs(dir.path(), "flan-t5_manual_zs", "cpu", &scores, &reduced).unwrap();

        assert!(outputs.raw.ends_with("flan-t5_manual_zs_cpu.json"));
        let csv = std::fs::read_to_string(&outputs.csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "bleu,response_length,rouge1,rouge2,rougeL");
        assert_eq!(lines[1].split(',').count(), 5);

        let back: ReducedScores = serde_json::from_str(&std::fs::read_to_string(&outputs.reduced).unwrap()).unwrap();
        assert_eq!(back.keys().collect::<Vec<_>>(), reduced.keys().collect::<Vec<_>>());
        assert_eq!(back["length"]["response_length"], 5.0);
    }
}
