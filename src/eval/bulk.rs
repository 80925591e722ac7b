/// Directory-wide evaluation.
///
/// Every `.txt` prediction file in a dataset directory is scored with the
/// metrics of one compute mode. Per-instance and reduced scores go to a
/// sibling `{dataset}_eval` directory. A failing file is logged and skipped.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::errors::HarnessError;
use crate::eval::report::{summarize, write_bulk_outputs, BulkOutputs};
use crate::eval::{Evaluator, Metric};
use crate::experiment::Dataset;

pub const PREDICTION_EXTENSION: &str = "txt";

/// Which side of the metric battery to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeMode {
    Cpu,
    Gpu,
}

impl ComputeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ComputeMode::Cpu => "cpu",
            ComputeMode::Gpu => "gpu",
        }
    }

    pub fn metrics(self) -> &'static [Metric] {
        match self {
            ComputeMode::Cpu => &[Metric::Bleu, Metric::Meteor, Metric::Rouge, Metric::Bert, Metric::Deb],
            ComputeMode::Gpu => &[Metric::Bleurt, Metric::Length],
        }
    }
}

/// Full instance count of the dataset a directory belongs to.
pub fn total_instances_for(dir_name: &str) -> Option<usize> {
    if dir_name.contains("multi_session") {
        Some(Dataset::Msc.total_instances())
    } else if dir_name.contains("topical_chat") {
        Some(Dataset::Tc.total_instances())
    } else {
        None
    }
}

/// Outcome of one directory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryReport {
    pub evaluated: Vec<BulkOutputs>,
    pub failed: Vec<(PathBuf, String)>,
    /// Soft-validation logs from every file.
    pub logs: Vec<(String, String)>,
}

/// Prediction files in `dir`, sorted by name.
pub fn prediction_files(dir: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == PREDICTION_EXTENSION))
        .collect();
    files.sort();
    Ok(files)
}

pub async fn evaluate_directory(
    evaluator: &Evaluator,
    base_path: &Path,
    dataset_dir: &str,
    mode: ComputeMode,
) -> Result<DirectoryReport, HarnessError> {
    let total = total_instances_for(dataset_dir).ok_or_else(|| HarnessError::UnknownDataset(dataset_dir.to_string()))?;
    let dir = base_path.join(dataset_dir);
    let out_dir = base_path.join(format!("{}_eval", dataset_dir));
    let files = prediction_files(&dir)?;
    tracing::info!(dir = %dir.display(), files = files.len(), mode = mode.as_str(), "Evaluating directory");

    let mut report = DirectoryReport::default();
    for file in files {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(file = %stem, "Processing file");

        let result = match evaluator.compute(&file, mode.metrics()).await {
            Ok(evaluation) => {
                let reduced = summarize(&evaluation, total);
                report.logs.extend(evaluation.logs.iter().cloned());
                write_bulk_outputs(&out_dir, &stem, mode.as_str(), &evaluation.scores, &reduced)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(outputs) => report.evaluated.push(outputs),
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "Evaluation failed, continuing");
                report.failed.push((file, e.to_string()));
            }
        }
    }
    Ok(report)
}
