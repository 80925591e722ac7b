/// Experiment launcher arguments and everything derived from them.
///
/// One set of arguments names a dataset, a model, a prompt family and a
/// history signal. From these the launcher derives the context file to read,
/// the template query, the prompt shape flags and the output file names.

use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::errors::HarnessError;
use crate::prompt::template::TemplateQuery;
use crate::prompt::ShapeFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Dataset {
    /// Multi-Session Chat (persona grounded)
    #[value(name = "MSC")]
    Msc,
    /// Topical Chat (knowledge grounded)
    #[value(name = "TC")]
    Tc,
}

impl Dataset {
    pub fn as_str(self) -> &'static str {
        match self {
            Dataset::Msc => "MSC",
            Dataset::Tc => "TC",
        }
    }

    /// Number of test instances; scores are scaled by `evaluated / total`.
    pub fn total_instances(self) -> usize {
        match self {
            Dataset::Msc => 16300,
            Dataset::Tc => 22452,
        }
    }

    pub fn context_dir(self) -> &'static str {
        match self {
            Dataset::Msc => "multi_session_chat",
            Dataset::Tc => "topical_chat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ModelAlias {
    #[value(name = "flan-t5")]
    FlanT5,
    #[value(name = "T0")]
    T0,
    #[value(name = "tk-instruct")]
    TkInstruct,
    /// Hosted completion model
    #[value(name = "dv3")]
    Dv3,
}

impl ModelAlias {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelAlias::FlanT5 => "flan-t5",
            ModelAlias::T0 => "T0",
            ModelAlias::TkInstruct => "tk-instruct",
            ModelAlias::Dv3 => "dv3",
        }
    }

    pub fn is_hosted(self) -> bool {
        self == ModelAlias::Dv3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum PromptType {
    /// Hand-written prompts
    #[value(name = "manual")]
    Manual,
    /// Perplexity-selected prompts (per model)
    #[value(name = "ppl")]
    Ppl,
}

impl PromptType {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptType::Manual => "manual",
            PromptType::Ppl => "ppl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum HistorySignalType {
    /// Full dialogue history
    #[value(name = "full")]
    Full,
    /// Pegasus summary (CNN/DailyMail fine-tune)
    #[value(name = "peg_cd")]
    PegCd,
    /// Pegasus summary (dialogue fine-tune)
    #[value(name = "peg")]
    Peg,
    /// BART summary
    #[value(name = "bart")]
    Bart,
    /// Last k utterances
    #[value(name = "recent-k")]
    RecentK,
    /// Top k semantically similar utterances
    #[value(name = "semantic-k")]
    SemanticK,
    /// Current utterance only
    #[value(name = "none")]
    None,
}

impl HistorySignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            HistorySignalType::Full => "full",
            HistorySignalType::PegCd => "peg_cd",
            HistorySignalType::Peg => "peg",
            HistorySignalType::Bart => "bart",
            HistorySignalType::RecentK => "recent-k",
            HistorySignalType::SemanticK => "semantic-k",
            HistorySignalType::None => "none",
        }
    }

    pub fn uses_k(self) -> bool {
        matches!(self, HistorySignalType::RecentK | HistorySignalType::SemanticK)
    }
}

const HISTORY_K_CHOICES: [u32; 5] = [1, 2, 4, 8, 10];

fn parse_history_k(value: &str) -> Result<u32, String> {
    let k: u32 = value.parse().map_err(|e| format!("{}", e))?;
    if HISTORY_K_CHOICES.contains(&k) {
        Ok(k)
    } else {
        Err(format!("history k must be one of {:?}", HISTORY_K_CHOICES))
    }
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct ExperimentArgs {
    /// Dataset to use
    #[arg(short = 'd', long, value_enum, default_value = "MSC")]
    pub dataset: Dataset,

    /// Model to use
    #[arg(short = 'm', long, value_enum, default_value = "flan-t5")]
    pub model: ModelAlias,

    /// Batch size for inference
    #[arg(long, visible_alias = "bs", default_value_t = 12)]
    pub batch_size: usize,

    /// Prompt family
    #[arg(long, visible_alias = "pt", value_enum, default_value = "ppl")]
    pub prompt_type: PromptType,

    /// Use one in-context example with each query, otherwise zero-shot
    #[arg(long, visible_alias = "fs")]
    pub few_shot: bool,

    /// Use summarized background knowledge (persona for MSC, facts for TC)
    #[arg(long, visible_alias = "bw")]
    pub background_knowledge: bool,

    /// Type of history signal
    #[arg(long, visible_alias = "hst", value_enum, default_value = "peg")]
    pub history_signal_type: HistorySignalType,

    /// Number of utterances for recent-k or semantic-k
    #[arg(long, visible_alias = "hk", default_value_t = 4, value_parser = parse_history_k)]
    pub history_k: u32,

    /// Number of local batches in flight
    #[arg(long, visible_alias = "ngpu", default_value_t = 1)]
    pub num_gpus: usize,
}

impl ExperimentArgs {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.model == ModelAlias::Dv3 && self.prompt_type == PromptType::Ppl {
            return Err(HarnessError::InvalidExperiment("dv3 + ppl combination is invalid".into()));
        }
        if self.background_knowledge
            && !matches!(self.history_signal_type, HistorySignalType::Bart | HistorySignalType::Peg)
        {
            return Err(HarnessError::InvalidExperiment(format!(
                "background knowledge is only available with bart or peg summaries, not {}",
                self.history_signal_type.as_str()
            )));
        }
        Ok(())
    }

    pub fn template_query(&self) -> TemplateQuery<'static> {
        TemplateQuery {
            model: self.model.as_str(),
            prompt_type: self.prompt_type.as_str(),
            few_shot: self.few_shot,
            background_knowledge: self.background_knowledge,
            history_signal: self.history_signal_type.as_str(),
            dataset: self.dataset.as_str(),
        }
    }

    /// Context file for this experiment under `context_root`.
    pub fn input_file(&self, context_root: &Path) -> PathBuf {
        let base = context_root.join(self.dataset.context_dir());
        if self.background_knowledge {
            let name = match self.dataset {
                Dataset::Msc => "test_pegasusft_summary_pegasuscnndm_persona_dialogdata.txt",
                Dataset::Tc => "test_summary_and_knowledge_dialogdata.txt",
            };
            return base.join("generated_summary").join(name);
        }

        match self.history_signal_type {
            HistorySignalType::RecentK => base.join("previous_utterances").join(format!("last{}.txt", self.history_k)),
            HistorySignalType::SemanticK => base
                .join("semantically_similar_utterances")
                .join(format!("top{}.txt", self.history_k)),
            HistorySignalType::Full | HistorySignalType::None => base.join("previous_utterances").join("full.txt"),
            HistorySignalType::Peg => base.join("generated_summary").join("test_summary_pegasusft_dialogdata.txt"),
            HistorySignalType::Bart => base.join("generated_summary").join("test_summary_bartlarge_dialogdata.txt"),
            HistorySignalType::PegCd => base.join("generated_summary").join("test_summary_pegasus_cnndailymail.txt"),
        }
    }

    /// `{model}_{prompt_type}_{fs|zs}_{bk|nbk}_{hst}[_{k}].jsonl`
    pub fn output_filename(&self) -> String {
        let mut name = format!(
            "{}_{}_{}_{}_{}",
            self.model.as_str(),
            self.prompt_type.as_str(),
            if self.few_shot { "fs" } else { "zs" },
            if self.background_knowledge { "bk" } else { "nbk" },
            self.history_signal_type.as_str(),
        );
        if self.history_signal_type.uses_k() {
            name.push_str(&format!("_{}", self.history_k));
        }
        name.push_str(".jsonl");
        name
    }

    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(self.dataset.as_str()).join(self.output_filename())
    }

    pub fn eval_path(&self, output_dir: &Path) -> PathBuf {
        output_dir
            .join(self.dataset.as_str())
            .join(self.output_filename().replace(".jsonl", ".eval.json"))
    }

    pub fn shape_flags(&self) -> ShapeFlags {
        let no_history = self.history_signal_type == HistorySignalType::None;
        let bk = self.background_knowledge;
        let msc = self.dataset == Dataset::Msc;
        ShapeFlags {
            use_shorter_template: !self.few_shot,
            current_utterance_only: no_history,
            bart_summary: matches!(self.history_signal_type, HistorySignalType::Bart | HistorySignalType::Peg),
            has_persona_only: bk && no_history && msc,
            has_knowledge_only: bk && no_history && !msc,
            has_persona_and_summary: bk && !no_history && msc,
            has_knowledge_and_summary: bk && !no_history && !msc,
            no_prompt_blenderbot: false,
            segment_utt: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptShape;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ExperimentArgs,
    }

    fn parse(argv: &[&str]) -> ExperimentArgs {
        let mut full = vec!["test"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.dataset, Dataset::Msc);
        assert_eq!(args.model, ModelAlias::FlanT5);
        assert_eq!(args.prompt_type, PromptType::Ppl);
        assert_eq!(args.history_signal_type, HistorySignalType::Peg);
        assert_eq!(args.history_k, 4);
        assert_eq!(args.batch_size, 12);
        assert!(TestCli::try_parse_from(["test", "-e"]).is_err());
    }

    #[test]
    fn test_history_k_choices() {
        assert_eq!(parse(&["--history-k", "8"]).history_k, 8);
        assert!(TestCli::try_parse_from(["test", "--history-k", "3"]).is_err());
    }

    #[test]
    fn test_validation_rules() {
        let args = parse(&["-m", "dv3", "--prompt-type", "ppl"]);
        assert!(matches!(args.validate(), Err(HarnessError::InvalidExperiment(_))));

        let args = parse(&["-m", "dv3", "--prompt-type", "manual"]);
        assert!(args.validate().is_ok());

        let args = parse(&["--background-knowledge", "--history-signal-type", "full"]);
        assert!(args.validate().is_err());

        let args = parse(&["--background-knowledge", "--history-signal-type", "bart"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_output_names() {
        let args = parse(&["-d", "TC", "-m", "T0", "--prompt-type", "manual", "--few-shot", "--hst", "recent-k", "--hk", "2"]);
        assert_eq!(args.output_filename(), "T0_manual_fs_nbk_recent-k_2.jsonl");
        assert_eq!(
            args.eval_path(Path::new("outputs")),
            PathBuf::from("outputs/TC/T0_manual_fs_nbk_recent-k_2.eval.json")
        );

        let args = parse(&["--background-knowledge", "--hst", "bart"]);
        assert_eq!(args.output_filename(), "flan-t5_ppl_zs_bk_bart.jsonl");
    }

    #[test]
    fn test_input_files() {
        let root = Path::new("context_data");
        let args = parse(&["--hst", "semantic-k", "--hk", "10"]);
        assert_eq!(
            args.input_file(root),
            PathBuf::from("context_data/multi_session_chat/semantically_similar_utterances/top10.txt")
        );
        let args = parse(&["-d", "TC", "--hst", "none"]);
        assert_eq!(args.input_file(root), PathBuf::from("context_data/topical_chat/previous_utterances/full.txt"));
        let args = parse(&["-d", "TC", "--background-knowledge", "--hst", "peg"]);
        assert_eq!(
            args.input_file(root),
            PathBuf::from("context_data/topical_chat/generated_summary/test_summary_and_knowledge_dialogdata.txt")
        );
    }

    #[test]
    fn test_shape_flags_by_dataset() {
        let args = parse(&["--background-knowledge", "--hst", "bart"]);
        let config = args.shape_flags().resolve();
        assert_eq!(config.shape, PromptShape::PersonaAndSummary);
        assert!(config.bart_summary);

        let args = parse(&["-d", "TC", "--hst", "none", "--few-shot"]);
        let flags = args.shape_flags();
        assert_eq!(flags.shape(), PromptShape::CurrentOnly);
        assert!(!flags.use_shorter_template);
    }

    #[test]
    fn test_dataset_totals() {
        assert_eq!(Dataset::Msc.total_instances(), 16300);
        assert_eq!(Dataset::Tc.total_instances(), 22452);
    }
}
