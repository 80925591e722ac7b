/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: frugal.toml (in working directory)
/// 3. Environment variables: prefixed FRUGAL_, sections split on `__`
///    (e.g., FRUGAL_LOG_LEVEL=debug, FRUGAL_RESPONDER__OPENAI_API_KEY=sk-...)

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use crate::errors::HarnessError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub responder: ResponderConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

/// Where context files, templates and outputs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root holding `multi_session_chat/` and `topical_chat/` context files.
    #[serde(default = "default_context_root")]
    pub context_root: String,

    /// TOML template table with `[[templates]]` rows.
    #[serde(default = "default_template_table")]
    pub template_table: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Intermediate prediction files are written here before filtering.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,

    /// Gold file used to fill in missing histories for MSC predictions.
    #[serde(default = "default_msc_verification_file")]
    pub msc_verification_file: String,

    /// Gold file used to fill in missing histories for Topical Chat predictions.
    #[serde(default = "default_tc_verification_file")]
    pub tc_verification_file: String,
}

/// Generation backends: hosted completion API and local model server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Required when the model is `dv3`. OPENAI_API_KEY is also honoured by the CLI.
    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_openai_max_tokens")]
    pub openai_max_tokens: u32,

    #[serde(default = "default_local_base_url")]
    pub local_base_url: String,

    #[serde(default = "default_local_min_length")]
    pub local_min_length: u32,

    #[serde(default = "default_local_max_length")]
    pub local_max_length: u32,
}

/// Throttle and retry budget for the hosted completion API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Base URL of the scorer service for model-based metrics (bert, bleurt, deb, ctc).
    #[serde(default)]
    pub scorer_url: Option<String>,

    /// Upper bound on shard workers for CPU-bound metrics.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_bert_batch_size")]
    pub bert_batch_size: usize,

    #[serde(default = "default_bleurt_batch_size")]
    pub bleurt_batch_size: usize,

    #[serde(default = "default_deb_batch_size")]
    pub deb_batch_size: usize,

    #[serde(default = "default_ctc_batch_size")]
    pub ctc_batch_size: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_context_root() -> String {
    "context_data".to_string()
}

fn default_template_table() -> String {
    "templates.toml".to_string()
}

fn default_output_dir() -> String {
    "outputs".to_string()
}

fn default_tmp_dir() -> String {
    "./tmp".to_string()
}

fn default_msc_verification_file() -> String {
    "msc_previous_utterances.txt".to_string()
}

fn default_tc_verification_file() -> String {
    "tc_previous_utterances.txt".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_openai_model() -> String {
    "text-davinci-003".to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_openai_max_tokens() -> u32 {
    100
}

fn default_local_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_local_min_length() -> u32 {
    24
}

fn default_local_max_length() -> u32 {
    128
}

fn default_rate_limit_per_minute() -> u32 {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_workers() -> usize {
    96
}

fn default_bert_batch_size() -> usize {
    64
}

fn default_bleurt_batch_size() -> usize {
    32
}

fn default_deb_batch_size() -> usize {
    32
}

fn default_ctc_batch_size() -> usize {
    32
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            context_root: default_context_root(),
            template_table: default_template_table(),
            output_dir: default_output_dir(),
            tmp_dir: default_tmp_dir(),
            msc_verification_file: default_msc_verification_file(),
            tc_verification_file: default_tc_verification_file(),
        }
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        ResponderConfig {
            openai_base_url: default_openai_base_url(),
            openai_api_key: None,
            openai_model: default_openai_model(),
            temperature: default_temperature(),
            openai_max_tokens: default_openai_max_tokens(),
            local_base_url: default_local_base_url(),
            local_min_length: default_local_min_length(),
            local_max_length: default_local_max_length(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            rate_limit_per_minute: default_rate_limit_per_minute(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            scorer_url: None,
            max_workers: default_max_workers(),
            bert_batch_size: default_bert_batch_size(),
            bleurt_batch_size: default_bleurt_batch_size(),
            deb_batch_size: default_deb_batch_size(),
            ctc_batch_size: default_ctc_batch_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            data: DataConfig::default(),
            responder: ResponderConfig::default(),
            dispatch: DispatchConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: FRUGAL_DISPATCH__RATE_LIMIT_PER_MINUTE=20 overrides dispatch.rate_limit_per_minute
    pub fn load() -> Result<Config, HarnessError> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::file("frugal.toml"))
                .merge(Env::prefixed("FRUGAL_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> Result<Config, HarnessError> {
        figment
            .extract()
            .map_err(|e| HarnessError::Config(format!("Failed to load config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_file, None);
        assert_eq!(config.dispatch.rate_limit_per_minute, 50);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.dispatch.retry_delay_secs, 5);
        assert_eq!(config.evaluation.bert_batch_size, 64);
        assert!(config.responder.openai_api_key.is_none());
    }

    #[test]
    fn test_config_toml_overrides_defaults() {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                "log_level = \"debug\"\n\
                 [dispatch]\n\
                 rate_limit_per_minute = 20\n\
                 [evaluation]\n\
                 scorer_url = \"http://localhost:8500\"\n",
            ));
        let config = Config::from_figment(figment).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.dispatch.rate_limit_per_minute, 20);
        // untouched keys in a partially specified section keep their defaults
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.evaluation.scorer_url.as_deref(), Some("http://localhost:8500"));
        assert_eq!(config.data.template_table, "templates.toml");
    }
}
