/// Domain-specific error types for the prompting harness
///
/// Structural errors (template mismatch, ambiguous template lookup, unknown metric
/// or dataset) abort the current run. Data-quality problems are logged by the
/// callers and never surface here.

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("The number of positional arguments is incorrect: template has {found}, prompt shape supplies {expected}")]
    TemplateMismatch {
        expected: usize,
        found: usize,
    },

    #[error("Template syntax error at byte {position}: {message}")]
    TemplateSyntax {
        position: usize,
        message: String,
    },

    #[error("Couldn't find a unique template for the given arguments ({matches} rows matched)")]
    TemplateLookup {
        matches: usize,
    },

    #[error("Metric {0} not supported yet")]
    UnsupportedMetric(String),

    #[error("Unknown dataset for file: {0}")]
    UnknownDataset(String),

    #[error("Record on line {line} is missing field '{field}'")]
    MissingField {
        field: String,
        line: usize,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid experiment configuration: {0}")]
    InvalidExperiment(String),

    #[error("Responder error: {0}")]
    Responder(String),

    #[error("Scorer error: {0}")]
    Scorer(String),

    #[error("Metric worker failed: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<crate::responder::ResponderError> for HarnessError {
    fn from(e: crate::responder::ResponderError) -> Self {
        HarnessError::Responder(e.to_string())
    }
}

impl From<crate::eval::remote::ScorerError> for HarnessError {
    fn from(e: crate::eval::remote::ScorerError) -> Self {
        HarnessError::Scorer(e.to_string())
    }
}

impl HarnessError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use frugal_prompts::errors::HarnessError;
    /// let err = HarnessError::validation("gold_response", "Key gold_response not found in the data at 3");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        HarnessError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }
}
