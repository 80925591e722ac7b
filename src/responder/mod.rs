/// Responder trait and model backends
///
/// A responder turns a batch of prompts into the same number of responses, in
/// order. Two backends exist: the hosted completion API (`dv3`) and a local
/// model server for the open instruction-tuned models.

pub mod local;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ResponderConfig;

/// Errors that can occur while generating responses.
#[derive(Debug, Error)]
pub enum ResponderError {
    /// Transport failure before any response arrived
    #[error("Request error: {0}")]
    Request(String),

    /// Backend returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Backend not configured (e.g., missing API key)
    #[error("Responder not configured: {0}")]
    NotConfigured(String),

    /// Response received but unusable
    #[error("Generation error: {0}")]
    Generation(String),
}

/// Core trait for response generation backends.
///
/// Implementations must be Send + Sync so a single instance can be shared
/// across dispatch tasks as `Arc<dyn Responder>`.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Generate one response per prompt, in prompt order.
    async fn respond(&self, prompts: &[String]) -> Result<Vec<String>, ResponderError>;

    /// Return the model identifier used by this responder.
    fn model_name(&self) -> &str;
}

/// Alias of the hosted completion model.
pub const HOSTED_MODEL_ALIAS: &str = "dv3";

/// Translate a launcher model alias to the full model identifier.
pub fn translate_model(alias: &str) -> Option<&'static str> {
    match alias {
        "flan-t5" => Some("google/flan-t5-xl"),
        "T0" => Some("bigscience/T0_3B"),
        "tk-instruct" => Some("allenai/tk-instruct-3b-def"),
        HOSTED_MODEL_ALIAS => Some(HOSTED_MODEL_ALIAS),
        _ => None,
    }
}

/// Build the responder for a model alias.
///
/// `dv3` goes to the hosted completion API and needs an API key; every other
/// alias is served by the local model server under its full model identifier.
pub fn create_responder(alias: &str, config: &ResponderConfig) -> Result<Arc<dyn Responder>, ResponderError> {
    let model = translate_model(alias)
        .ok_or_else(|| ResponderError::NotConfigured(format!("Unknown model alias '{}'", alias)))?;

    if model == HOSTED_MODEL_ALIAS {
        let api_key = config
            .openai_api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        tracing::info!(model = %config.openai_model, "Using hosted completion responder");
        Ok(Arc::new(openai::OpenAICompletionResponder::new(
            config.openai_base_url.clone(),
            api_key,
            config.openai_model.clone(),
            config.temperature,
            config.openai_max_tokens,
        )?))
    } else {
        tracing::info!(model = %model, base_url = %config.local_base_url, "Using local model responder");
        Ok(Arc::new(local::LocalModelResponder::new(
            config.local_base_url.clone(),
            model.to_string(),
            config.local_min_length,
            config.local_max_length,
        )))
    }
}
