/// Hosted completion responder
///
/// Calls the `/v1/completions` endpoint with the whole batch as a prompt array.
/// Requires an API key (FRUGAL_RESPONDER__OPENAI_API_KEY or OPENAI_API_KEY).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Responder, ResponderError};

/// Request body for the completions API
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a [String],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

/// Response from the completions API
#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
    #[serde(default)]
    index: usize,
}

pub struct OpenAICompletionResponder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAICompletionResponder {
    /// Create a new OpenAICompletionResponder.
    ///
    /// # Errors
    /// Returns `ResponderError::NotConfigured` if api_key is empty.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Self, ResponderError> {
        if api_key.trim().is_empty() {
            return Err(ResponderError::NotConfigured(
                "OPENAI_API_KEY not found. Set FRUGAL_RESPONDER__OPENAI_API_KEY or OPENAI_API_KEY \
                 in the environment"
                    .to_string(),
            ));
        }

        Ok(OpenAICompletionResponder {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature,
            max_tokens,
        })
    }
}

/// Put choices back in prompt order.
fn ordered_texts(mut choices: Vec<CompletionChoice>) -> Vec<String> {
    choices.sort_by_key(|c| c.index);
    choices.into_iter().map(|c| c.text).collect()
}

#[async_trait]
impl Responder for OpenAICompletionResponder {
    async fn respond(&self, prompts: &[String]) -> Result<Vec<String>, ResponderError> {
        let request = CompletionRequest {
            model: &self.model,
            prompt: prompts,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        };

        let url = format!("{}/v1/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ResponderError::Request(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ResponderError::Api { status, message: body });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ResponderError::Generation(format!("Failed to parse completion response: {}", e)))?;

        Ok(ordered_texts(completion.choices))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
