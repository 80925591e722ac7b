/// Local model server responder
///
/// Calls the `/api/generate` endpoint of a local model server once per prompt.
/// No API key required. Supports FRUGAL_RESPONDER__LOCAL_BASE_URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Responder, ResponderError};

/// Request body for /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

/// Response from /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct LocalModelResponder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    min_length: u32,
    max_length: u32,
}

impl LocalModelResponder {
    /// Create a new LocalModelResponder.
    ///
    /// # Arguments
    /// * `base_url` - Model server base URL (e.g., "http://localhost:11434")
    /// * `model` - Full model identifier (e.g., "google/flan-t5-xl")
    /// * `min_length` - Responses shorter than this many words are logged
    /// * `max_length` - Generation budget passed as `num_predict`
    pub fn new(base_url: String, model: String, min_length: u32, max_length: u32) -> Self {
        LocalModelResponder {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            min_length,
            max_length,
        }
    }

    async fn generate_one(&self, prompt: &str) -> Result<String, ResponderError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { num_predict: self.max_length },
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
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

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ResponderError::Generation(format!("Failed to parse model server response: {}", e)))?;

        let words = generated.response.split_whitespace().count();
        if words < self.min_length as usize {
            tracing::debug!(words, min_length = self.min_length, "Short response from local model");
        }
        Ok(generated.response)
    }
}

#[async_trait]
impl Responder for LocalModelResponder {
    async fn respond(&self, prompts: &[String]) -> Result<Vec<String>, ResponderError> {
        let mut responses = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            responses.push(self.generate_one(prompt).await?);
        }
        Ok(responses)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_uses_max_length_budget() {
        let request = GenerateRequest {
            model: "google/flan-t5-xl",
            prompt: "hi",
            stream: false,
            options: GenerateOptions { num_predict: 128 },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["options"]["num_predict"], 128);
        assert_eq!(value["stream"], false);
    }

    #[tokio::test]
    async fn test_empty_batch_needs_no_server() {
        let responder = LocalModelResponder::new("http://127.0.0.1:9".into(), "m".into(), 24, 128);
        assert!(responder.respond(&[]).await.unwrap().is_empty());
    }
}
