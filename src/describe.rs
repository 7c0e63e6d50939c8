//! Non-identifying photo descriptions from a hosted language model.

use crate::{config::Config, provider::ProviderError};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Returned in place of a description when no API key is configured.
pub const NOT_CONFIGURED: &str = "OpenAI not configured.";

/// Number of safety recommendations the model is asked for.
pub const RECOMMENDATION_COUNT: usize = 5;

const MAX_TOKENS: u32 = 450;
const TEMPERATURE: f32 = 0.1;

/// OpenAI Chat Completions client producing a short description of a photo
/// from its recognized text. The model is told never to identify anyone.
#[derive(Debug, Clone)]
pub struct DescriptionGenerator {
    http_client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

impl DescriptionGenerator {
    pub fn new(api_key: Option<String>, model: impl Into<String>, api_base: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to create HTTP client for OpenAI API, using default client");
                reqwest::Client::default()
            });

        Self {
            http_client,
            api_key,
            model: model.into(),
            api_base: api_base.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.openai_api_key.clone(),
            config.openai_model.clone(),
            config.openai_api_base.clone(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Describes the photo; never fails.
    ///
    /// Returns [`NOT_CONFIGURED`] without an API key and `"OpenAI error: ..."`
    /// when the request fails.
    pub async fn describe(&self, ocr_text: &str, notes: &str) -> String {
        let Some(api_key) = &self.api_key else {
            return NOT_CONFIGURED.to_string();
        };

        match self.request_description(api_key, &build_prompt(ocr_text, notes)).await {
            Ok(description) => description,
            Err(e) => {
                tracing::warn!(error = %e, "description generation failed");
                format!("OpenAI error: {e}")
            }
        }
    }

    async fn request_description(&self, api_key: &str, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let request_body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        let response = self
            .http_client
            .post(url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ProviderError::Malformed("no content in completion".to_string()))
    }
}

/// Builds the user prompt sent to the model.
pub fn build_prompt(ocr_text: &str, notes: &str) -> String {
    format!(
        "You are an assistant helping a user check whether their photo appears on the Internet.\n\
         Never attempt to identify any person. Provide:\n\
         1) A non-identifying description of the image (objects, context, colors). \
         2) Whether any text was detected, and show it. \
         3) {RECOMMENDATION_COUNT} safety recommendations or actions to take if the photo is found elsewhere.\n\n\
         Detected OCR text:\n{ocr_text}\n\nNotes: {notes}\n\nAnswer concisely."
    )
}

#[cfg(test)]
mod tests {
    use crate::describe::{DescriptionGenerator, NOT_CONFIGURED, build_prompt};

    #[test]
    fn test_prompt() {
        let prompt = build_prompt("SALE 50%", "filename=1_a.png");

        assert!(prompt.contains("Never attempt to identify any person"));
        assert!(prompt.contains("5 safety recommendations"));
        assert!(prompt.contains("SALE 50%"));
        assert!(prompt.contains("Notes: filename=1_a.png"));
    }

    #[tokio::test]
    async fn test_not_configured() {
        let generator = DescriptionGenerator::new(None, "gpt-4o-mini", "http://127.0.0.1:9");

        assert!(!generator.is_configured());
        assert_eq!(NOT_CONFIGURED, generator.describe("", "").await);
    }

    #[tokio::test]
    async fn test_describe() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model":"gpt-4o-mini","max_tokens":450}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"  A red square.  "}}]}"#,
            )
            .create_async()
            .await;

        let generator = DescriptionGenerator::new(
            Some("sk-test".to_string()),
            "gpt-4o-mini",
            format!("{}/v1", server.url()),
        );

        assert_eq!("A red square.", generator.describe("", "filename=1_a.png").await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_describe_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"bad key"}}"#)
            .create_async()
            .await;

        let generator = DescriptionGenerator::new(
            Some("sk-wrong".to_string()),
            "gpt-4o-mini",
            format!("{}/v1", server.url()),
        );

        let description = generator.describe("", "").await;
        assert!(description.starts_with("OpenAI error: "), "{description}");
        assert!(description.contains("401"), "{description}");
    }
}
