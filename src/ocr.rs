//! Text recognition.
//!
//! Recognition is an ordered chain of [`TextRecognizer`] strategies: the local
//! Tesseract binary first, then the OCR.space API when a key is configured.
//! The first strategy producing non-blank text wins; a failing strategy is
//! logged and the chain moves on.

use crate::{config::Config, provider::ProviderError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::{path::Path, time::Duration};
use tokio::process::Command;

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Returns the text visible in the image at `path`, possibly empty.
    async fn recognize(&self, path: &Path) -> Result<String, ProviderError>;
}

/// Runs a local `tesseract` binary: `<cmd> <image> stdout`.
pub struct TesseractRecognizer {
    command: String,
}

impl TesseractRecognizer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, path: &Path) -> Result<String, ProviderError> {
        let output = Command::new(&self.command)
            .arg(path)
            .arg("stdout")
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProviderError::Command {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Remote recognition through the OCR.space `parse/image` endpoint.
pub struct OcrSpaceRecognizer {
    http_client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct OcrSpaceResponse {
    #[serde(rename = "ParsedResults", default)]
    parsed_results: Option<Vec<OcrSpaceParsedResult>>,
}

#[derive(Debug, Deserialize)]
struct OcrSpaceParsedResult {
    #[serde(rename = "ParsedText", default)]
    parsed_text: String,
}

impl OcrSpaceRecognizer {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to create HTTP client for OCR.space, using default client");
                reqwest::Client::default()
            });

        Self {
            http_client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TextRecognizer for OcrSpaceRecognizer {
    fn name(&self) -> &str {
        "ocr.space"
    }

    async fn recognize(&self, path: &Path) -> Result<String, ProviderError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("apikey", self.api_key.clone())
            .text("language", "eng");

        let response = self
            .http_client
            .post(&self.endpoint)
            .multipart(form)
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

        let parsed: OcrSpaceResponse = response.json().await?;

        Ok(parsed
            .parsed_results
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.parsed_text)
            .collect::<Vec<_>>()
            .join(" "))
    }
}

/// Ordered list of recognizers; see the module docs.
#[derive(Default)]
pub struct RecognizerChain {
    strategies: Vec<Box<dyn TextRecognizer>>,
}

impl RecognizerChain {
    pub fn new(strategies: Vec<Box<dyn TextRecognizer>>) -> Self {
        Self { strategies }
    }

    /// Local Tesseract (unless disabled) followed by OCR.space (when a key is set).
    pub fn from_config(config: &Config) -> Self {
        let mut strategies: Vec<Box<dyn TextRecognizer>> = Vec::new();

        if let Some(cmd) = &config.tesseract_cmd {
            strategies.push(Box::new(TesseractRecognizer::new(cmd.clone())));
        }
        if let Some(key) = &config.ocr_space_key {
            strategies.push(Box::new(OcrSpaceRecognizer::new(
                key.clone(),
                config.ocr_space_url.clone(),
            )));
        }

        Self::new(strategies)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Returns the trimmed text of the first strategy that finds any, or an empty string.
    pub async fn recognize(&self, path: &Path) -> String {
        for strategy in &self.strategies {
            match strategy.recognize(path).await {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::debug!(recognizer = strategy.name(), "text recognized");
                    return text.trim().to_string();
                }
                Ok(_) => {
                    tracing::debug!(recognizer = strategy.name(), "no text recognized");
                }
                Err(e) => {
                    tracing::warn!(recognizer = strategy.name(), error = %e, "text recognition failed");
                }
            }
        }

        String::new()
    }
}
