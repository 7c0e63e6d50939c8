//! Reverse image search through the Bing Visual Search API.

use crate::{config::Config, provider::ProviderError};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::Value;
use std::{path::Path, time::Duration};

/// One candidate page or image returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub name: String,
    pub url: String,
}

/// Outcome of a visual search, embedded as-is in the analysis response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VisualSearchReport {
    Matches {
        raw: Value,
        extracted: Vec<SearchMatch>,
    },
    /// The provider answered with a non-success status.
    Rejected { error: String, detail: String },
    Failed { error: String },
}

impl VisualSearchReport {
    pub fn not_configured() -> Self {
        VisualSearchReport::Failed {
            error: "BING_SEARCH_KEY not configured".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisualSearchClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl VisualSearchClient {
    pub fn new(api_key: Option<String>, endpoint: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to create HTTP client for Bing Visual Search, using default client");
                reqwest::Client::default()
            });

        Self {
            http_client,
            api_key,
            endpoint: endpoint.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.bing_search_key.clone(),
            config.bing_visual_search_url.clone(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Submits the image at `path`; never fails.
    pub async fn search(&self, path: &Path) -> VisualSearchReport {
        let Some(api_key) = &self.api_key else {
            return VisualSearchReport::not_configured();
        };

        match self.submit(api_key, path).await {
            Ok(raw) => {
                let extracted = extract_matches(&raw);
                VisualSearchReport::Matches { raw, extracted }
            }
            Err(ProviderError::Status { body, .. }) => VisualSearchReport::Rejected {
                error: "bing_error".to_string(),
                detail: body,
            },
            Err(e) => {
                tracing::warn!(error = %e, "visual search failed");
                VisualSearchReport::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn submit(&self, api_key: &str, path: &Path) -> Result<Value, ProviderError> {
        let bytes = tokio::fs::read(path).await?;
        let part = Part::bytes(bytes)
            .file_name("image.jpg")
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("image", part);

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", api_key)
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

        Ok(response.json().await?)
    }
}

/// Flattens `tags[].actions[]` into name/url pairs.
///
/// The URL is the first non-empty one of `webSearchUrl`, `hostPageDisplayUrl`
/// and `thumbnailUrl`; actions with none of them are dropped.
pub fn extract_matches(raw: &Value) -> Vec<SearchMatch> {
    let tags = raw.get("tags").and_then(Value::as_array);

    tags.into_iter()
        .flatten()
        .filter_map(|tag| tag.get("actions").and_then(Value::as_array))
        .flatten()
        .filter_map(|action| {
            let url = ["webSearchUrl", "hostPageDisplayUrl", "thumbnailUrl"]
                .iter()
                .find_map(|key| {
                    action
                        .get(key)
                        .and_then(Value::as_str)
                        .filter(|url| !url.is_empty())
                })?;
            let name = action
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or_default();

            Some(SearchMatch {
                name: name.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::search::{SearchMatch, VisualSearchClient, VisualSearchReport, extract_matches};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_extract_matches() {
        let raw = json!({
            "tags": [
                {
                    "displayName": "",
                    "actions": [
                        { "actionType": "PagesIncluding", "webSearchUrl": "https://bing.com/a", "displayName": "Pages" },
                        { "actionType": "Host", "hostPageDisplayUrl": "example.com/b" },
                        { "actionType": "Thumb", "thumbnailUrl": "https://tse.mm.bing.net/c", "displayName": "Thumb" },
                        { "actionType": "Nothing", "displayName": "No url" },
                        { "actionType": "Blank", "webSearchUrl": "", "hostPageDisplayUrl": "example.com/e", "displayName": "Blank" },
                        { "actionType": "AllBlank", "webSearchUrl": "", "thumbnailUrl": "" }
                    ]
                },
                { "displayName": "no actions" },
                { "actions": [ { "webSearchUrl": "https://bing.com/d", "hostPageDisplayUrl": "ignored" } ] }
            ]
        });

        assert_eq!(
            vec![
                SearchMatch { name: "Pages".to_string(), url: "https://bing.com/a".to_string() },
                SearchMatch { name: "".to_string(), url: "example.com/b".to_string() },
                SearchMatch { name: "Thumb".to_string(), url: "https://tse.mm.bing.net/c".to_string() },
                SearchMatch { name: "Blank".to_string(), url: "example.com/e".to_string() },
                SearchMatch { name: "".to_string(), url: "https://bing.com/d".to_string() },
            ],
            extract_matches(&raw)
        );
    }

    #[test]
    fn test_extract_matches_without_tags() {
        assert!(extract_matches(&json!({ "_type": "ImageKnowledge" })).is_empty());
    }

    #[tokio::test]
    async fn test_not_configured() {
        let client = VisualSearchClient::new(None, "http://127.0.0.1:9");
        let tmp_dir = TempDir::new().unwrap();

        let report = client.search(&tmp_dir.path().join("1_a.png")).await;

        assert_eq!(VisualSearchReport::not_configured(), report);
        assert_eq!(
            json!({ "error": "BING_SEARCH_KEY not configured" }),
            serde_json::to_value(report).unwrap()
        );
    }

    #[tokio::test]
    async fn test_search() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/visualsearch")
            .match_header("ocp-apim-subscription-key", "bing-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"tags":[{"actions":[{"webSearchUrl":"https://bing.com/a","displayName":"A"}]}]}"#)
            .create_async()
            .await;

        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("1_a.png");
        std::fs::write(&path, b"png").unwrap();

        let client = VisualSearchClient::new(
            Some("bing-key".to_string()),
            format!("{}/visualsearch", server.url()),
        );

        let VisualSearchReport::Matches { raw, extracted } = client.search(&path).await else {
            panic!("Expected matches");
        };
        assert_eq!("https://bing.com/a", raw["tags"][0]["actions"][0]["webSearchUrl"]);
        assert_eq!(
            vec![SearchMatch { name: "A".to_string(), url: "https://bing.com/a".to_string() }],
            extracted
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/visualsearch")
            .with_status(401)
            .with_body("access denied")
            .create_async()
            .await;

        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("1_a.png");
        std::fs::write(&path, b"png").unwrap();

        let client = VisualSearchClient::new(
            Some("bad".to_string()),
            format!("{}/visualsearch", server.url()),
        );

        assert_eq!(
            VisualSearchReport::Rejected {
                error: "bing_error".to_string(),
                detail: "access denied".to_string(),
            },
            client.search(&path).await
        );
    }

    #[tokio::test]
    async fn test_search_missing_file() {
        let tmp_dir = TempDir::new().unwrap();
        let client = VisualSearchClient::new(Some("key".to_string()), "http://127.0.0.1:9");

        assert!(matches!(
            client.search(&tmp_dir.path().join("gone.png")).await,
            VisualSearchReport::Failed { .. }
        ));
    }
}
