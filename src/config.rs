//! Process-wide configuration.
//!
//! Everything is read once at startup from the environment (after loading an
//! optional `.env` file) into an immutable [`Config`] that is passed by
//! reference from then on.

use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_BING_VISUAL_SEARCH_URL: &str =
    "https://api.bing.microsoft.com/v7.0/images/visualsearch";
pub const DEFAULT_OCR_SPACE_URL: &str = "https://api.ocr.space/parse/image";
pub const DEFAULT_PURGE_AFTER_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_api_base: String,
    pub bing_search_key: Option<String>,
    pub bing_visual_search_url: String,
    pub ocr_space_key: Option<String>,
    pub ocr_space_url: String,
    /// Local recognizer binary; `None` disables local recognition.
    pub tesseract_cmd: Option<String>,
    pub database_url: String,
    pub upload_dir: PathBuf,
    /// Externally visible base URL used to build absolute links.
    pub host_public_url: Option<String>,
    pub purge_after_days: u32,
    pub listen_addr: String,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            bing_search_key: None,
            bing_visual_search_url: DEFAULT_BING_VISUAL_SEARCH_URL.to_string(),
            ocr_space_key: None,
            ocr_space_url: DEFAULT_OCR_SPACE_URL.to_string(),
            tesseract_cmd: Some("tesseract".to_string()),
            database_url: "data.db".to_string(),
            upload_dir: PathBuf::from("uploads"),
            host_public_url: None,
            purge_after_days: DEFAULT_PURGE_AFTER_DAYS,
            listen_addr: "0.0.0.0:5000".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Loads `.env` if present and reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::DotEnv(e));
            }
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Blank credentials count as unset. An empty `TESSERACT_CMD` disables
    /// local recognition.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let secret = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or_default = |key: &str, default: String| secret(key).unwrap_or(default);

        Ok(Config {
            openai_api_key: secret("OPENAI_API_KEY"),
            openai_model: or_default("OPENAI_MODEL", defaults.openai_model),
            openai_api_base: or_default("OPENAI_API_BASE", defaults.openai_api_base),
            bing_search_key: secret("BING_SEARCH_KEY"),
            bing_visual_search_url: or_default(
                "BING_VISUAL_SEARCH_URL",
                defaults.bing_visual_search_url,
            ),
            ocr_space_key: secret("OCR_SPACE_KEY"),
            ocr_space_url: or_default("OCR_SPACE_URL", defaults.ocr_space_url),
            tesseract_cmd: match lookup("TESSERACT_CMD") {
                Some(cmd) if cmd.trim().is_empty() => None,
                Some(cmd) => Some(cmd),
                None => defaults.tesseract_cmd,
            },
            database_url: or_default("DATABASE_URL", defaults.database_url),
            upload_dir: secret("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            host_public_url: secret("HOST_PUBLIC_URL"),
            purge_after_days: parse_or(
                &lookup,
                "PURGE_AFTER_DAYS",
                defaults.purge_after_days,
            )?,
            listen_addr: or_default("LISTEN_ADDR", defaults.listen_addr),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value })
        }
        _ => Ok(default),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to load .env file")]
    DotEnv(#[source] dotenvy::Error),
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, ConfigError};
    use std::{collections::HashMap, path::PathBuf};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(Config::default(), config);
        assert_eq!(30, config.purge_after_days);
        assert_eq!(None, config.openai_api_key);
        assert_eq!(Some("tesseract".to_string()), config.tesseract_cmd);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("BING_SEARCH_KEY", "  "),
            ("UPLOAD_FOLDER", "/srv/uploads"),
            ("HOST_PUBLIC_URL", "https://photos.example.com"),
            ("PURGE_AFTER_DAYS", "7"),
            ("TESSERACT_CMD", ""),
        ]))
        .unwrap();

        assert_eq!(Some("sk-test".to_string()), config.openai_api_key);
        assert_eq!(None, config.bing_search_key);
        assert_eq!(PathBuf::from("/srv/uploads"), config.upload_dir);
        assert_eq!(
            Some("https://photos.example.com".to_string()),
            config.host_public_url
        );
        assert_eq!(7, config.purge_after_days);
        assert_eq!(None, config.tesseract_cmd);
    }

    #[test]
    fn test_invalid_number() {
        let result = Config::from_lookup(lookup(&[("PURGE_AFTER_DAYS", "thirty")]));

        let Err(ConfigError::InvalidValue { key, value }) = result else {
            panic!("Expected InvalidValue error, but got {:?}", result);
        };
        assert_eq!("PURGE_AFTER_DAYS", key);
        assert_eq!("thirty", value);
    }
}
