//! # Photo Analysis Orchestration
//!
//! This module sequences the record store, the file store and the external
//! providers for each request. It owns consent gating, validation order and
//! response assembly; everything else is delegated.
//!
//! ## Provided Structures
//!
//! - **UploadPhotoCommand**: consent-gated upload. Writes the file, then the
//!   upload record and its `photo_upload` log entry in one transaction,
//!   removing the file again if the transaction fails.
//! - **AnalyzePhotoCommand**: validates, logs `describe_and_search`, then runs
//!   metadata extraction, text recognition → description, and visual search
//!   concurrently. Provider failures are embedded in the [`AnalysisReport`]
//!   instead of failing the request.
//! - **Providers**: the external collaborators, built once from [`Config`].
//!
//! ## Retention
//!
//! - **delete_all**: removes every upload file (best effort) and empties both tables.
//! - **purge_old** / **purge_uploads_before**: removes uploads older than the
//!   retention threshold; the consent log is left alone.
//!
//! Deleting a file that is already gone is never an error, so concurrent or
//! repeated purges are no-ops.

use crate::{
    config::Config,
    database::{ConsentLogEntry, Database, DatabaseError, NewConsentLogEntry, UploadRecord},
    describe::DescriptionGenerator,
    links::{PublicUrlResolver, build_search_links},
    metadata::{MetadataReport, extract_metadata_blocking},
    ocr::RecognizerChain,
    search::{VisualSearchClient, VisualSearchReport},
    storage::{Storage, StorageError, StoredFilename},
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Form values accepted as consent.
pub const ACCEPTED_CONSENT_TOKENS: [&str; 3] = ["yes", "true", "on"];

pub const ACTION_PHOTO_UPLOAD: &str = "photo_upload";
pub const ACTION_DESCRIBE_AND_SEARCH: &str = "describe_and_search";

/// Upper bound on discriminated names tried for same-second uploads.
const MAX_NAME_ATTEMPTS: u32 = 32;

/// Returns whether a form field value grants consent.
pub fn consent_from_token(token: Option<&str>) -> bool {
    token.is_some_and(|t| ACCEPTED_CONSENT_TOKENS.contains(&t))
}

/// Returns whether a JSON value grants consent: `true`, or one of the accepted tokens.
pub fn consent_from_json(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(granted)) => *granted,
        Some(Value::String(token)) => consent_from_token(Some(token)),
        _ => false,
    }
}

/// Who sent a request and where they sent it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
    /// `scheme://host[:port]` the request was addressed to.
    pub origin: String,
}

impl RequestContext {
    fn log_entry(&self, timestamp: i64, action: &str, meta: &str) -> NewConsentLogEntry {
        NewConsentLogEntry {
            timestamp,
            client_address: self.client_address.clone(),
            client_agent: self.client_agent.clone(),
            action: action.to_string(),
            meta: meta.to_string(),
        }
    }
}

/// The external collaborators used by the analysis.
pub struct Providers {
    pub recognizer: RecognizerChain,
    pub describer: DescriptionGenerator,
    pub visual_search: VisualSearchClient,
}

impl Providers {
    pub fn from_config(config: &Config) -> Self {
        Self {
            recognizer: RecognizerChain::from_config(config),
            describer: DescriptionGenerator::from_config(config),
            visual_search: VisualSearchClient::from_config(config),
        }
    }

    /// No recognizer and no credentials; every step reports "not configured".
    pub fn unconfigured() -> Self {
        let defaults = Config::default();
        Self {
            recognizer: RecognizerChain::default(),
            describer: DescriptionGenerator::new(
                None,
                defaults.openai_model,
                defaults.openai_api_base,
            ),
            visual_search: VisualSearchClient::new(None, defaults.bing_visual_search_url),
        }
    }
}

/// Command storing one uploaded photo.
///
/// Consent is checked before the file, and nothing is written unless both
/// checks pass.
pub struct UploadPhotoCommand {
    /// Raw file bytes, `None` when no file part was sent.
    pub bytes: Option<Vec<u8>>,
    /// The name the client gave the file.
    pub original_name: Option<String>,
    pub consent: bool,
    pub context: RequestContext,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedPhoto {
    pub filename: String,
    pub url: String,
}

impl UploadPhotoCommand {
    pub fn new(consent: bool) -> Self {
        UploadPhotoCommand {
            bytes: None,
            original_name: None,
            consent,
            context: RequestContext::default(),
        }
    }

    pub fn with_file(mut self, original_name: Option<String>, bytes: Vec<u8>) -> Self {
        self.original_name = original_name;
        self.bytes = Some(bytes);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Executes the upload.
    ///
    /// # Errors
    /// - `AppError::ConsentRequired` without consent.
    /// - `AppError::MissingFile` without a file part, or with an empty unnamed one.
    /// - `AppError::Storage` / `AppError::Database` on infrastructure failure;
    ///   in the database case the written file is removed again.
    pub async fn execute(
        self,
        storage: &Storage,
        db: &Database,
        urls: &PublicUrlResolver,
    ) -> Result<UploadedPhoto, AppError> {
        if !self.consent {
            return Err(AppError::ConsentRequired);
        }

        let unnamed = self
            .original_name
            .as_deref()
            .is_none_or(|n| n.trim().is_empty());
        let bytes = match self.bytes {
            Some(bytes) if !(bytes.is_empty() && unnamed) => bytes,
            _ => return Err(AppError::MissingFile),
        };

        let now = Utc::now().timestamp();
        let name = write_unique(storage, now, self.original_name.as_deref(), &bytes)?;

        let entry = self
            .context
            .log_entry(now, ACTION_PHOTO_UPLOAD, name.as_str());

        if let Err(e) = db.insert_upload_with_log(name.as_str(), now, "", &entry).await {
            if let Err(cleanup) = storage.ensure_deleted(&name) {
                tracing::error!(filename = %name, error = %cleanup, "failed to remove orphaned upload");
            }
            return Err(e.into());
        }

        tracing::info!(filename = %name, size = bytes.len(), "photo uploaded");

        Ok(UploadedPhoto {
            url: urls.resolve(&self.context.origin, name.as_str()),
            filename: name.into(),
        })
    }
}

fn write_unique(
    storage: &Storage,
    timestamp: i64,
    original_name: Option<&str>,
    bytes: &[u8],
) -> Result<StoredFilename, StorageError> {
    let mut attempt = 0;
    loop {
        let name = StoredFilename::generate(timestamp, original_name, attempt);
        match storage.create_file(&name, bytes) {
            Ok(()) => return Ok(name),
            Err(StorageError::NameCollision { .. }) if attempt + 1 < MAX_NAME_ATTEMPTS => {
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Command running the full analysis of a stored upload.
pub struct AnalyzePhotoCommand {
    pub filename: Option<String>,
    pub consent: bool,
    /// Run the visual search provider.
    pub use_visual_search: bool,
    /// Accepted for API compatibility; the Yandex link is always built.
    pub use_yandex: bool,
    pub context: RequestContext,
}

/// Aggregate result of an analysis.
///
/// Field names on the wire follow the public JSON API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub filename: String,
    pub public_url: String,
    #[serde(rename = "exif")]
    pub metadata: MetadataReport,
    #[serde(rename = "ocr_text")]
    pub recognized_text: String,
    #[serde(rename = "openai_description")]
    pub description: String,
    /// `None` when visual search was not requested.
    #[serde(rename = "bing")]
    pub visual_search: Option<VisualSearchReport>,
    pub search_links: BTreeMap<&'static str, String>,
}

impl AnalyzePhotoCommand {
    pub fn new(filename: Option<String>, consent: bool) -> Self {
        AnalyzePhotoCommand {
            filename,
            consent,
            use_visual_search: true,
            use_yandex: true,
            context: RequestContext::default(),
        }
    }

    pub fn with_visual_search(mut self, enabled: bool) -> Self {
        self.use_visual_search = enabled;
        self
    }

    pub fn with_yandex(mut self, enabled: bool) -> Self {
        self.use_yandex = enabled;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Validates the request, logs it, and assembles the report.
    ///
    /// # Errors
    /// - `AppError::ConsentRequired`, `AppError::MissingFilename`,
    ///   `AppError::NotFound`, checked in that order before anything is logged.
    /// - `AppError::Database` if the log entry cannot be written.
    pub async fn execute(
        self,
        storage: &Storage,
        db: &Database,
        providers: &Providers,
        urls: &PublicUrlResolver,
    ) -> Result<AnalysisReport, AppError> {
        if !self.consent {
            return Err(AppError::ConsentRequired);
        }

        let filename = match self.filename {
            Some(filename) if !filename.is_empty() => filename,
            _ => return Err(AppError::MissingFilename),
        };

        let name = find_stored_upload(storage, db, &filename).await?;

        db.insert_consent_log(&self.context.log_entry(
            Utc::now().timestamp(),
            ACTION_DESCRIBE_AND_SEARCH,
            name.as_str(),
        ))
        .await?;

        let path = storage.path_of(&name);
        let notes = format!("filename={}", name);
        let use_visual_search = self.use_visual_search;

        let (metadata, (recognized_text, description), visual_search) = tokio::join!(
            extract_metadata_blocking(path.clone()),
            async {
                let text = providers.recognizer.recognize(&path).await;
                let description = providers.describer.describe(&text, &notes).await;
                (text, description)
            },
            async {
                if use_visual_search {
                    Some(providers.visual_search.search(&path).await)
                } else {
                    None
                }
            },
        );

        let public_url = urls.resolve(&self.context.origin, name.as_str());
        let search_links = build_search_links(&public_url);

        tracing::info!(
            filename = %name,
            text_len = recognized_text.len(),
            visual_search = use_visual_search,
            "photo analyzed"
        );

        Ok(AnalysisReport {
            filename: name.into(),
            public_url,
            metadata,
            recognized_text,
            description,
            visual_search,
            search_links,
        })
    }
}

/// Resolves a client-supplied name to an upload that has both a record and a file.
async fn find_stored_upload(
    storage: &Storage,
    db: &Database,
    filename: &str,
) -> Result<StoredFilename, AppError> {
    let not_found = || AppError::NotFound {
        filename: filename.to_string(),
    };

    let name = StoredFilename::try_from(filename).map_err(|_| not_found())?;

    if db.find_upload_by_filename(name.as_str()).await?.is_none() || !storage.exists(&name) {
        return Err(not_found());
    }

    Ok(name)
}

/// Reads a stored upload for serving, with its sniffed MIME type.
///
/// # Errors
/// - `AppError::NotFound` for names that are not valid stored filenames or
///   have no file.
pub fn open_upload(storage: &Storage, filename: &str) -> Result<(Vec<u8>, &'static str), AppError> {
    let not_found = || AppError::NotFound {
        filename: filename.to_string(),
    };

    let name = StoredFilename::try_from(filename).map_err(|_| not_found())?;
    let bytes = match storage.read(&name) {
        Ok(bytes) => bytes,
        Err(StorageError::FileNotFound { .. }) => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };

    let mime = infer::get(&bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");

    Ok((bytes, mime))
}

/// Removes the file behind a record, logging instead of failing.
///
/// Returns whether a file was actually removed.
fn remove_file_best_effort(storage: &Storage, record: &UploadRecord) -> bool {
    let name = match StoredFilename::try_from(record.filename.as_str()) {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(filename = %record.filename, error = %e, "record holds an invalid filename, file left alone");
            return false;
        }
    };

    match storage.ensure_deleted(&name) {
        Ok(removed) => removed,
        Err(e) => {
            tracing::warn!(filename = %name, error = %e, "failed to remove upload file");
            false
        }
    }
}

/// Deletes every upload file, then empties both tables.
///
/// Returns the filenames whose file was removed from disk by this call.
pub async fn delete_all(storage: &Storage, db: &Database) -> Result<Vec<String>, AppError> {
    let records = db.list_uploads().await?;

    let deleted: Vec<String> = records
        .into_iter()
        .filter(|record| remove_file_best_effort(storage, record))
        .map(|record| record.filename)
        .collect();

    db.clear_all().await?;

    tracing::info!(files = deleted.len(), "all uploads and logs deleted");

    Ok(deleted)
}

/// Removes every upload created strictly before `cutoff`, file and record.
///
/// Returns the filenames of all removed records, whether or not a file was
/// still present. The consent log is not touched.
pub async fn purge_uploads_before(
    storage: &Storage,
    db: &Database,
    cutoff: DateTime<Utc>,
) -> Result<Vec<String>, AppError> {
    let records = db.list_uploads_before(cutoff.timestamp()).await?;

    let mut purged = Vec::with_capacity(records.len());
    for record in records {
        remove_file_best_effort(storage, &record);
        db.delete_upload(record.id).await?;
        purged.push(record.filename);
    }

    tracing::info!(cutoff = %cutoff, purged = purged.len(), "old uploads purged");

    Ok(purged)
}

/// Purges uploads older than `retention_days` days.
pub async fn purge_old(
    storage: &Storage,
    db: &Database,
    retention_days: u32,
) -> Result<Vec<String>, AppError> {
    let cutoff = Utc::now() - TimeDelta::days(i64::from(retention_days));
    purge_uploads_before(storage, db, cutoff).await
}

pub async fn find_upload(db: &Database, filename: &str) -> Result<Option<UploadRecord>, AppError> {
    Ok(db.find_upload_by_filename(filename).await?)
}

pub async fn list_uploads(db: &Database) -> Result<Vec<UploadRecord>, AppError> {
    Ok(db.list_uploads().await?)
}

pub async fn list_consent_log(db: &Database) -> Result<Vec<ConsentLogEntry>, AppError> {
    db.list_consent_log().await.map_err(AppError::from)
}

/// Error types within the application.
///
/// The first four variants are validation failures reported to the caller;
/// the rest are infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("consent required")]
    ConsentRequired,

    #[error("no file supplied")]
    MissingFile,

    #[error("no filename supplied")]
    MissingFilename,

    #[error("upload not found: {filename}")]
    NotFound { filename: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}
