//! # Consent-Gated Photo Analysis
//!
//! This crate stores photos that users explicitly agreed to upload and helps
//! them find out whether those photos appear elsewhere on the Internet. Every
//! upload and analysis is recorded in an auditable consent log.
//!
//! ## Features
//!
//! - **Upload**: photos are stored under a timestamped, sanitized name that is
//!   never overwritten, together with an upload record and a log entry.
//! - **Analysis**: embedded metadata, recognized text (local `tesseract` first,
//!   OCR.space as fallback), a non-identifying description from a language
//!   model, a Bing visual search and ready-made reverse-search links.
//! - **Retention**: full deletion on request and time-based purging of old uploads.
//!
//! Every external provider is optional. A missing credential or a failing
//! provider shows up as a value in the analysis result, never as a failed request.
//!
//! ## Usage
//!
//! ```no_run
//! use photofinder::app::{AnalyzePhotoCommand, Providers, UploadPhotoCommand};
//! use photofinder::database::Database;
//! use photofinder::links::PublicUrlResolver;
//! use photofinder::storage::Storage;
//!
//! async fn upload_and_analyze(storage: &Storage, db: &Database, bytes: Vec<u8>) {
//!     let urls = PublicUrlResolver::new(Some("https://photos.example.com".to_string()));
//!     let uploaded = UploadPhotoCommand::new(true)
//!         .with_file(Some("holiday.jpg".to_string()), bytes)
//!         .execute(storage, db, &urls)
//!         .await
//!         .unwrap();
//!
//!     let report = AnalyzePhotoCommand::new(Some(uploaded.filename), true)
//!         .execute(storage, db, &Providers::unconfigured(), &urls)
//!         .await
//!         .unwrap();
//!
//!     println!("{}", report.description);
//! }
//! ```

pub mod app;
pub mod config;
pub mod database;
pub mod describe;
mod dialect;
pub mod links;
pub mod metadata;
pub mod ocr;
pub mod provider;
pub mod search;
pub mod storage;

pub mod prelude {
    pub use crate::app::{
        AnalysisReport, AnalyzePhotoCommand, AppError, Providers, RequestContext,
        UploadPhotoCommand, UploadedPhoto, consent_from_json, consent_from_token, delete_all,
        find_upload, list_consent_log, list_uploads, open_upload, purge_old, purge_uploads_before,
    };
    pub use crate::config::Config;
    pub use crate::database::{ConsentLogEntry, Database, UploadRecord};
    pub use crate::links::PublicUrlResolver;
    pub use crate::storage::{Storage, StoredFilename};
}
