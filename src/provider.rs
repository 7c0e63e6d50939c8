//! Errors shared by the external provider clients.
//!
//! These never reach an HTTP caller directly; each call site folds them into
//! the payload it returns.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command exited with {status}: {stderr}")]
    Command { status: String, stderr: String },
}
