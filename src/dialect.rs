//! # SQL Dialect Module
//!
//! This module defines the `Dialect` trait, which owns every SQL statement the
//! record store issues against the `consent_log` and `uploads` tables, together
//! with the schema migration. Keeping the statements here lets `database.rs`
//! stay focused on binding, retrying and error context.
//!
//! The dialect in use is chosen at compile time by feature flags. When the
//! `sqlite` feature is enabled, the `CurrentDialect` type alias is set to
//! `sqlite::SqliteDialect`.

#[cfg(feature = "sqlite")]
mod sqlite;

/// The current SQL dialect used at compile time, determined by feature flags.
#[cfg(feature = "sqlite")]
pub type CurrentDialect = sqlite::SqliteDialect;

#[cfg(feature = "sqlite")]
pub type Db = sqlx::Sqlite;

#[cfg(feature = "sqlite")]
pub type CurrentRow = sqlx::sqlite::SqliteRow;

/// A trait for SQL dialects to support database-specific query generation.
///
/// Only the placeholder syntax and the migration differ between databases;
/// the statements themselves are shared default methods.
pub trait Dialect {
    /// Returns the SQL placeholder syntax for the given parameter index.
    ///
    /// # Parameters
    /// - `idx`: The 1-based parameter index (used in dialects that number placeholders).
    fn placeholder(idx: usize) -> String;

    /// Returns the SQL statement appending one row to `consent_log`.
    fn insert_consent_log_statement() -> String {
        format!(
            "INSERT INTO consent_log (timestamp, ip, user_agent, action, meta) VALUES ({}, {}, {}, {}, {})",
            Self::placeholder(1),
            Self::placeholder(2),
            Self::placeholder(3),
            Self::placeholder(4),
            Self::placeholder(5),
        )
    }

    /// Returns the SQL statement inserting one upload record.
    fn insert_upload_statement() -> String {
        format!(
            "INSERT INTO uploads (filename, timestamp, meta) VALUES ({}, {}, {})",
            Self::placeholder(1),
            Self::placeholder(2),
            Self::placeholder(3),
        )
    }

    fn query_upload_by_filename_statement() -> String {
        format!(
            "SELECT id, filename, timestamp, meta FROM uploads WHERE filename = {}",
            Self::placeholder(1)
        )
    }

    fn query_uploads_statement() -> String {
        "SELECT id, filename, timestamp, meta FROM uploads ORDER BY id".to_string()
    }

    /// Returns the SQL statement selecting uploads created strictly before a cutoff.
    fn query_uploads_before_statement() -> String {
        format!(
            "SELECT id, filename, timestamp, meta FROM uploads WHERE timestamp < {} ORDER BY id",
            Self::placeholder(1)
        )
    }

    fn query_consent_log_statement() -> String {
        "SELECT id, timestamp, ip, user_agent, action, meta FROM consent_log ORDER BY id"
            .to_string()
    }

    fn delete_upload_statement() -> String {
        format!("DELETE FROM uploads WHERE id = {}", Self::placeholder(1))
    }

    fn delete_all_uploads_statement() -> String {
        "DELETE FROM uploads".to_string()
    }

    fn delete_all_consent_log_statement() -> String {
        "DELETE FROM consent_log".to_string()
    }

    /// Creates the tables and indexes if they do not exist yet.
    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error>;
}
