use crate::dialect::{CurrentDialect, CurrentRow, Dialect};
pub use crate::dialect::Db;
pub use sqlx::Pool;
use serde::Serialize;
use sqlx::{Execute, FromRow, Row, sqlite::SqliteConnectOptions};
use std::str::FromStr;
use thiserror::Error;

pub async fn run_migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
    CurrentDialect::migration(pool).await
}

/// One row of the append-only `consent_log` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsentLogEntry {
    pub id: i64,
    /// Unix seconds.
    pub timestamp: i64,
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
    pub action: String,
    pub meta: String,
}

impl FromRow<'_, CurrentRow> for ConsentLogEntry {
    fn from_row(row: &CurrentRow) -> Result<Self, sqlx::Error> {
        Ok(ConsentLogEntry {
            id: row.try_get("id")?,
            timestamp: row.try_get("timestamp")?,
            client_address: row.try_get("ip")?,
            client_agent: row.try_get("user_agent")?,
            action: row.try_get("action")?,
            meta: row.try_get("meta")?,
        })
    }
}

/// A log entry that has not been written yet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewConsentLogEntry {
    pub timestamp: i64,
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
    pub action: String,
    pub meta: String,
}

/// One row of the `uploads` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub id: i64,
    pub filename: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub meta: String,
}

impl FromRow<'_, CurrentRow> for UploadRecord {
    fn from_row(row: &CurrentRow) -> Result<Self, sqlx::Error> {
        Ok(UploadRecord {
            id: row.try_get("id")?,
            filename: row.try_get("filename")?,
            timestamp: row.try_get("timestamp")?,
            meta: row.try_get("meta")?,
        })
    }
}

/// The record store: consent log entries and upload records.
///
/// This struct wraps an SQLx connection pool. Every method acquires a pooled
/// connection for the duration of one statement or transaction, so callers
/// never hold a connection across provider calls.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Db>,
}

impl Database {
    pub async fn with_migration(pool: sqlx::Pool<Db>) -> Result<Self, sqlx::Error> {
        run_migration(&pool).await?;

        Ok(Self { pool })
    }

    /// Opens (creating if missing) the database at `url` and runs the migration.
    ///
    /// `url` is either a `sqlite:` URL or a plain file path.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = if url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(url)?
        } else {
            SqliteConnectOptions::new().filename(url)
        }
        .create_if_missing(true);

        let pool = Pool::<Db>::connect_with(options).await?;
        Self::with_migration(pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn retry<F, Fut, T>(&self, mut op: F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DatabaseError>>,
    {
        let max_retries = 3;
        for attempt in 0..max_retries {
            let result = op().await;
            match result {
                Ok(v) => return Ok(v),
                Err(ref e) if e.is_retryable() && attempt + 1 < max_retries => {
                    tracing::debug!(attempt, error = %e, "retrying database operation");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("Retry loop should return before exceeding max_retries")
    }

    /// Appends one entry to `consent_log` and returns its id.
    pub async fn insert_consent_log(
        &self,
        entry: &NewConsentLogEntry,
    ) -> Result<i64, DatabaseError> {
        let stmt = CurrentDialect::insert_consent_log_statement();

        let result = self
            .retry(|| async {
                let query = sqlx::query(&stmt)
                    .bind(entry.timestamp)
                    .bind(entry.client_address.as_deref())
                    .bind(entry.client_agent.as_deref())
                    .bind(&entry.action)
                    .bind(&entry.meta);
                let sql = query.sql();
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::InsertConsentLog {
                            action: entry.action.clone(),
                        },
                        sql: sql.to_string(),
                        source: e,
                    })
            })
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Inserts an upload record and its log entry in one transaction.
    ///
    /// Either both rows exist afterwards or neither does.
    pub async fn insert_upload_with_log(
        &self,
        filename: &str,
        timestamp: i64,
        meta: &str,
        entry: &NewConsentLogEntry,
    ) -> Result<UploadRecord, DatabaseError> {
        let stmt_upload = CurrentDialect::insert_upload_statement();
        let stmt_log = CurrentDialect::insert_consent_log_statement();

        let id = self
            .retry(|| async {
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| DatabaseError::TransactionFailed { source: e })?;

                let inserted = sqlx::query(&stmt_upload)
                    .bind(filename)
                    .bind(timestamp)
                    .bind(meta)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::InsertUpload {
                            filename: filename.to_string(),
                        },
                        sql: stmt_upload.to_string(),
                        source: e,
                    })?;

                sqlx::query(&stmt_log)
                    .bind(entry.timestamp)
                    .bind(entry.client_address.as_deref())
                    .bind(entry.client_agent.as_deref())
                    .bind(&entry.action)
                    .bind(&entry.meta)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::InsertConsentLog {
                            action: entry.action.clone(),
                        },
                        sql: stmt_log.to_string(),
                        source: e,
                    })?;

                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::TransactionFailed { source: e })?;

                Ok::<i64, DatabaseError>(inserted.last_insert_rowid())
            })
            .await?;

        Ok(UploadRecord {
            id,
            filename: filename.to_string(),
            timestamp,
            meta: meta.to_string(),
        })
    }

    pub async fn find_upload_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<UploadRecord>, DatabaseError> {
        let stmt = CurrentDialect::query_upload_by_filename_statement();

        self.retry(|| async {
            sqlx::query_as(&stmt)
                .bind(filename)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::QueryUploads,
                    sql: stmt.to_string(),
                    source: e,
                })
        })
        .await
    }

    pub async fn list_uploads(&self) -> Result<Vec<UploadRecord>, DatabaseError> {
        let stmt = CurrentDialect::query_uploads_statement();

        self.retry(|| async {
            sqlx::query_as(&stmt)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::QueryUploads,
                    sql: stmt.to_string(),
                    source: e,
                })
        })
        .await
    }

    /// Returns every upload whose timestamp is strictly before `cutoff` (unix seconds).
    pub async fn list_uploads_before(
        &self,
        cutoff: i64,
    ) -> Result<Vec<UploadRecord>, DatabaseError> {
        let stmt = CurrentDialect::query_uploads_before_statement();

        self.retry(|| async {
            sqlx::query_as(&stmt)
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::QueryUploads,
                    sql: stmt.to_string(),
                    source: e,
                })
        })
        .await
    }

    pub async fn list_consent_log(&self) -> Result<Vec<ConsentLogEntry>, DatabaseError> {
        let stmt = CurrentDialect::query_consent_log_statement();

        self.retry(|| async {
            sqlx::query_as(&stmt)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::QueryConsentLog,
                    sql: stmt.to_string(),
                    source: e,
                })
        })
        .await
    }

    /// Ensures that the upload record with the given id is removed.
    ///
    /// Removing an id that does not exist succeeds.
    pub async fn delete_upload(&self, id: i64) -> Result<(), DatabaseError> {
        let stmt = CurrentDialect::delete_upload_statement();

        self.retry(|| async {
            sqlx::query(&stmt)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::DeleteUpload { id },
                    sql: stmt.to_string(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    /// Empties both `uploads` and `consent_log`.
    ///
    /// This is a transactional operation; if any step fails, the entire
    /// transaction is rolled back.
    pub async fn clear_all(&self) -> Result<(), DatabaseError> {
        let stmt_uploads = CurrentDialect::delete_all_uploads_statement();
        let stmt_log = CurrentDialect::delete_all_consent_log_statement();

        self.retry(|| async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DatabaseError::TransactionFailed { source: e })?;

            sqlx::query(&stmt_uploads)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::ClearUploads,
                    sql: stmt_uploads.to_string(),
                    source: e,
                })?;

            sqlx::query(&stmt_log)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::ClearConsentLog,
                    sql: stmt_log.to_string(),
                    source: e,
                })?;

            tx.commit()
                .await
                .map_err(|e| DatabaseError::TransactionFailed { source: e })
        })
        .await
    }
}

/// Represents errors that can occur during database operations.
///
/// Each variant includes contextual information to assist with debugging and error handling.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A general SQL query failure, with full context including operation and SQL.
    #[error("Query failed during {operation:?}: sql={sql}")]
    QueryFailed {
        operation: DbOperation,
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    /// A failure to begin or commit a transaction.
    #[error("Failed to operate transaction")]
    TransactionFailed {
        #[source]
        source: sqlx::Error,
    },
}

/// Enum representing the kind of database operation being performed,
/// used for attaching context to [`DatabaseError::QueryFailed`].
#[derive(Debug)]
pub enum DbOperation {
    /// INSERT INTO consent_log
    InsertConsentLog { action: String },
    /// INSERT INTO uploads
    InsertUpload { filename: String },
    /// DELETE FROM uploads WHERE id = ...
    DeleteUpload { id: i64 },
    /// DELETE FROM uploads
    ClearUploads,
    /// DELETE FROM consent_log
    ClearConsentLog,
    QueryUploads,
    QueryConsentLog,
}

impl DatabaseError {
    fn is_retryable(&self) -> bool {
        let is_retryable_kind = |e: &sqlx::Error| {
            matches!(e, sqlx::Error::Io(_))
                || matches!(e, sqlx::Error::Protocol(_))
                || matches!(e, sqlx::Error::PoolTimedOut)
        };

        match self {
            DatabaseError::QueryFailed { source, .. } => is_retryable_kind(source),
            DatabaseError::TransactionFailed { source } => is_retryable_kind(source),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::database::{Database, Db, NewConsentLogEntry, Pool};
    use sqlx::sqlite::SqlitePoolOptions;

    /// Returns an in-memory SQLite connection pool for testing.
    ///
    /// Each SQLite connection to `:memory:` is its own database, so the pool
    /// is pinned to a single connection that is never recycled.
    pub(crate) async fn get_pool() -> Pool<Db> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn log_entry(action: &str, meta: &str) -> NewConsentLogEntry {
        NewConsentLogEntry {
            timestamp: 1_700_000_000,
            client_address: Some("127.0.0.1".to_string()),
            client_agent: Some("test-agent".to_string()),
            action: action.to_string(),
            meta: meta.to_string(),
        }
    }

    /// Verifies that `Database::with_migration` can be called multiple times
    /// on the same pool without error.
    #[tokio::test]
    async fn test_migration_idempotency() {
        let pool = get_pool().await;

        Database::with_migration(pool.clone()).await.unwrap();
        Database::with_migration(pool.clone()).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_consent_log() {
        let db = Database::with_migration(get_pool().await).await.unwrap();

        db.insert_consent_log(&log_entry("photo_upload", "1_a.png"))
            .await
            .unwrap();
        db.insert_consent_log(&NewConsentLogEntry {
            action: "describe_and_search".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let entries = db.list_consent_log().await.unwrap();
        assert_eq!(2, entries.len());
        assert_eq!("photo_upload", entries[0].action);
        assert_eq!("1_a.png", entries[0].meta);
        assert_eq!(Some("127.0.0.1".to_string()), entries[0].client_address);
        assert_eq!(Some("test-agent".to_string()), entries[0].client_agent);
        assert_eq!(None, entries[1].client_address);
    }

    #[tokio::test]
    async fn test_insert_upload_with_log() {
        let db = Database::with_migration(get_pool().await).await.unwrap();

        let record = db
            .insert_upload_with_log("1_a.png", 1, "", &log_entry("photo_upload", "1_a.png"))
            .await
            .unwrap();

        assert_eq!(Some(record), db.find_upload_by_filename("1_a.png").await.unwrap());
        assert_eq!(1, db.list_consent_log().await.unwrap().len());
        assert_eq!(None, db.find_upload_by_filename("2_b.png").await.unwrap());
    }

    /// A duplicate filename violates the unique index; the log row of the
    /// failed transaction must not survive.
    #[tokio::test]
    async fn test_insert_upload_with_log_is_atomic() {
        let db = Database::with_migration(get_pool().await).await.unwrap();

        db.insert_upload_with_log("1_a.png", 1, "", &log_entry("photo_upload", "1_a.png"))
            .await
            .unwrap();
        let result = db
            .insert_upload_with_log("1_a.png", 2, "", &log_entry("photo_upload", "1_a.png"))
            .await;

        assert!(result.is_err());
        assert_eq!(1, db.list_uploads().await.unwrap().len());
        assert_eq!(1, db.list_consent_log().await.unwrap().len());
    }

    #[tokio::test]
    async fn test_list_uploads_before() {
        let db = Database::with_migration(get_pool().await).await.unwrap();
        let entry = log_entry("photo_upload", "");

        db.insert_upload_with_log("100_old.png", 100, "", &entry)
            .await
            .unwrap();
        db.insert_upload_with_log("200_edge.png", 200, "", &entry)
            .await
            .unwrap();
        db.insert_upload_with_log("300_new.png", 300, "", &entry)
            .await
            .unwrap();

        let before: Vec<String> = db
            .list_uploads_before(200)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.filename)
            .collect();

        assert_eq!(vec!["100_old.png".to_string()], before);
    }

    #[tokio::test]
    async fn test_delete_upload_idempotency() {
        let db = Database::with_migration(get_pool().await).await.unwrap();

        let record = db
            .insert_upload_with_log("1_a.png", 1, "", &log_entry("photo_upload", "1_a.png"))
            .await
            .unwrap();

        assert!(db.delete_upload(record.id).await.is_ok());
        assert!(db.delete_upload(record.id).await.is_ok());
        assert!(db.list_uploads().await.unwrap().is_empty());
        assert_eq!(1, db.list_consent_log().await.unwrap().len());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let db = Database::with_migration(get_pool().await).await.unwrap();

        db.insert_upload_with_log("1_a.png", 1, "", &log_entry("photo_upload", "1_a.png"))
            .await
            .unwrap();
        db.insert_consent_log(&log_entry("describe_and_search", "1_a.png"))
            .await
            .unwrap();

        db.clear_all().await.unwrap();

        assert!(db.list_uploads().await.unwrap().is_empty());
        assert!(db.list_consent_log().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let tmp_dir = tempfile::TempDir::new().unwrap();
        let path = tmp_dir.path().join("data.db");

        let db = Database::connect(path.to_str().unwrap()).await.unwrap();
        db.insert_consent_log(&log_entry("photo_upload", ""))
            .await
            .unwrap();
        db.close().await;

        assert!(path.exists());
    }
}
