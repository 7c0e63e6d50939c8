use super::{Db, Dialect};
use sqlx::Row;

/// SQLite dialect implementation of the `Dialect` trait.
#[cfg(feature = "sqlite")]
pub struct SqliteDialect;

#[cfg(feature = "sqlite")]
impl Dialect for SqliteDialect {
    fn placeholder(_idx: usize) -> String {
        "?".to_string()
    }

    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
        let stmts = vec![
            r#"CREATE TABLE IF NOT EXISTS consent_log (
                id INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                ip TEXT,
                user_agent TEXT,
                action TEXT NOT NULL,
                meta TEXT NOT NULL DEFAULT ''
            );"#,
            r#"CREATE TABLE IF NOT EXISTS uploads (
                id INTEGER PRIMARY KEY,
                filename TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                meta TEXT NOT NULL DEFAULT ''
            );"#,
            r#"CREATE INDEX IF NOT EXISTS uploads_timestamp_idx ON uploads (timestamp);"#,
        ];

        for stmt in stmts {
            sqlx::query(stmt).execute(pool).await?;
        }

        maybe_add_filename_index(pool).await?;

        Ok(())
    }
}

/// Databases created before filenames were enforced unique may hold duplicates,
/// in which case the unique index is skipped rather than failing startup.
async fn maybe_add_filename_index(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
    let rows = sqlx::query("PRAGMA index_list(uploads);")
        .fetch_all(pool)
        .await?;

    let has_index = rows.iter().any(|row| {
        let name: &str = row.get("name");
        name == "uploads_filename_idx"
    });

    if has_index {
        return Ok(());
    }

    let duplicates: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM (SELECT filename FROM uploads GROUP BY filename HAVING COUNT(*) > 1);",
    )
    .fetch_one(pool)
    .await?;

    if duplicates == 0 {
        sqlx::query("CREATE UNIQUE INDEX uploads_filename_idx ON uploads (filename);")
            .execute(pool)
            .await?;
    } else {
        tracing::warn!(
            duplicates,
            "uploads table holds duplicate filenames, unique index not created"
        );
    }

    Ok(())
}
