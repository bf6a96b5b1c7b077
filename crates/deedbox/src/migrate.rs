use anyhow::Result;
use sqlx::SqlitePool;

/// Create the chunk schema if it does not exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            document_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (document_path, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
