use anyhow::Result;
use sqlx::SqlitePool;

/// Create the `files` table and its indexes. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            state TEXT NOT NULL CHECK (state IN ('active', 'deleted')),
            content_hash TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one active record per path; tombstones may share a path.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_active_path ON files(path) WHERE state = 'active'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_files_state_updated ON files(state, updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
