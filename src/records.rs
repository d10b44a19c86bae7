//! Record store: the authoritative mapping from stable file identity to
//! current path, lifecycle state, and last processed content hash.
//!
//! Backed by the SQLite `files` table. A partial unique index allows at
//! most one `active` record per path; tombstoned (`deleted`) records keep
//! their last path until purged.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::IndexError;
use crate::models::{FileRecord, FileState};

const COLUMNS: &str = "id, path, state, content_hash, created_at, updated_at";

/// Result of re-pointing a record at a new path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    /// The moved record, now at the destination path.
    pub record: FileRecord,
    /// A record that was active at the destination and has been tombstoned.
    pub displaced: Option<FileRecord>,
}

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Return the active record for `path`, creating one if none exists.
    pub async fn upsert_active(&self, path: &Path) -> Result<FileRecord, IndexError> {
        if let Some(record) = self.get_active_by_path(path).await? {
            return Ok(record);
        }

        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO files (id, path, state, content_hash, created_at, updated_at) \
             VALUES (?, ?, 'active', NULL, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(path_key(path))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        // Re-read: either our insert or a concurrent one won.
        self.get_active_by_path(path).await?.ok_or_else(|| {
            IndexError::IdentityConflict(format!(
                "no active record for {} after insert",
                path.display()
            ))
        })
    }

    /// Re-point the active record at `old_path` to `new_path`, preserving
    /// its identity. An active record already at `new_path` is tombstoned in
    /// the same transaction. Returns `None` when `old_path` is untracked.
    pub async fn mark_moved(
        &self,
        old_path: &Path,
        new_path: &Path,
    ) -> Result<Option<MoveOutcome>, IndexError> {
        let mut tx = self.pool.begin().await?;

        let Some(mut record) = fetch_active(&mut *tx, &path_key(old_path)).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        if old_path == new_path {
            tx.rollback().await?;
            return Ok(Some(MoveOutcome {
                record,
                displaced: None,
            }));
        }

        let now = Utc::now().timestamp();
        let mut displaced = fetch_active(&mut *tx, &path_key(new_path)).await?;
        if let Some(d) = displaced.as_mut() {
            sqlx::query("UPDATE files SET state = 'deleted', updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(&d.file_id)
                .execute(&mut *tx)
                .await?;
            d.state = FileState::Deleted;
            d.updated_at = now;
        }

        sqlx::query("UPDATE files SET path = ?, updated_at = ? WHERE id = ?")
            .bind(path_key(new_path))
            .bind(now)
            .bind(&record.file_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        tx.commit().await?;

        record.path = new_path.to_path_buf();
        record.updated_at = now;
        Ok(Some(MoveOutcome { record, displaced }))
    }

    /// Tombstone the active record at `path`, returning its id.
    pub async fn mark_deleted(&self, path: &Path) -> Result<Option<String>, IndexError> {
        let id: Option<String> = sqlx::query_scalar(
            "UPDATE files SET state = 'deleted', updated_at = ? \
             WHERE path = ? AND state = 'active' RETURNING id",
        )
        .bind(Utc::now().timestamp())
        .bind(path_key(path))
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    /// Record a successful run. Fails if the record is no longer active at
    /// `path` (it moved or was deleted while the run was in flight).
    pub async fn mark_indexed(
        &self,
        file_id: &str,
        path: &Path,
        content_hash: &str,
        at: i64,
    ) -> Result<(), IndexError> {
        let result = sqlx::query(
            "UPDATE files SET content_hash = ?, updated_at = ? \
             WHERE id = ? AND path = ? AND state = 'active'",
        )
        .bind(content_hash)
        .bind(at)
        .bind(file_id)
        .bind(path_key(path))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(IndexError::IdentityConflict(format!(
                "{} is no longer active at {}",
                file_id,
                path.display()
            )));
        }
        Ok(())
    }

    pub async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, IndexError> {
        let row = sqlx::query(&format!("SELECT {} FROM files WHERE id = ?", COLUMNS))
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    pub async fn get_active_by_path(&self, path: &Path) -> Result<Option<FileRecord>, IndexError> {
        fetch_active(&self.pool, &path_key(path)).await
    }

    pub async fn list_active(&self) -> Result<Vec<FileRecord>, IndexError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE state = 'active' ORDER BY path",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Active records strictly below directory `dir`.
    pub async fn list_active_under(&self, dir: &Path) -> Result<Vec<FileRecord>, IndexError> {
        let mut prefix = path_key(dir);
        if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
            prefix.push(std::path::MAIN_SEPARATOR);
        }
        let pattern = format!("{}%", escape_like(&prefix));
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE state = 'active' AND path LIKE ? ESCAPE '\\' ORDER BY path",
            COLUMNS
        ))
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn list_all(&self) -> Result<Vec<FileRecord>, IndexError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files ORDER BY state, path",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Permanently remove tombstones last updated before `older_than`
    /// (unix seconds).
    pub async fn purge_tombstones(&self, older_than: i64) -> Result<u64, IndexError> {
        let result = sqlx::query("DELETE FROM files WHERE state = 'deleted' AND updated_at < ?")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn fetch_active<'e, E>(executor: E, path: &str) -> Result<Option<FileRecord>, IndexError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM files WHERE path = ? AND state = 'active'",
        COLUMNS
    ))
    .bind(path)
    .fetch_optional(executor)
    .await?;
    row.map(|r| row_to_record(&r)).transpose()
}

fn row_to_record(row: &SqliteRow) -> Result<FileRecord, IndexError> {
    let state: String = row.try_get("state")?;
    let path: String = row.try_get("path")?;
    Ok(FileRecord {
        file_id: row.try_get("id")?,
        path: PathBuf::from(path),
        state: FileState::parse(&state).ok_or_else(|| {
            IndexError::Records(sqlx::Error::Decode(
                format!("unknown file state: {}", state).into(),
            ))
        })?,
        content_hash: row.try_get("content_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn map_db_err(err: sqlx::Error) -> IndexError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            IndexError::IdentityConflict(db.message().to_string())
        }
        _ => IndexError::Records(err),
    }
}
