//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ChunkRepo, CommitRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ChunkRepo + CommitRepo + Send + Sync {
    /// Create tables and indexes if missing.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_secs: u64) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        // A single connection serializes writers inside this process; the
        // busy timeout covers other processes sharing the file.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "sqlite metadata store ready");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{
        ChunkRow, CommitRow, STATE_COMMITTED, STATE_COMMITTING, sequence_to_db,
    };
    use crate::repos::{CommitStatus, LeaseOutcome, PutOutcome};
    use ferry_core::{
        BlockId, ChunkRecord, CommittedObject, ObjectName, SequenceKey, UploadName,
    };
    use time::OffsetDateTime;

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        err.as_database_error()
            .is_some_and(|db| db.message().contains("UNIQUE constraint"))
    }

    fn to_i64(column: &str, value: u64) -> MetadataResult<i64> {
        i64::try_from(value)
            .map_err(|_| MetadataError::Constraint(format!("{column} {value} too large")))
    }

    #[async_trait]
    impl ChunkRepo for SqliteStore {
        async fn put_chunk(&self, record: &ChunkRecord) -> MetadataResult<PutOutcome> {
            let row = ChunkRow::from_record(record)?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO chunk_records
                    (upload_id, sequence_key, block_id, content_hash, size_bytes, is_final,
                     created_at, object_name, content_type)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(upload_id, sequence_key) DO NOTHING
                "#,
            )
            .bind(&row.upload_id)
            .bind(row.sequence_key)
            .bind(&row.block_id)
            .bind(&row.content_hash)
            .bind(row.size_bytes)
            .bind(row.is_final)
            .bind(row.created_at)
            .bind(&row.object_name)
            .bind(&row.content_type)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(result) if result.rows_affected() > 0 => Ok(PutOutcome::Inserted),
                Ok(_) => {
                    let existing = self
                        .get_chunk(&record.upload, record.sequence)
                        .await?
                        .ok_or_else(|| {
                            MetadataError::NotFound(format!(
                                "chunk {}/{} vanished after conflict",
                                record.upload, record.sequence
                            ))
                        })?;
                    Ok(PutOutcome::Existing(existing))
                }
                // The key conflict is absorbed above, so a unique violation on a
                // final record comes from the one-final-per-upload index.
                Err(e) if record.is_final && is_unique_violation(&e) => {
                    let existing = self.final_chunk(&record.upload).await?.ok_or_else(|| {
                        MetadataError::Constraint(format!(
                            "final chunk conflict for {} without a final record",
                            record.upload
                        ))
                    })?;
                    Ok(PutOutcome::FinalConflict(existing))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_chunk(
            &self,
            upload: &UploadName,
            sequence: SequenceKey,
        ) -> MetadataResult<Option<ChunkRecord>> {
            let row = sqlx::query_as::<_, ChunkRow>(
                "SELECT * FROM chunk_records WHERE upload_id = ? AND sequence_key = ?",
            )
            .bind(upload.as_str())
            .bind(sequence_to_db(sequence)?)
            .fetch_optional(&self.pool)
            .await?;
            row.map(ChunkRow::into_record).transpose()
        }

        async fn list_by_upload(&self, upload: &UploadName) -> MetadataResult<Vec<ChunkRecord>> {
            let rows = sqlx::query_as::<_, ChunkRow>(
                "SELECT * FROM chunk_records WHERE upload_id = ? ORDER BY sequence_key ASC",
            )
            .bind(upload.as_str())
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(ChunkRow::into_record).collect()
        }

        async fn final_chunk(&self, upload: &UploadName) -> MetadataResult<Option<ChunkRecord>> {
            let row = sqlx::query_as::<_, ChunkRow>(
                "SELECT * FROM chunk_records WHERE upload_id = ? AND is_final = 1",
            )
            .bind(upload.as_str())
            .fetch_optional(&self.pool)
            .await?;
            row.map(ChunkRow::into_record).transpose()
        }

        async fn delete_upload_chunks(&self, upload: &UploadName) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM chunk_records WHERE upload_id = ?")
                .bind(upload.as_str())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn list_stale_uploads(
            &self,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadName>> {
            let ids: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT c.upload_id
                FROM chunk_records c
                LEFT JOIN upload_commits m
                    ON m.upload_id = c.upload_id AND m.state = 'committed'
                WHERE m.upload_id IS NULL
                GROUP BY c.upload_id
                HAVING MAX(c.created_at) < ?
                ORDER BY MAX(c.created_at) ASC
                LIMIT ?
                "#,
            )
            .bind(older_than)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            ids.iter()
                .map(|id| UploadName::parse(id).map_err(MetadataError::from))
                .collect()
        }
    }

    /// Upload other than `upload` whose lease or marker claims `object`.
    async fn name_holder(
        conn: &mut sqlx::SqliteConnection,
        upload: &UploadName,
        object: &ObjectName,
    ) -> MetadataResult<Option<UploadName>> {
        let holder: Option<String> = sqlx::query_scalar(
            "SELECT upload_id FROM upload_commits WHERE object_name = ? AND upload_id != ?",
        )
        .bind(object.as_str())
        .bind(upload.as_str())
        .fetch_optional(conn)
        .await?;
        holder
            .map(|id| UploadName::parse(&id).map_err(MetadataError::from))
            .transpose()
    }

    #[async_trait]
    impl CommitRepo for SqliteStore {
        async fn acquire_commit_lease(
            &self,
            upload: &UploadName,
            object: &ObjectName,
            content_type: &str,
            owner: &str,
            now: OffsetDateTime,
            expires_at: OffsetDateTime,
        ) -> MetadataResult<LeaseOutcome> {
            let mut tx = self.pool.begin().await?;

            let existing = sqlx::query_as::<_, CommitRow>(
                "SELECT * FROM upload_commits WHERE upload_id = ?",
            )
            .bind(upload.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            if existing.as_ref().is_none_or(|row| row.state != STATE_COMMITTED)
                && let Some(holder) = name_holder(&mut *tx, upload, object).await?
            {
                tx.commit().await?;
                return Ok(LeaseOutcome::NameTaken { holder });
            }

            let outcome = match existing {
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO upload_commits
                            (upload_id, object_name, content_type, state, lease_owner, lease_expires_at, updated_at)
                        VALUES (?, ?, ?, 'committing', ?, ?, ?)
                        "#,
                    )
                    .bind(upload.as_str())
                    .bind(object.as_str())
                    .bind(content_type)
                    .bind(owner)
                    .bind(expires_at)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    LeaseOutcome::Acquired
                }
                Some(row) if row.state == STATE_COMMITTED => match row.committed_object()? {
                    Some(committed) => LeaseOutcome::Committed(committed),
                    None => {
                        return Err(MetadataError::Corrupt(format!(
                            "upload {upload} marked committed without object"
                        )));
                    }
                },
                Some(row) => {
                    let expired = row.lease_expires_at.is_none_or(|at| at < now);
                    let ours = row.lease_owner.as_deref() == Some(owner);
                    if expired || ours {
                        // Conditional on the owner we read, so a racing
                        // takeover from another process wins at most once.
                        let result = sqlx::query(
                            r#"
                            UPDATE upload_commits
                            SET lease_owner = ?, lease_expires_at = ?, object_name = ?,
                                content_type = ?, updated_at = ?
                            WHERE upload_id = ? AND state = 'committing' AND lease_owner IS ?
                            "#,
                        )
                        .bind(owner)
                        .bind(expires_at)
                        .bind(object.as_str())
                        .bind(content_type)
                        .bind(now)
                        .bind(upload.as_str())
                        .bind(row.lease_owner.as_deref())
                        .execute(&mut *tx)
                        .await?;
                        if result.rows_affected() > 0 {
                            LeaseOutcome::Acquired
                        } else {
                            LeaseOutcome::Held {
                                owner: row.lease_owner.unwrap_or_default(),
                                lease_expires_at: row.lease_expires_at.unwrap_or(now),
                            }
                        }
                    } else {
                        LeaseOutcome::Held {
                            owner: row.lease_owner.unwrap_or_default(),
                            lease_expires_at: row.lease_expires_at.unwrap_or(now),
                        }
                    }
                }
            };

            tx.commit().await?;
            Ok(outcome)
        }

        async fn mark_committed(
            &self,
            upload: &UploadName,
            owner: &str,
            object: &CommittedObject,
            block_ids: &[BlockId],
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                r#"
                UPDATE upload_commits
                SET state = ?, object_name = ?, content_type = ?, lease_owner = NULL,
                    lease_expires_at = NULL, final_sequence = ?, block_count = ?,
                    total_size = ?, committed_at = ?, updated_at = ?
                WHERE upload_id = ? AND state = ? AND lease_owner = ?
                "#,
            )
            .bind(STATE_COMMITTED)
            .bind(object.name.as_str())
            .bind(&object.content_type)
            .bind(sequence_to_db(object.final_sequence)?)
            .bind(to_i64("block_count", object.block_count)?)
            .bind(to_i64("total_size", object.size_bytes)?)
            .bind(object.committed_at)
            .bind(object.committed_at)
            .bind(upload.as_str())
            .bind(STATE_COMMITTING)
            .bind(owner)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Ok(false);
            }

            for (index, block_id) in block_ids.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO committed_blocks (upload_id, sequence_key, block_id)
                    VALUES (?, ?, ?)
                    ON CONFLICT(upload_id, sequence_key) DO UPDATE SET block_id = excluded.block_id
                    "#,
                )
                .bind(upload.as_str())
                .bind(to_i64("sequence_key", index as u64)?)
                .bind(block_id.as_str())
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(true)
        }

        async fn release_commit_lease(
            &self,
            upload: &UploadName,
            owner: &str,
        ) -> MetadataResult<()> {
            sqlx::query(
                "DELETE FROM upload_commits WHERE upload_id = ? AND state = ? AND lease_owner = ?",
            )
            .bind(upload.as_str())
            .bind(STATE_COMMITTING)
            .bind(owner)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn clear_expired_lease(
            &self,
            upload: &UploadName,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                DELETE FROM upload_commits
                WHERE upload_id = ? AND state = ?
                  AND (lease_expires_at IS NULL OR lease_expires_at < ?)
                "#,
            )
            .bind(upload.as_str())
            .bind(STATE_COMMITTING)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_commit(&self, upload: &UploadName) -> MetadataResult<Option<CommitStatus>> {
            let row = sqlx::query_as::<_, CommitRow>(
                "SELECT * FROM upload_commits WHERE upload_id = ?",
            )
            .bind(upload.as_str())
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };
            if let Some(committed) = row.committed_object()? {
                return Ok(Some(CommitStatus::Committed(committed)));
            }
            Ok(Some(CommitStatus::Committing {
                owner: row.lease_owner.unwrap_or_default(),
                lease_expires_at: row.lease_expires_at.unwrap_or(row.updated_at),
            }))
        }

        async fn committed_block(
            &self,
            upload: &UploadName,
            sequence: SequenceKey,
        ) -> MetadataResult<Option<BlockId>> {
            let block_id: Option<String> = sqlx::query_scalar(
                "SELECT block_id FROM committed_blocks WHERE upload_id = ? AND sequence_key = ?",
            )
            .bind(upload.as_str())
            .bind(sequence_to_db(sequence)?)
            .fetch_optional(&self.pool)
            .await?;
            block_id
                .map(|id| BlockId::parse(&id).map_err(MetadataError::from))
                .transpose()
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- One row per received chunk; write-once per (upload_id, sequence_key).
CREATE TABLE IF NOT EXISTS chunk_records (
    upload_id TEXT NOT NULL,
    sequence_key INTEGER NOT NULL CHECK (sequence_key >= 0),
    block_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    is_final INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    object_name TEXT,
    content_type TEXT,
    PRIMARY KEY (upload_id, sequence_key)
);
-- At most one final chunk per upload.
CREATE UNIQUE INDEX IF NOT EXISTS idx_chunk_records_final
    ON chunk_records(upload_id) WHERE is_final = 1;
CREATE INDEX IF NOT EXISTS idx_chunk_records_created ON chunk_records(created_at);

-- Commit lease while state = 'committing', commit marker once 'committed'.
CREATE TABLE IF NOT EXISTS upload_commits (
    upload_id TEXT PRIMARY KEY,
    object_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('committing', 'committed')),
    lease_owner TEXT,
    lease_expires_at TEXT,
    final_sequence INTEGER,
    block_count INTEGER,
    total_size INTEGER,
    committed_at TEXT,
    updated_at TEXT NOT NULL
);
-- An object name belongs to one upload.
CREATE UNIQUE INDEX IF NOT EXISTS idx_upload_commits_object
    ON upload_commits(object_name);

-- Ordered block list of each committed upload.
CREATE TABLE IF NOT EXISTS committed_blocks (
    upload_id TEXT NOT NULL,
    sequence_key INTEGER NOT NULL CHECK (sequence_key >= 0),
    block_id TEXT NOT NULL,
    PRIMARY KEY (upload_id, sequence_key)
);
"#;
