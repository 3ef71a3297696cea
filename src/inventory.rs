//! Durable inventory of known remote files.
//!
//! One row per path, created on first discovery and mutated on every sync
//! pass. Rows are never physically deleted when the remote file disappears;
//! they are tombstoned (`status = deleted`) so the next diff does not
//! re-report the deletion. Old tombstones and stale failure markers are
//! purged by [`purge_stale`] at batch start.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::models::{InventoryRecord, InventoryStatus, RemoteFile};

/// Load the full inventory keyed by path.
pub async fn load_all(pool: &SqlitePool) -> Result<HashMap<String, InventoryRecord>> {
    let rows = sqlx::query(
        "SELECT path, content_hash, last_modified, status, failed_stage FROM inventory",
    )
    .fetch_all(pool)
    .await?;

    let mut records = HashMap::with_capacity(rows.len());
    for row in rows {
        let status_str: String = row.get("status");
        let record = InventoryRecord {
            path: row.get("path"),
            content_hash: row.get("content_hash"),
            last_modified: row.get("last_modified"),
            status: InventoryStatus::parse(&status_str).unwrap_or(InventoryStatus::Failed),
            failed_stage: row.get("failed_stage"),
        };
        records.insert(record.path.clone(), record);
    }
    Ok(records)
}

/// Register a discovered file as pending before its pipeline run starts.
/// Revives tombstoned records in place.
pub async fn mark_pending(pool: &SqlitePool, file: &RemoteFile) -> Result<()> {
    upsert(
        pool,
        &file.path,
        &file.content_hash,
        file.last_modified,
        InventoryStatus::Pending,
        None,
    )
    .await
}

/// Promote a file after its document and all chunks are durably stored.
pub async fn mark_processed(pool: &SqlitePool, file: &RemoteFile) -> Result<()> {
    upsert(
        pool,
        &file.path,
        &file.content_hash,
        file.last_modified,
        InventoryStatus::Processed,
        None,
    )
    .await
}

/// Record a pipeline failure with the stage that failed. The previously
/// indexed version (if any) stays searchable; the file is retried from
/// scratch on the next pass.
pub async fn mark_failed(
    pool: &SqlitePool,
    file: &RemoteFile,
    failed_stage: &str,
) -> Result<()> {
    upsert(
        pool,
        &file.path,
        &file.content_hash,
        file.last_modified,
        InventoryStatus::Failed,
        Some(failed_stage),
    )
    .await
}

/// Tombstone a path whose remote file disappeared. Called only after the
/// vectors are gone, so a crash in between leaves a record that is retried,
/// never an orphaned vector.
pub async fn mark_deleted(pool: &SqlitePool, path: &str) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        "UPDATE inventory SET status = ?, failed_stage = NULL, updated_at = ? WHERE path = ?",
    )
    .bind(InventoryStatus::Deleted.as_str())
    .bind(now)
    .bind(path)
    .execute(pool)
    .await?;
    Ok(())
}

/// Purge tombstones older than `retention_secs`. Returns the number removed.
pub async fn purge_stale(pool: &SqlitePool, retention_secs: u64) -> Result<u64> {
    let cutoff = Utc::now().timestamp() - retention_secs as i64;
    let result = sqlx::query("DELETE FROM inventory WHERE status = ? AND updated_at <= ?")
        .bind(InventoryStatus::Deleted.as_str())
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

async fn upsert(
    pool: &SqlitePool,
    path: &str,
    content_hash: &str,
    last_modified: i64,
    status: InventoryStatus,
    failed_stage: Option<&str>,
) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO inventory (path, content_hash, last_modified, status, failed_stage, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            content_hash = excluded.content_hash,
            last_modified = excluded.last_modified,
            status = excluded.status,
            failed_stage = excluded.failed_stage,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(path)
    .bind(content_hash)
    .bind(last_modified)
    .bind(status.as_str())
    .bind(failed_stage)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}
