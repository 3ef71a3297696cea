use anyhow::Result;
use sqlx::SqlitePool;

/// Create the inventory schema. Idempotent; `docdex init` and every batch
/// start run this.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inventory (
            path TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            last_modified INTEGER NOT NULL,
            status TEXT NOT NULL,
            failed_stage TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_inventory_status ON inventory(status)")
        .execute(pool)
        .await?;

    Ok(())
}
