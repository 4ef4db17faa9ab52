//! Index schema initialization (SQLite DDL).

use super::*;

impl UpdateStore {
    pub(super) fn init_schema(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS updates (
                id TEXT PRIMARY KEY,
                commit_time INTEGER NOT NULL,
                runtime_version TEXT NOT NULL,
                status TEXT NOT NULL,
                keep INTEGER NOT NULL DEFAULT 0,
                successful_launch_count INTEGER NOT NULL DEFAULT 0,
                failed_launch_count INTEGER NOT NULL DEFAULT 0,
                last_accessed INTEGER NOT NULL,
                manifest_json TEXT NOT NULL,
                filter_metadata_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS assets (
                hash TEXT PRIMARY KEY,
                key TEXT,
                url TEXT,
                local_path TEXT NOT NULL,
                size INTEGER,
                marked_for_deletion INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS updates_assets (
                update_id TEXT NOT NULL,
                asset_hash TEXT NOT NULL,
                is_launch_asset INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY(update_id, asset_hash),
                FOREIGN KEY(update_id) REFERENCES updates(id) ON DELETE CASCADE,
                FOREIGN KEY(asset_hash) REFERENCES assets(hash)
            );
            CREATE TABLE IF NOT EXISTS json_data (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                last_updated INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_updates_commit_time ON updates(commit_time);
            "#,
        )
        .context("failed to initialize the update index schema")?;
        Ok(())
    }
}
