//! SQLite connection + transaction helpers.

use super::*;

impl UpdateStore {
    pub(super) fn connection(&self) -> Result<Connection> {
        let conn = self.connection_raw()?;
        conn.busy_timeout(Duration::from_secs(10))
            .context("failed to set busy timeout for the update index")?;
        Ok(conn)
    }

    pub(super) fn with_immediate_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start an update index transaction")?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub(super) fn connection_raw(&self) -> Result<Connection> {
        let path = self.db_path();
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open the update index at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL for the update index")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys for the update index")?;
        Ok(conn)
    }
}
