//! Small JSON key/value side table for store-level pointers.

use super::*;

impl UpdateStore {
    pub(crate) fn json_data(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT value FROM json_data WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|err| {
                    StoreError::IndexCorrupt(format!("invalid json_data entry '{key}': {err}"))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub(super) fn set_json_data_tx(
        tx: &rusqlite::Transaction<'_>,
        key: &str,
        value: &Value,
    ) -> Result<()> {
        let encoded = serde_json::to_string(value).context("failed to encode a json_data entry")?;
        tx.execute(
            "INSERT INTO json_data(key, value, last_updated) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, last_updated=excluded.last_updated",
            params![key, encoded, timestamp_secs() as i64],
        )?;
        Ok(())
    }
}
