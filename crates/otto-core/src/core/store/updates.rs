//! Update rows: insertion, hydration, status transitions, launch bookkeeping.

use super::*;

/// Raw row shape shared by every update query. Hydration happens outside the
/// statement closure so index corruption surfaces as [`StoreError`] instead
/// of a driver error.
type UpdateRow = (String, i64, String, String, i64, i64, String, String);

const UPDATE_COLUMNS: &str = "id, commit_time, runtime_version, status, \
     successful_launch_count, failed_launch_count, manifest_json, filter_metadata_json";

impl UpdateStore {
    /// Insert a parsed update and its asset rows. Fails without touching the
    /// index when the id is already present.
    pub(crate) fn insert_update(&self, update: &Update, keep: bool) -> Result<()> {
        self.with_immediate_tx(|tx| Self::insert_update_tx(tx, update, keep))
    }

    /// Insert an update downloaded under the given filters, recording those
    /// filters as the store's active set in the same transaction.
    pub(crate) fn insert_staged_update(&self, update: &Update, filters: &FilterMap) -> Result<()> {
        self.with_immediate_tx(|tx| {
            Self::insert_update_tx(tx, update, false)?;
            let value = serde_json::to_value(filters)
                .context("failed to encode the active manifest filters")?;
            Self::set_json_data_tx(tx, JSON_DATA_MANIFEST_FILTERS, &value)?;
            Ok(())
        })
    }

    /// Insert the build-time embedded update and point the store at it. The
    /// row is always kept.
    pub(crate) fn insert_embedded_update(&self, update: &Update) -> Result<()> {
        self.with_immediate_tx(|tx| {
            Self::insert_update_tx(tx, update, true)?;
            Self::set_json_data_tx(
                tx,
                JSON_DATA_EMBEDDED_UPDATE,
                &Value::String(update.id.to_string()),
            )?;
            Ok(())
        })
    }

    fn insert_update_tx(
        tx: &rusqlite::Transaction<'_>,
        update: &Update,
        keep: bool,
    ) -> Result<()> {
        let id = update.id.to_string();
        let exists = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM updates WHERE id = ?1)",
            params![id],
            |row| row.get::<_, i64>(0),
        )?;
        if exists != 0 {
            return Err(StoreError::DuplicateUpdate { id: update.id }.into());
        }

        let manifest_json = serde_json::to_string(&update.manifest)
            .context("failed to encode the manifest body")?;
        let filters_json = serde_json::to_string(&update.filter_metadata)
            .context("failed to encode the update filter metadata")?;
        tx.execute(
            "INSERT INTO updates(id, commit_time, runtime_version, status, keep, \
             successful_launch_count, failed_launch_count, last_accessed, \
             manifest_json, filter_metadata_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                update.commit_time,
                update.runtime_version,
                update.status.as_str(),
                i64::from(keep),
                i64::from(update.successful_launch_count),
                i64::from(update.failed_launch_count),
                timestamp_secs() as i64,
                manifest_json,
                filters_json,
            ],
        )?;
        for asset in &update.assets {
            Self::upsert_asset_tx(tx, asset)?;
            tx.execute(
                "INSERT OR IGNORE INTO updates_assets(update_id, asset_hash, is_launch_asset) \
                 VALUES (?1, ?2, ?3)",
                params![id, asset.hash, i64::from(asset.is_launch_asset)],
            )?;
        }
        Ok(())
    }

    /// Every update in the store, newest first.
    pub(crate) fn all_updates(&self) -> Result<Vec<Update>> {
        let conn = self.connection()?;
        let sql =
            format!("SELECT {UPDATE_COLUMNS} FROM updates ORDER BY commit_time DESC, id DESC");
        let rows = Self::query_update_rows(&conn, &sql, params![])?;
        rows.into_iter()
            .map(|row| self.hydrate_update(&conn, row))
            .collect()
    }

    pub(crate) fn update_by_id(&self, id: UpdateId) -> Result<Option<Update>> {
        let conn = self.connection()?;
        let sql = format!("SELECT {UPDATE_COLUMNS} FROM updates WHERE id = ?1");
        let mut rows = Self::query_update_rows(&conn, &sql, params![id.to_string()])?;
        match rows.pop() {
            Some(row) => Ok(Some(self.hydrate_update(&conn, row)?)),
            None => Ok(None),
        }
    }

    /// The update currently holding launched status, if any.
    pub(crate) fn launched_update(&self) -> Result<Option<Update>> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {UPDATE_COLUMNS} FROM updates WHERE status = 'launched' \
             ORDER BY commit_time DESC, id DESC LIMIT 1"
        );
        let mut rows = Self::query_update_rows(&conn, &sql, params![])?;
        match rows.pop() {
            Some(row) => Ok(Some(self.hydrate_update(&conn, row)?)),
            None => Ok(None),
        }
    }

    /// Launchable rows, newest first. Updates that have only ever crashed are
    /// filtered out at the query; the embedded update is always eligible.
    pub(crate) fn launch_candidates(&self) -> Result<Vec<Update>> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {UPDATE_COLUMNS} FROM updates \
             WHERE status IN ('embedded', 'ready', 'launched') \
               AND (status = 'embedded' OR successful_launch_count > 0 OR failed_launch_count = 0) \
             ORDER BY commit_time DESC, id DESC"
        );
        let rows = Self::query_update_rows(&conn, &sql, params![])?;
        rows.into_iter()
            .map(|row| self.hydrate_update(&conn, row))
            .collect()
    }

    /// Apply a status transition, enforcing the legal edge set.
    pub(crate) fn transition(&self, id: UpdateId, to: UpdateStatus) -> Result<()> {
        self.with_immediate_tx(|tx| Self::transition_tx(tx, id, to))
    }

    fn transition_tx(tx: &rusqlite::Transaction<'_>, id: UpdateId, to: UpdateStatus) -> Result<()> {
        let current = tx
            .query_row(
                "SELECT status FROM updates WHERE id = ?1",
                params![id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .ok_or(StoreError::UnknownUpdate { id })?;
        let from = UpdateStatus::parse(&current).ok_or_else(|| {
            StoreError::IndexCorrupt(format!("unknown status '{current}' for update {id}"))
        })?;
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { id, from, to }.into());
        }
        tx.execute(
            "UPDATE updates SET status = ?2, last_accessed = ?3 WHERE id = ?1",
            params![id.to_string(), to.as_str(), timestamp_secs() as i64],
        )?;
        Ok(())
    }

    pub(crate) fn mark_update_ready(&self, id: UpdateId) -> Result<()> {
        self.transition(id, UpdateStatus::Ready)
    }

    /// Make `id` the single launched update: any other holder is demoted back
    /// to ready in the same transaction.
    pub(crate) fn mark_update_launched(&self, id: UpdateId) -> Result<()> {
        self.with_immediate_tx(|tx| {
            tx.execute(
                "UPDATE updates SET status = 'ready' WHERE status = 'launched' AND id != ?1",
                params![id.to_string()],
            )?;
            Self::transition_tx(tx, id, UpdateStatus::Launched)?;
            Ok(())
        })
    }

    pub(crate) fn record_successful_launch(&self, id: UpdateId) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE updates SET successful_launch_count = successful_launch_count + 1, \
             last_accessed = ?2 WHERE id = ?1",
            params![id.to_string(), timestamp_secs() as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownUpdate { id }.into());
        }
        Ok(())
    }

    pub(crate) fn record_failed_launch(&self, id: UpdateId) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE updates SET failed_launch_count = failed_launch_count + 1, \
             last_accessed = ?2 WHERE id = ?1",
            params![id.to_string(), timestamp_secs() as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownUpdate { id }.into());
        }
        Ok(())
    }

    /// Demote ready updates that reference any of the given missing assets
    /// back to downloading. Returns the demoted ids.
    pub(crate) fn mark_missing_assets(&self, hashes: &[String]) -> Result<Vec<UpdateId>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let demoted = self.with_immediate_tx(|tx| {
            let mut ids: Vec<String> = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT DISTINCT u.id FROM updates u \
                     JOIN updates_assets ua ON ua.update_id = u.id \
                     WHERE u.status = 'ready' AND ua.asset_hash = ?1",
                )?;
                for hash in hashes {
                    let rows = stmt.query_map(params![hash], |row| row.get::<_, String>(0))?;
                    for row in rows {
                        ids.push(row?);
                    }
                }
            }
            ids.sort();
            ids.dedup();
            for id in &ids {
                tx.execute(
                    "UPDATE updates SET status = 'downloading' WHERE id = ?1 AND status = 'ready'",
                    params![id],
                )?;
            }
            Ok(ids)
        })?;
        demoted
            .into_iter()
            .map(|id| {
                id.parse::<UpdateId>().map_err(|_| {
                    StoreError::IndexCorrupt(format!("invalid update id '{id}'")).into()
                })
            })
            .collect()
    }

    /// Reaper mark phase: deprecate doomed ready rows and flag unreferenced
    /// assets in one transaction. Returns how many updates were deprecated.
    pub(crate) fn mark_reap_candidates(&self, doomed: &[UpdateId]) -> Result<usize> {
        self.with_immediate_tx(|tx| {
            let deprecated = Self::deprecate_updates_tx(tx, doomed)?;
            Self::mark_unreferenced_assets_tx(tx)?;
            Ok(deprecated)
        })
    }

    fn deprecate_updates_tx(tx: &rusqlite::Transaction<'_>, ids: &[UpdateId]) -> Result<usize> {
        let now = timestamp_secs() as i64;
        let mut deprecated = 0;
        for id in ids {
            deprecated += tx.execute(
                "UPDATE updates SET status = 'deprecated', last_accessed = ?2 \
                 WHERE id = ?1 AND status = 'ready' AND keep = 0",
                params![id.to_string(), now],
            )?;
        }
        Ok(deprecated)
    }

    /// Deprecated rows whose last access predates the cutoff.
    pub(crate) fn deprecated_updates_before(&self, cutoff_secs: u64) -> Result<Vec<UpdateId>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM updates WHERE status = 'deprecated' AND keep = 0 \
             AND last_accessed < ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![cutoff_secs as i64], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            let id = row?;
            ids.push(id.parse::<UpdateId>().map_err(|_| {
                StoreError::IndexCorrupt(format!("invalid update id '{id}'"))
            })?);
        }
        Ok(ids)
    }

    /// Delete rows by id. The keep flag guards embedded updates even if they
    /// end up in a deletion list.
    pub(crate) fn delete_updates(&self, ids: &[UpdateId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_immediate_tx(|tx| {
            let mut deleted = 0;
            for id in ids {
                deleted += tx.execute(
                    "DELETE FROM updates WHERE id = ?1 AND keep = 0",
                    params![id.to_string()],
                )?;
            }
            Ok(deleted)
        })
    }

    fn query_update_rows(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<UpdateRow>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;
        let mut collected = Vec::new();
        for row in rows {
            collected.push(row?);
        }
        Ok(collected)
    }

    fn hydrate_update(&self, conn: &Connection, row: UpdateRow) -> Result<Update> {
        let (id, commit_time, runtime_version, status, successes, failures, manifest, filters) =
            row;
        let parsed_id = id
            .parse::<UpdateId>()
            .map_err(|_| StoreError::IndexCorrupt(format!("invalid update id '{id}'")))?;
        let parsed_status = UpdateStatus::parse(&status).ok_or_else(|| {
            StoreError::IndexCorrupt(format!("unknown status '{status}' for update {id}"))
        })?;
        let manifest = serde_json::from_str(&manifest).map_err(|err| {
            StoreError::IndexCorrupt(format!("invalid manifest body for update {id}: {err}"))
        })?;
        let filter_metadata = serde_json::from_str(&filters).map_err(|err| {
            StoreError::IndexCorrupt(format!("invalid filter metadata for update {id}: {err}"))
        })?;
        let assets = self.assets_for_update(conn, &id)?;
        Ok(Update {
            id: parsed_id,
            commit_time,
            runtime_version,
            status: parsed_status,
            filter_metadata,
            manifest,
            assets,
            successful_launch_count: u32::try_from(successes).unwrap_or(0),
            failed_launch_count: u32::try_from(failures).unwrap_or(0),
        })
    }

    /// Assets joined through the link table, launch asset first. Link order
    /// is not persisted; the sort keeps hydration deterministic.
    fn assets_for_update(&self, conn: &Connection, update_id: &str) -> Result<Vec<Asset>> {
        let mut stmt = conn.prepare(
            "SELECT a.hash, a.key, a.url, a.size, ua.is_launch_asset \
             FROM updates_assets ua JOIN assets a ON a.hash = ua.asset_hash \
             WHERE ua.update_id = ?1 \
             ORDER BY ua.is_launch_asset DESC, a.hash ASC",
        )?;
        let rows = stmt.query_map(params![update_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        let mut assets = Vec::new();
        for row in rows {
            let (hash, key, url, size, is_launch_asset) = row?;
            let url = match url {
                Some(raw) => Some(raw.parse().map_err(|_| {
                    StoreError::IndexCorrupt(format!("invalid url for asset {hash}"))
                })?),
                None => None,
            };
            assets.push(Asset {
                key,
                hash,
                url,
                size: size.and_then(|value| u64::try_from(value).ok()),
                is_launch_asset: is_launch_asset != 0,
                hash_derived: false,
            });
        }
        Ok(assets)
    }
}
