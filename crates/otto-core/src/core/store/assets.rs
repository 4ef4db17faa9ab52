//! Asset payload intake, verification, and reference-guarded deletion.

use super::*;

use url::Url;

/// A payload hashed into `tmp/` but not yet moved under `assets/`.
#[derive(Debug)]
pub struct PendingAsset {
    pub hash: String,
    pub size: u64,
    tmp: PathBuf,
}

impl PendingAsset {
    /// Remove the staged file. Used when a batch fails partway through.
    pub(crate) fn discard(self) {
        let _ = fs::remove_file(&self.tmp);
    }
}

impl UpdateStore {
    pub(super) fn upsert_asset_tx(tx: &rusqlite::Transaction<'_>, asset: &Asset) -> Result<()> {
        let local_path = Self::asset_relative_path(&asset.hash).display().to_string();
        tx.execute(
            "INSERT INTO assets(hash, key, url, local_path, size, marked_for_deletion) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0) \
             ON CONFLICT(hash) DO UPDATE SET \
               key = COALESCE(excluded.key, key), \
               url = COALESCE(excluded.url, url), \
               size = COALESCE(excluded.size, size), \
               marked_for_deletion = 0",
            params![
                asset.hash,
                asset.key,
                asset.url.as_ref().map(Url::as_str),
                local_path,
                asset.size.map(|value| value as i64),
            ],
        )?;
        Ok(())
    }

    /// Stream a payload into the staging area, hashing as it goes. When
    /// `expected` is supplied a digest mismatch removes the staged file and
    /// fails; otherwise the computed digest becomes the asset identity.
    pub(crate) fn hash_asset_payload(
        &self,
        source: &Path,
        expected: Option<&str>,
    ) -> Result<PendingAsset> {
        let tmp_root = self.tmp_root();
        fs::create_dir_all(&tmp_root)
            .with_context(|| format!("failed to ensure store directory {}", tmp_root.display()))?;
        let tmp = tempfile::Builder::new()
            .prefix("asset-")
            .suffix(".partial")
            .tempfile_in(&tmp_root)
            .context("failed to create a staging file for an asset payload")?;
        let (mut file, tmp_path) = tmp.keep().map_err(|err| anyhow!(err.error))?;

        let mut reader = File::open(source)
            .with_context(|| format!("failed to open asset payload {}", source.display()))?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let read = reader
                .read(&mut buf)
                .with_context(|| format!("failed to read asset payload {}", source.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
            file.write_all(&buf[..read])
                .context("failed to write a staged asset payload")?;
            size += read as u64;
        }
        file.sync_all()
            .context("failed to flush a staged asset payload")?;
        drop(file);
        fsync_dir(&tmp_root).ok();

        let hash = hex::encode(hasher.finalize());
        if let Some(expected) = expected {
            if hash != expected {
                let _ = fs::remove_file(&tmp_path);
                return Err(StoreError::DigestMismatch {
                    hash: expected.to_string(),
                    actual: hash,
                }
                .into());
            }
        }
        Ok(PendingAsset {
            hash,
            size,
            tmp: tmp_path,
        })
    }

    /// Move a staged payload to its content address. An existing file at the
    /// destination is a dedup hit and the staged copy is dropped.
    pub(crate) fn commit_asset(&self, pending: PendingAsset) -> Result<()> {
        let dest = self.asset_path(&pending.hash);
        if dest.exists() {
            let _ = fs::remove_file(&pending.tmp);
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create asset directory {}", parent.display()))?;
        }
        fs::rename(&pending.tmp, &dest).map_err(|err| {
            StoreError::StoreWriteFailure(format!(
                "failed to move asset {} into place: {err}",
                pending.hash
            ))
        })?;
        if let Some(parent) = dest.parent() {
            fsync_dir(parent).ok();
        }
        Ok(())
    }

    pub(crate) fn asset_exists_locally(&self, asset: &Asset) -> bool {
        self.asset_path(&asset.hash).is_file()
    }

    /// Whether the index knows this hash at all, referenced or not.
    pub(crate) fn asset_recorded(&self, hash: &str) -> Result<bool> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM assets WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Re-hash an asset on disk against its recorded digest.
    pub(crate) fn verify_asset(&self, hash: &str) -> Result<()> {
        let path = self.asset_path(hash);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::MissingAsset {
                    hash: hash.to_string(),
                }
                .into());
            }
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("failed to open asset {}", path.display())));
            }
        };
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let read = file
                .read(&mut buf)
                .with_context(|| format!("failed to read asset {}", path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        let actual = hex::encode(hasher.finalize());
        if actual != hash {
            return Err(StoreError::DigestMismatch {
                hash: hash.to_string(),
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Recompute the advisory deletion flag from the live reference set.
    pub(super) fn mark_unreferenced_assets_tx(tx: &rusqlite::Transaction<'_>) -> Result<()> {
        tx.execute(
            "UPDATE assets SET marked_for_deletion = 0 WHERE EXISTS \
             (SELECT 1 FROM updates_assets WHERE updates_assets.asset_hash = assets.hash)",
            [],
        )?;
        tx.execute(
            "UPDATE assets SET marked_for_deletion = 1 WHERE NOT EXISTS \
             (SELECT 1 FROM updates_assets WHERE updates_assets.asset_hash = assets.hash)",
            [],
        )?;
        Ok(())
    }

    pub(crate) fn unreferenced_asset_hashes(&self) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT hash FROM assets WHERE NOT EXISTS \
             (SELECT 1 FROM updates_assets WHERE updates_assets.asset_hash = assets.hash) \
             ORDER BY hash",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Delete one asset row + file iff still unreferenced at deletion time.
    /// The row goes first in its own transaction so a crash cannot leave a
    /// referenced asset without its file.
    pub(crate) fn delete_asset_if_unreferenced(&self, hash: &str) -> Result<Option<u64>> {
        let removed = self.with_immediate_tx(|tx| {
            let deleted = tx.execute(
                "DELETE FROM assets WHERE hash = ?1 AND NOT EXISTS \
                 (SELECT 1 FROM updates_assets WHERE updates_assets.asset_hash = ?1)",
                params![hash],
            )?;
            Ok(deleted > 0)
        })?;
        if !removed {
            return Ok(None);
        }

        let path = self.asset_path(hash);
        let size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        if path.exists() {
            let _ = fs::remove_file(&path);
            if let Some(parent) = path.parent() {
                fsync_dir(parent).ok();
            }
        }
        Ok(Some(size))
    }

    /// Sweep every currently unreferenced asset, skipping hashes another
    /// process holds locked. Returns (deleted, reclaimed bytes).
    pub(crate) fn delete_unreferenced_assets(&self) -> Result<(usize, u64)> {
        let mut deleted = 0usize;
        let mut bytes = 0u64;
        for hash in self.unreferenced_asset_hashes()? {
            let Some(_lock) = self.try_lock(&hash)? else {
                debug!(%hash, "skipping locked asset");
                continue;
            };
            if let Some(size) = self.delete_asset_if_unreferenced(&hash)? {
                deleted += 1;
                bytes = bytes.saturating_add(size);
            }
        }
        Ok((deleted, bytes))
    }
}
