use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs_next::home_dir;

use crate::config::EnvSnapshot;

#[derive(Debug, Clone)]
pub struct StoreLocation {
    pub path: PathBuf,
    pub source: &'static str,
}

/// Determine the root directory for the on-disk update store.
///
/// # Errors
///
/// Returns an error if the configured directory cannot be resolved.
pub(crate) fn resolve_store_root(
    cli_override: Option<&Path>,
    snapshot: &EnvSnapshot,
) -> Result<StoreLocation> {
    if let Some(override_path) = cli_override {
        let path = absolutize(override_path.to_path_buf())?;
        return Ok(StoreLocation {
            path,
            source: "--store",
        });
    }

    if let Some(override_path) = snapshot.var("OTTO_STORE_DIR") {
        let path = absolutize(PathBuf::from(override_path))?;
        return Ok(StoreLocation {
            path,
            source: "OTTO_STORE_DIR",
        });
    }

    #[cfg(target_os = "windows")]
    let (base, source) = resolve_windows_store_base()?;
    #[cfg(not(target_os = "windows"))]
    let (base, source) = resolve_unix_store_base()?;

    Ok(StoreLocation {
        path: base.join("store"),
        source,
    })
}

#[cfg(not(target_os = "windows"))]
fn resolve_unix_store_base() -> Result<(PathBuf, &'static str)> {
    if let Some(home) = home_dir() {
        return Ok((home.join(".otto"), "HOME/.otto"));
    }

    let fallback = PathBuf::from("/tmp/otto");
    Ok((fallback, "default (/tmp/otto)"))
}

#[cfg(target_os = "windows")]
fn resolve_windows_store_base() -> Result<(PathBuf, &'static str)> {
    if let Some(local_app_data) = std::env::var_os("LOCALAPPDATA") {
        let path = PathBuf::from(local_app_data);
        return Ok((path.join("otto"), "LOCALAPPDATA/otto"));
    }

    if let Some(home) = std::env::var_os("USERPROFILE") {
        let path = PathBuf::from(home)
            .join("AppData")
            .join("Local")
            .join("otto");
        return Ok((path, "USERPROFILE/AppData/Local/otto"));
    }

    if let Some(home) = home_dir() {
        return Ok((home.join(".otto"), "HOME/.otto"));
    }

    let fallback = PathBuf::from("/tmp/otto");
    Ok((fallback, "default (/tmp/otto)"))
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()
            .context("failed to resolve the update store root")?
            .join(path))
    }
}
