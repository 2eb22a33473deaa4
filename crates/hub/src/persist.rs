//! Whole-file JSON persistence shared by the station registry and the
//! history log. Writes go to a sibling `.tmp` file that is renamed over the
//! target, so readers see either the old document or the new one.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layout {
    /// Two-space indented, for files people edit by hand.
    Pretty,
    Compact,
}

/// Read and decode a JSON document.
///
/// `Ok(None)` means the file does not exist. Unreadable files and
/// undecodable contents are both reported as `StorageUnavailable`.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::storage(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::storage(path, io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Replace `path` with the JSON encoding of `value`.
pub(crate) async fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    layout: Layout,
) -> Result<()> {
    let body = match layout {
        Layout::Pretty => serde_json::to_vec_pretty(value),
        Layout::Compact => serde_json::to_vec(value),
    }
    .map_err(|e| Error::storage(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;

    let tmp = sibling(path, "tmp");
    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| Error::storage(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::storage(path, e))?;
    Ok(())
}

/// Move an undecodable document to `<file>.corrupt` so a fresh one can
/// take its place. An earlier `.corrupt` file is replaced.
pub(crate) async fn set_aside(path: &Path) -> Result<PathBuf> {
    let aside = sibling(path, "corrupt");
    tokio::fs::rename(path, &aside)
        .await
        .map_err(|e| Error::storage(path, e))?;
    Ok(aside)
}

fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}
