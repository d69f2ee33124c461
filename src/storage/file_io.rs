//! JSON document persistence for the file-backed audit store

use std::ffi::OsString;
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AuditError, AuditResult};

fn storage_error(action: &str, path: &Path, err: impl Display) -> AuditError {
    AuditError::Storage(format!("Failed to {} {}: {}", action, path.display(), err))
}

/// Sibling of `path` that receives the new document before it replaces the old one
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("audit"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Load a JSON document; a missing file yields `T::default()`
pub fn read_json<T, P>(path: P) -> AuditResult<T>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(storage_error("open", path, e)),
    };

    serde_json::from_reader(BufReader::new(file)).map_err(|e| storage_error("parse", path, e))
}

/// Replace the document at `path` with `data` in one step
///
/// Readers see either the previous document or the new one, never a
/// partial write.
pub fn write_json_atomic<T, P>(path: P, data: &T) -> AuditResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| storage_error("create directory", dir, e))?;
    }

    let staging = staging_path(path);
    let written = stage(&staging, data).and_then(|()| {
        fs::rename(&staging, path).map_err(|e| storage_error("replace", path, e))
    });
    if written.is_err() {
        let _ = fs::remove_file(&staging);
    }
    written
}

fn stage<T: Serialize>(staging: &Path, data: &T) -> AuditResult<()> {
    let file = File::create(staging).map_err(|e| storage_error("create", staging, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .map_err(|e| storage_error("serialize into", staging, e))?;
    writer.flush().map_err(|e| storage_error("flush", staging, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| storage_error("sync", staging, e))
}
