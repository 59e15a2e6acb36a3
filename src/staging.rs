//! Ingest staging (`spec.md` §6, supplemented from `original_source`):
//! content-hash-keyed deduplication of uploaded files, ahead of whatever
//! loads them into a `DataFrame`. Purely file-system plumbing — no network
//! code, no parsing of the file's contents.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{EngineError, Result};

/// The content-addressed id of a staged file: the hex-encoded MD5 digest
/// of its bytes, matching the original's hash-keyed staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId(pub String);

impl FileId {
    fn from_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", md5::compute(bytes)))
    }
}

/// Writes `bytes` under `staging_dir`, named by their content hash, unless
/// a file with that name already exists. Returns the id either way, so a
/// duplicate upload is a no-op rather than an error.
pub fn stage_file(bytes: &[u8], staging_dir: &Path) -> Result<FileId> {
    let id = FileId::from_bytes(bytes);
    let path = staged_path(staging_dir, &id);

    if !path.exists() {
        fs::create_dir_all(staging_dir)
            .map_err(|e| EngineError::Internal(format!("creating staging dir: {e}")))?;
        fs::write(&path, bytes).map_err(|e| EngineError::Internal(format!("writing staged file: {e}")))?;
    }

    Ok(id)
}

/// The on-disk path a staged file's id resolves to.
pub fn staged_path(staging_dir: &Path, id: &FileId) -> PathBuf {
    staging_dir.join(&id.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let id_a = stage_file(b"hello", dir.path()).unwrap();
        let id_b = stage_file(b"hello", dir.path()).unwrap();
        assert_eq!(id_a, id_b);
        assert!(staged_path(dir.path(), &id_a).exists());
    }

    #[test]
    fn different_content_yields_different_ids() {
        let dir = tempfile::tempdir().unwrap();
        let id_a = stage_file(b"hello", dir.path()).unwrap();
        let id_b = stage_file(b"world", dir.path()).unwrap();
        assert_ne!(id_a, id_b);
    }
}
