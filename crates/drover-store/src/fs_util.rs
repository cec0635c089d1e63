//! Atomic file writes shared by the checklist and checkpoint stores.

use std::fs;
use std::path::Path;

use crate::error::StoreError;

/// Write `contents` to `path` atomically: write to a sibling temp file,
/// then rename over the destination. A crash mid-write leaves either
/// the old file or the new file, never a torn one.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| {
        StoreError::io(
            path,
            std::io::Error::other("path has no parent directory"),
        )
    })?;
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp);

    fs::write(&tmp_path, contents).map_err(|e| StoreError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}
