//! Filesystem helpers.

use std::path::Path;

use uuid::Uuid;

use crate::{Result, SiteKbError};

/// Write `bytes` to `path` so readers see either the old file or the complete
/// new one: write a sibling temp file, then rename it over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| SiteKbError::validation(format!("{} has no parent directory", path.display())))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let temp = dir.join(format!(".{file_name}.{}.tmp", Uuid::now_v7()));
    std::fs::write(&temp, bytes).map_err(|e| SiteKbError::io(&temp, e))?;

    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(SiteKbError::io(path, e));
    }
    Ok(())
}
