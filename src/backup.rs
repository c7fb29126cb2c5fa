use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".old");
    path.with_file_name(name)
}

/// Copies `path` to `<path>.old` unless that copy already exists. Returns the
/// backup path when one was written.
pub fn backup_once(path: &Path) -> Result<Option<PathBuf>> {
    let backup = backup_path(path);
    if backup.exists() || !path.is_file() {
        return Ok(None);
    }
    fs::copy(path, &backup).with_context(|| format!("back up {}", path.display()))?;
    info!(from = %path.display(), to = %backup.display(), "created backup");
    Ok(Some(backup))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_is_written_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("global.mo");
        assert_eq!(backup_once(&file).expect("missing source"), None);

        fs::write(&file, b"original").expect("write");
        let backup = backup_once(&file).expect("backup").expect("created");
        assert_eq!(backup, temp.path().join("global.mo.old"));

        fs::write(&file, b"patched").expect("write");
        assert_eq!(backup_once(&file).expect("second"), None);
        assert_eq!(fs::read(&backup).expect("read"), b"original");
    }
}
