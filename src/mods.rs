use crate::archive;
use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Compiled,
    Source,
    Words,
    Unrecognized,
}

impl OverlayKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "mo" => OverlayKind::Compiled,
            "po" => OverlayKind::Source,
            "json" => OverlayKind::Words,
            _ => OverlayKind::Unrecognized,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OverlayKind::Compiled => "compiled",
            OverlayKind::Source => "source",
            OverlayKind::Words => "words",
            OverlayKind::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayFile {
    pub path: PathBuf,
    pub kind: OverlayKind,
}

impl OverlayFile {
    pub fn new(path: PathBuf) -> Self {
        let kind = OverlayKind::from_path(&path);
        Self { path, kind }
    }
}

/// Scratch directory for extracted overlay archives. Created empty and
/// removed again when dropped.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            fs::remove_dir_all(&path).context("clear overlay cache")?;
        }
        fs::create_dir_all(&path).context("create overlay cache")?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub fn resolve(enabled: bool, roots: &[PathBuf], scratch: &ScratchDir) -> Vec<OverlayFile> {
    if !enabled {
        return Vec::new();
    }

    let mut overlays = Vec::new();
    for root in roots.iter().filter(|root| root.is_dir()) {
        for path in candidate_files(root) {
            if archive::is_zip_file(&path) {
                overlays.extend(resolve_archive(&path, scratch));
                continue;
            }
            let overlay = OverlayFile::new(path);
            if overlay.kind != OverlayKind::Unrecognized {
                overlays.push(overlay);
            }
        }
    }
    debug!(count = overlays.len(), "resolved overlay files");
    overlays
}

/// Whether any overlay or archive exists under the roots, without extracting.
pub fn has_sources(enabled: bool, roots: &[PathBuf]) -> bool {
    enabled
        && roots.iter().filter(|root| root.is_dir()).any(|root| {
            candidate_files(root).into_iter().any(|path| {
                archive::is_zip_file(&path)
                    || OverlayKind::from_path(&path) != OverlayKind::Unrecognized
            })
        })
}

fn resolve_archive(path: &Path, scratch: &ScratchDir) -> Vec<OverlayFile> {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let dest = unique_dir(scratch.path(), &stem);
    match archive::extract_zip(path, &dest) {
        Ok(files) => files
            .into_iter()
            .map(OverlayFile::new)
            .filter(|overlay| overlay.kind != OverlayKind::Unrecognized)
            .collect(),
        Err(err) => {
            warn!(archive = %path.display(), error = %format!("{err:#}"), "skipping overlay archive");
            Vec::new()
        }
    }
}

fn unique_dir(parent: &Path, stem: &str) -> PathBuf {
    let mut candidate = parent.join(stem);
    let mut counter = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{stem}-{counter}"));
        counter += 1;
    }
    candidate
}

fn candidate_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| !is_ignored_path(path))
        .collect()
}

fn is_ignored_path(path: &Path) -> bool {
    path.components().any(|component| {
        let part = component.as_os_str().to_string_lossy();
        part.eq_ignore_ascii_case("__MACOSX")
            || part.eq_ignore_ascii_case(".ds_store")
            || part.eq_ignore_ascii_case("thumbs.db")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_zip;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(OverlayKind::from_path(Path::new("a.MO")), OverlayKind::Compiled);
        assert_eq!(OverlayKind::from_path(Path::new("a.po")), OverlayKind::Source);
        assert_eq!(OverlayKind::from_path(Path::new("a.json")), OverlayKind::Words);
        assert_eq!(OverlayKind::from_path(Path::new("readme.txt")), OverlayKind::Unrecognized);
    }

    #[test]
    fn disabled_or_missing_roots_resolve_to_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scratch = ScratchDir::create(temp.path().join("cache")).expect("scratch");
        let root = temp.path().join("mods");
        fs::create_dir_all(&root).expect("mods dir");
        fs::write(root.join("a.po"), "").expect("write");

        assert!(resolve(false, &[root.clone()], &scratch).is_empty());
        assert!(resolve(true, &[temp.path().join("missing")], &scratch).is_empty());
        assert!(!has_sources(false, &[root.clone()]));
        assert!(has_sources(true, &[root]));
    }

    #[test]
    fn walks_roots_in_order_and_expands_archives() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scratch = ScratchDir::create(temp.path().join("cache")).expect("scratch");
        let primary = temp.path().join("primary");
        let legacy = temp.path().join("legacy");
        fs::create_dir_all(primary.join("nested")).expect("dirs");
        fs::create_dir_all(&legacy).expect("dirs");
        fs::write(primary.join("b.mo"), "").expect("write");
        fs::write(primary.join("nested").join("c.json"), "{}").expect("write");
        fs::write(primary.join("notes.txt"), "").expect("write");
        fs::write(legacy.join("a.po"), "").expect("write");
        write_zip(
            &primary.join("pack.zip"),
            &[("pack/x.po", "".as_bytes()), ("pack/readme.md", "".as_bytes())],
        );

        let overlays = resolve(true, &[primary.clone(), legacy.clone()], &scratch);
        let paths: Vec<PathBuf> = overlays.iter().map(|o| o.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                primary.join("b.mo"),
                primary.join("nested").join("c.json"),
                scratch.path().join("pack").join("pack").join("x.po"),
                legacy.join("a.po"),
            ]
        );
        assert_eq!(overlays[1].kind, OverlayKind::Words);
    }

    #[test]
    fn scratch_dir_is_cleared_and_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cache");
        fs::create_dir_all(&path).expect("dir");
        fs::write(path.join("stale.po"), "").expect("write");
        {
            let scratch = ScratchDir::create(path.clone()).expect("scratch");
            assert!(!scratch.path().join("stale.po").exists());
        }
        assert!(!path.exists());
    }
}
