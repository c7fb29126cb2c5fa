use anyhow::{Context, Result};
use encoding_rs::GBK;
use filetime::{set_file_mtime, FileTime};
use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use tracing::debug;

/// Returns the corrected name for an entry whose raw bytes were written in
/// the regional codepage instead of UTF-8, or `None` when `decoded` is fine.
///
/// Zip readers decode names without the UTF-8 flag as CP437, so decoding
/// the raw bytes as GBK is the same as re-encoding the CP437 text and
/// decoding that.
pub fn repair_entry_name(raw: &[u8], decoded: &str) -> Option<String> {
    if let Ok(utf8) = std::str::from_utf8(raw) {
        return (utf8 != decoded).then(|| utf8.to_string());
    }
    let regional = GBK.decode_without_bom_handling_and_without_replacement(raw)?;
    (regional != decoded).then(|| regional.into_owned())
}

/// Extracts every file of `path` into `dest`, repairing entry names first.
/// Returns the extracted file paths in archive order.
pub fn extract_zip(path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = fs::File::open(path).with_context(|| format!("open zip {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("read zip")?;
    fs::create_dir_all(dest).context("create extraction dir")?;

    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).context("zip entry")?;
        let name = match repair_entry_name(entry.name_raw(), entry.name()) {
            Some(repaired) => {
                debug!(from = entry.name(), to = %repaired, "repaired zip entry name");
                repaired
            }
            None => entry.name().to_string(),
        };
        let Some(relative) = enclosed_path(&name) else {
            debug!(name = %name, "skipping zip entry outside extraction root");
            continue;
        };

        let out_path = dest.join(relative);
        if entry.is_dir() || name.ends_with('/') {
            fs::create_dir_all(&out_path).context("create zip dir")?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).context("create zip dir")?;
        }

        let mut out_file = fs::File::create(&out_path).context("write zip entry")?;
        io::copy(&mut entry, &mut out_file).context("extract zip entry")?;
        drop(out_file);
        if let Some(dt) = entry.last_modified() {
            if let Some(mtime) = zip_time_to_unix(dt) {
                let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
            }
        }
        extracted.push(out_path);
    }

    Ok(extracted)
}

/// Reads one entry (matched on its repaired name) fully into memory.
pub fn read_entry(path: &Path, matches: impl Fn(&str) -> bool) -> Result<Option<(String, Vec<u8>)>> {
    let file = fs::File::open(path).with_context(|| format!("open zip {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("read zip")?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).context("zip entry")?;
        if entry.is_dir() {
            continue;
        }
        let name = repair_entry_name(entry.name_raw(), entry.name())
            .unwrap_or_else(|| entry.name().to_string());
        if !matches(&name) {
            continue;
        }
        let mut bytes = Vec::new();
        io::copy(&mut entry, &mut bytes).context("read zip entry")?;
        return Ok(Some((name, bytes)));
    }
    Ok(None)
}

fn enclosed_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut out = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}

pub fn is_zip_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}
