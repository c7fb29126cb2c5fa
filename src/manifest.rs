//! Per-target installation manifest (`l10n/installation.info`).
//!
//! Plain text, one field per line: version, absolute catalog path, SHA-256
//! of the catalog at install time, and a unix timestamp that is only written
//! when the version is not a decimal number.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use time::{macros::format_description, OffsetDateTime};

pub const MANIFEST_FILE: &str = "installation.info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationManifest {
    pub version: String,
    pub installed_file: PathBuf,
    pub content_hash: String,
    pub installed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstalledStatus {
    NotInstalled {
        build: String,
    },
    Installed {
        build: String,
        version: String,
        installed_at: Option<i64>,
        tampered: bool,
    },
}

impl InstalledStatus {
    pub fn version(&self) -> Option<&str> {
        match self {
            InstalledStatus::NotInstalled { .. } => None,
            InstalledStatus::Installed { version, .. } => Some(version),
        }
    }

    pub fn tampered(&self) -> bool {
        matches!(self, InstalledStatus::Installed { tampered: true, .. })
    }

    pub fn status_text(&self) -> String {
        match self {
            InstalledStatus::NotInstalled { build } => format!("{build} - not installed"),
            InstalledStatus::Installed {
                build,
                version,
                installed_at,
                tampered,
            } => {
                let mut text = if is_decimal_version(version) {
                    format!("{build} - {version}")
                } else {
                    match installed_at.and_then(format_timestamp) {
                        Some(when) => format!("{build} - version unknown, installed at {when}"),
                        None => format!("{build} - version unknown, install time unknown"),
                    }
                };
                if *tampered {
                    text.push_str(" (tampered)");
                }
                text
            }
        }
    }
}

/// Whether the version parses as a plain decimal number, e.g. `3.1`.
pub fn is_decimal_version(version: &str) -> bool {
    version.trim().parse::<f64>().is_ok_and(f64::is_finite)
}

pub fn manifest_path(info_dir: &Path) -> PathBuf {
    info_dir.join(MANIFEST_FILE)
}

pub fn record_install(info_dir: &Path, version: &str, file: &Path) -> Result<InstallationManifest> {
    let installed_file = fs::canonicalize(file)
        .with_context(|| format!("resolve installed catalog {}", file.display()))?;
    let content_hash = sha256_file(&installed_file)?;
    let version = version.trim().to_string();
    let installed_at = (!is_decimal_version(&version)).then(now_timestamp);
    let manifest = InstallationManifest {
        version,
        installed_file,
        content_hash,
        installed_at,
    };

    fs::create_dir_all(info_dir).context("create manifest dir")?;
    let mut raw = format!(
        "{}\n{}\n{}",
        manifest.version,
        manifest.installed_file.display(),
        manifest.content_hash
    );
    if let Some(stamp) = manifest.installed_at {
        raw.push_str(&format!("\n{stamp}"));
    }
    let path = manifest_path(info_dir);
    let temp = path.with_extension("info.tmp");
    fs::write(&temp, raw).context("write manifest temp")?;
    fs::rename(&temp, &path).context("finalize manifest")?;
    Ok(manifest)
}

pub fn read_manifest(info_dir: &Path) -> Option<InstallationManifest> {
    let raw = fs::read_to_string(manifest_path(info_dir)).ok()?;
    let mut lines = raw.lines().map(str::trim);
    let version = lines.next()?.to_string();
    let installed_file = PathBuf::from(lines.next()?);
    let content_hash = lines.next().unwrap_or_default().to_ascii_lowercase();
    let installed_at = lines.next().and_then(parse_timestamp);
    Some(InstallationManifest {
        version,
        installed_file,
        content_hash,
        installed_at,
    })
}

pub fn query_installed(build: &str, info_dir: &Path) -> InstalledStatus {
    let not_installed = || InstalledStatus::NotInstalled {
        build: build.to_string(),
    };
    let Some(manifest) = read_manifest(info_dir) else {
        return not_installed();
    };
    if !manifest.installed_file.is_file() {
        return not_installed();
    }
    let tampered = match sha256_file(&manifest.installed_file) {
        Ok(actual) => actual != manifest.content_hash,
        Err(_) => true,
    };
    InstalledStatus::Installed {
        build: build.to_string(),
        version: manifest.version,
        installed_at: manifest.installed_at,
        tampered,
    }
}

/// True only when every installed version is at least the remote
/// `major.minor`. Non-numeric versions on either side force an update.
pub fn should_skip_update(remote: &str, installed: &[&str]) -> bool {
    let Some(remote) = parse_major_minor(remote) else {
        return false;
    };
    !installed.is_empty()
        && installed.iter().all(|version| {
            parse_major_minor(version)
                .is_some_and(|(major, minor)| major >= remote.0 && minor >= remote.1)
        })
}

pub fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts.next()?.trim().parse().ok()?;
    Some((major, minor))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    raw.parse::<f64>().ok().map(|secs| secs as i64)
}

fn format_timestamp(stamp: i64) -> Option<String> {
    let when = OffsetDateTime::from_unix_timestamp(stamp).ok()?;
    when.format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .ok()
}

fn now_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_table() {
        assert!(should_skip_update("2.5", &["2.5"]));
        assert!(should_skip_update("2.5", &["2.6", "3.5.1"]));
        assert!(!should_skip_update("2.5", &["2.4"]));
        assert!(!should_skip_update("2.5", &["2.5", "2.4"]));
        assert!(!should_skip_update("2.5", &["x.y"]));
        assert!(!should_skip_update("2.5", &["local"]));
        assert!(!should_skip_update("latest", &["9.9"]));
        assert!(!should_skip_update("2.5", &[]));
    }

    #[test]
    fn major_minor_uses_first_two_fields() {
        assert_eq!(parse_major_minor("13.4.1\n"), Some((13, 4)));
        assert_eq!(parse_major_minor("13"), None);
        assert_eq!(parse_major_minor("v13.4"), None);
    }

    #[test]
    fn round_trip_then_tamper() {
        let temp = tempfile::tempdir().expect("tempdir");
        let catalog = temp.path().join("global.mo");
        fs::write(&catalog, b"catalog bytes").expect("write");
        let info_dir = temp.path().join("l10n");

        let manifest = record_install(&info_dir, "3.1", &catalog).expect("record");
        assert_eq!(manifest.installed_at, None);
        assert!(manifest.installed_file.is_absolute());

        let status = query_installed("12345", &info_dir);
        assert_eq!(
            status,
            InstalledStatus::Installed {
                build: "12345".to_string(),
                version: "3.1".to_string(),
                installed_at: None,
                tampered: false,
            }
        );
        assert_eq!(status.status_text(), "12345 - 3.1");

        fs::write(&catalog, b"edited by someone else").expect("tamper");
        let status = query_installed("12345", &info_dir);
        assert_eq!(status.version(), Some("3.1"));
        assert!(status.tampered());
        assert_eq!(status.status_text(), "12345 - 3.1 (tampered)");
    }

    #[test]
    fn non_numeric_versions_carry_a_timestamp_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let catalog = temp.path().join("global.mo");
        fs::write(&catalog, b"x").expect("write");
        let info_dir = temp.path().join("l10n");

        record_install(&info_dir, "local", &catalog).expect("record");
        let raw = fs::read_to_string(manifest_path(&info_dir)).expect("read");
        assert_eq!(raw.lines().count(), 4);

        let status = query_installed("1", &info_dir);
        assert!(status.status_text().starts_with("1 - version unknown, installed at "));
    }

    #[test]
    fn missing_file_reports_not_installed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let catalog = temp.path().join("global.mo");
        fs::write(&catalog, b"x").expect("write");
        let info_dir = temp.path().join("l10n");
        record_install(&info_dir, "1.0", &catalog).expect("record");
        fs::remove_file(&catalog).expect("remove");

        let status = query_installed("7", &info_dir);
        assert_eq!(status, InstalledStatus::NotInstalled { build: "7".to_string() });
        assert!(!status.tampered());
        assert_eq!(status.status_text(), "7 - not installed");
        assert_eq!(
            query_installed("8", &temp.path().join("nowhere")).status_text(),
            "8 - not installed"
        );
    }
}
