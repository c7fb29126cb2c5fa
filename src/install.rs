//! Install orchestration: locale config, extras bundle, base catalog
//! acquisition, overlay merge, placement and manifest, for every target.

use crate::{
    archive, backup,
    catalog::{Catalog, CatalogError},
    config::{AppConfig, GameChoice},
    fetch::{Fetcher, EXTRAS_URL},
    game::{self, Target, LOCALE_CONFIG_FILE},
    manifest::{self, InstalledStatus},
    merge, mo,
    mods::{self, ScratchDir},
    progress::{fraction, ProgressSink, Stage},
    workspace::Workspace,
};
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tracing::{info, warn};

pub const LOCALE_CONFIG: &str = r#"<locale_config>
    <locale_id>ru</locale_id>
    <text_path>../res/texts</text_path>
    <text_domain>global</text_domain>
    <lang_mapping>
        <lang acceptLang="ru" egs="ru" fonts="CN" full="schinese" languageBar="true" localeRfcName="ru" short="ru" />
    </lang_mapping>
</locale_config>
"#;

const LATEST: &str = "latest";
const LOCAL: &str = "local";
const VERSION_FILE: &str = "version.info";
const EXTRAS_FILE: &str = "LK_EE.zip";
const MERGED_PREFIX: &str = "modified_";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{} is not a game install (expected game_info.xml and bin/)", .0.display())]
    InvalidInstallRoot(PathBuf),
    #[error("no installable build found under {}", .0.display())]
    NoTarget(PathBuf),
    #[error("base catalog unavailable: {0}")]
    BaseCatalogUnavailable(String),
    #[error("base catalog {} is corrupt: {source}", .path.display())]
    CorruptBaseCatalog {
        path: PathBuf,
        #[source]
        source: CatalogError,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub game_root: PathBuf,
    pub choice: GameChoice,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub version: String,
    pub builds: Vec<String>,
    pub up_to_date: bool,
    pub extras_installed: bool,
    pub overlays_applied: usize,
    pub overlays_failed: usize,
}

/// Base catalog as fetched or chosen, before zip unpacking.
struct BaseSource {
    path: PathBuf,
    version: String,
}

struct BaseCatalog {
    path: PathBuf,
    version: String,
    version_info: Option<Vec<u8>>,
}

#[derive(Clone)]
struct MergedCatalog {
    path: PathBuf,
    applied: usize,
    failed: usize,
}

pub struct Installer<'a> {
    workspace: &'a Workspace,
    fetcher: &'a dyn Fetcher,
    sink: &'a dyn ProgressSink,
}

impl<'a> Installer<'a> {
    pub fn new(workspace: &'a Workspace, fetcher: &'a dyn Fetcher, sink: &'a dyn ProgressSink) -> Self {
        Self {
            workspace,
            fetcher,
            sink,
        }
    }

    pub fn run(
        &self,
        request: &InstallRequest,
        config: &mut AppConfig,
    ) -> Result<InstallReport, InstallError> {
        let root = &request.game_root;
        if !game::is_valid_game_root(root) {
            return Err(InstallError::InvalidInstallRoot(root.clone()));
        }
        let targets = game::discover_targets(root);
        if targets.is_empty() {
            return Err(InstallError::NoTarget(root.clone()));
        }
        self.workspace.ensure()?;

        let choice = &request.choice;
        let count = targets.len();
        let builds: Vec<String> = targets.iter().map(|target| target.build.clone()).collect();
        info!(
            root = %root.display(),
            builds = ?builds,
            region = %choice.region,
            release = choice.release,
            source = %choice.source,
            "starting install"
        );

        for (index, target) in targets.iter().enumerate() {
            self.status(format!("{}: {}", target.build, Stage::ConfigWrite.label()));
            write_locale_config(target, choice.release)?;
            self.sink.progress(fraction(Stage::ConfigWrite, index, count, 0, 0));
        }

        let extras_installed = choice.use_extras
            && choice.supports_extras()
            && self.install_extras(&targets, choice.release);
        self.sink
            .progress(fraction(Stage::ExtrasInstall, count - 1, count, 0, 0));

        let statuses: Vec<InstalledStatus> = targets.iter().map(Target::status).collect();
        let roots = self.workspace.overlay_roots(Some(root));
        let source = match choice.source.route(choice.release) {
            None => local_source(choice)?,
            Some(route) => {
                let remote = self.remote_version(route);
                if !request.force && is_up_to_date(&remote, &statuses, choice.apply_mods, &roots) {
                    self.status(format!("catalog {remote} is already up to date"));
                    self.finalize(request, config, &remote);
                    return Ok(InstallReport {
                        version: remote,
                        builds,
                        up_to_date: true,
                        extras_installed,
                        overlays_applied: 0,
                        overlays_failed: 0,
                    });
                }
                self.download_base(route, remote, &statuses, config)?
            }
        };
        let base = self.unpack_base(source)?;

        let run_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
            .to_string();
        let mut merged: Option<MergedCatalog> = None;
        for (index, target) in targets.iter().enumerate() {
            self.status(format!("{}: {}", target.build, Stage::CatalogAcquire.label()));
            self.sink
                .progress(fraction(Stage::CatalogAcquire, index, count, 0, 0));
            if let Some(info) = &base.version_info {
                write_file(&target.info_dir().join(VERSION_FILE), info)?;
            }

            let current = match &merged {
                Some(done) => {
                    self.sink
                        .progress(fraction(Stage::CatalogMerge, index, count, 1, 1));
                    done.clone()
                }
                None => {
                    let done =
                        self.merge_catalog(&base, choice.apply_mods, &roots, &run_id, index, count)?;
                    merged = Some(done.clone());
                    done
                }
            };

            self.status(format!("{}: {}", target.build, Stage::CatalogPlace.label()));
            let placed = place_catalog(target, &current.path, choice)?;
            self.sink.progress(fraction(Stage::CatalogPlace, index, count, 0, 0));

            self.status(format!("{}: {}", target.build, Stage::ManifestWrite.label()));
            manifest::record_install(&target.info_dir(), &base.version, &placed)?;
            self.sink
                .progress(fraction(Stage::ManifestWrite, index, count, 0, 0));
            info!(build = %target.build, version = %base.version, "installed catalog");
        }

        self.finalize(request, config, &base.version);
        let (overlays_applied, overlays_failed) = merged
            .map(|done| (done.applied, done.failed))
            .unwrap_or_default();
        Ok(InstallReport {
            version: base.version,
            builds,
            up_to_date: false,
            extras_installed,
            overlays_applied,
            overlays_failed,
        })
    }

    fn status(&self, text: String) {
        info!("{text}");
        self.sink.status(text);
    }

    fn install_extras(&self, targets: &[Target], release: bool) -> bool {
        self.status(Stage::ExtrasInstall.label().to_string());
        let cached = self.workspace.downloads_dir().join(EXTRAS_FILE);
        match self.fetcher.fetch(EXTRAS_URL) {
            Ok(bytes) => {
                if let Err(err) = write_file(&cached, &bytes) {
                    warn!(error = %format!("{err:#}"), "could not store extras bundle");
                }
            }
            Err(err) => warn!(error = %err, "extras download failed"),
        }
        if !cached.is_file() {
            self.status("extras bundle unavailable".to_string());
            return false;
        }
        for target in targets {
            if let Err(err) = archive::extract_zip(&cached, &target.content_dir(release)) {
                warn!(build = %target.build, error = %format!("{err:#}"), "extras install failed");
                return false;
            }
        }
        true
    }

    /// First line of the route's `version.info`, or `latest`.
    fn remote_version(&self, route: &str) -> String {
        let url = format!("{route}{VERSION_FILE}");
        match self.fetcher.fetch(&url) {
            Ok(bytes) => {
                let path = self.workspace.downloads_dir().join(VERSION_FILE);
                if let Err(err) = write_file(&path, &bytes) {
                    warn!(error = %format!("{err:#}"), "could not store version descriptor");
                }
                match first_line(&bytes).filter(|version| is_plain_version(version)) {
                    Some(version) => {
                        self.status(format!("latest catalog version is {version}"));
                        version
                    }
                    None => LATEST.to_string(),
                }
            }
            Err(err) => {
                warn!(error = %err, "version descriptor unavailable");
                self.status("could not fetch catalog version".to_string());
                LATEST.to_string()
            }
        }
    }

    fn download_base(
        &self,
        route: &str,
        version: String,
        statuses: &[InstalledStatus],
        config: &AppConfig,
    ) -> Result<BaseSource, InstallError> {
        let downloads = self.workspace.downloads_dir();
        let cached = downloads.join(format!("{version}.mo"));
        let seen_before = statuses
            .iter()
            .filter_map(InstalledStatus::version)
            .any(|installed| installed == version)
            || config.last_installed_version.as_deref() == Some(version.as_str());
        if version != LATEST && seen_before && mo::is_valid_file(&cached) {
            self.status(format!("using downloaded catalog {version}"));
            return Ok(BaseSource {
                path: cached,
                version,
            });
        }

        let mut attempts = vec![version.clone()];
        if version != LATEST {
            attempts.push(LATEST.to_string());
        }
        for attempt in &attempts {
            match self.download_catalog(route, attempt) {
                Ok(path) => {
                    return Ok(BaseSource {
                        path,
                        version: attempt.clone(),
                    })
                }
                Err(err) => warn!(version = %attempt, error = %format!("{err:#}"), "catalog download failed"),
            }
        }

        for attempt in attempts {
            let path = downloads.join(format!("{attempt}.mo"));
            if mo::is_valid_file(&path) {
                self.status(format!("offline, using cached catalog {attempt}"));
                return Ok(BaseSource {
                    path,
                    version: attempt,
                });
            }
        }
        Err(InstallError::BaseCatalogUnavailable(format!(
            "could not download {version}.mo and no cached copy exists"
        )))
    }

    fn download_catalog(&self, route: &str, version: &str) -> Result<PathBuf> {
        self.status(format!("downloading catalog {version}"));
        let bytes = self.fetcher.fetch(&format!("{route}{version}.mo"))?;
        let path = self.workspace.downloads_dir().join(format!("{version}.mo"));
        write_file(&path, &bytes)?;
        Ok(path)
    }

    /// Pulls the first `.mo` out of a zipped catalog. A `version.info` entry
    /// overrides the version and is copied to every target later.
    fn unpack_base(&self, source: BaseSource) -> Result<BaseCatalog, InstallError> {
        if !archive::is_zip_file(&source.path) {
            return Ok(BaseCatalog {
                path: source.path,
                version: source.version,
                version_info: None,
            });
        }

        let unreadable =
            |err: anyhow::Error| InstallError::BaseCatalogUnavailable(format!("{err:#}"));
        let version_info = archive::read_entry(&source.path, |name| entry_file_name(name) == VERSION_FILE)
            .map_err(unreadable)?
            .map(|(_, bytes)| bytes);
        let Some((name, bytes)) = archive::read_entry(&source.path, |name| {
            name.to_ascii_lowercase().ends_with(".mo")
        })
        .map_err(unreadable)?
        else {
            return Err(InstallError::BaseCatalogUnavailable(format!(
                "{} holds no .mo catalog",
                source.path.display()
            )));
        };

        let path = self
            .workspace
            .downloads_dir()
            .join("extracted_mo")
            .join(entry_file_name(&name));
        write_file(&path, &bytes)?;
        let version = version_info
            .as_deref()
            .and_then(first_line)
            .unwrap_or(source.version);
        Ok(BaseCatalog {
            path,
            version,
            version_info,
        })
    }

    fn merge_catalog(
        &self,
        base: &BaseCatalog,
        mods_enabled: bool,
        roots: &[PathBuf],
        run_id: &str,
        index: usize,
        count: usize,
    ) -> Result<MergedCatalog, InstallError> {
        let catalog = Catalog::load(&base.path).map_err(|source| InstallError::CorruptBaseCatalog {
            path: base.path.clone(),
            source,
        })?;
        let scratch = ScratchDir::create(self.workspace.cache_dir())?;
        let overlays = mods::resolve(mods_enabled, roots, &scratch);
        if overlays.is_empty() {
            self.sink
                .progress(fraction(Stage::CatalogMerge, index, count, 0, 0));
            return Ok(MergedCatalog {
                path: base.path.clone(),
                applied: 0,
                failed: 0,
            });
        }

        self.status(format!("{} ({} files)", Stage::CatalogMerge.label(), overlays.len()));
        let outcome = merge::merge(catalog, &overlays, |processed, total| {
            self.sink
                .progress(fraction(Stage::CatalogMerge, index, count, processed, total))
        });
        if !outcome.failures.is_empty() {
            self.status(format!("{} overlay(s) skipped", outcome.failures.len()));
        }

        let processed = self.workspace.processed_dir();
        remove_stale_outputs(&processed);
        let path = processed.join(format!("{MERGED_PREFIX}{run_id}.mo"));
        mo::write(&outcome.catalog, &path)
            .with_context(|| format!("write merged catalog {}", path.display()))?;
        Ok(MergedCatalog {
            path,
            applied: outcome.applied,
            failed: outcome.failures.len(),
        })
    }

    fn finalize(&self, request: &InstallRequest, config: &mut AppConfig, version: &str) {
        config.remember_game(&request.game_root);
        config.last_installed_version = Some(version.to_string());
        if let Err(err) = config.save(&self.workspace.config_path()) {
            warn!(error = %format!("{err:#}"), "could not save settings");
        }
        if let Err(err) = request.choice.save(&request.game_root) {
            warn!(error = %format!("{err:#}"), "could not save game choices");
        }
        self.sink.progress(fraction(Stage::Finished, 0, 1, 0, 0));
    }
}

fn local_source(choice: &GameChoice) -> Result<BaseSource, InstallError> {
    let Some(path) = choice.local_file.clone() else {
        return Err(InstallError::BaseCatalogUnavailable(
            "no local catalog file selected".to_string(),
        ));
    };
    if !path.is_file() {
        return Err(InstallError::BaseCatalogUnavailable(format!(
            "{} does not exist",
            path.display()
        )));
    }
    let compiled = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mo"));
    if !compiled && !archive::is_zip_file(&path) {
        return Err(InstallError::BaseCatalogUnavailable(format!(
            "{} is neither a .mo catalog nor a zip archive",
            path.display()
        )));
    }
    Ok(BaseSource {
        path,
        version: LOCAL.to_string(),
    })
}

fn is_up_to_date(
    remote: &str,
    statuses: &[InstalledStatus],
    mods_enabled: bool,
    overlay_roots: &[PathBuf],
) -> bool {
    if statuses
        .iter()
        .any(|status| status.tampered() || status.version().is_none())
    {
        return false;
    }
    let installed: Vec<&str> = statuses.iter().filter_map(InstalledStatus::version).collect();
    manifest::should_skip_update(remote, &installed) && !mods::has_sources(mods_enabled, overlay_roots)
}

fn write_locale_config(target: &Target, release: bool) -> Result<()> {
    let dir = target.content_dir(release);
    fs::create_dir_all(&dir).context("create content dir")?;
    let path = dir.join(LOCALE_CONFIG_FILE);
    if !release {
        backup::backup_once(&path)?;
    }
    fs::write(&path, LOCALE_CONFIG).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn place_catalog(target: &Target, source: &Path, choice: &GameChoice) -> Result<PathBuf> {
    let dest = target.catalog_path(choice.release, choice.region);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).context("create catalog dir")?;
    }
    if !choice.release {
        backup::backup_once(&dest)?;
    }
    fs::copy(source, &dest).with_context(|| format!("copy catalog to {}", dest.display()))?;
    Ok(dest)
}

fn remove_stale_outputs(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(MERGED_PREFIX) && name.ends_with(".mo") {
            let _ = fs::remove_file(entry.path());
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".part");
    let temp = path.with_file_name(temp_name);
    fs::write(&temp, bytes).with_context(|| format!("write {}", temp.display()))?;
    fs::rename(&temp, path).with_context(|| format!("finalize {}", path.display()))?;
    Ok(())
}

fn entry_file_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Versions name files under `downloads/`, so path separators are refused.
fn is_plain_version(version: &str) -> bool {
    !version.contains(['/', '\\']) && !version.contains("..")
}

fn first_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.lines().next()?.trim().trim_start_matches('\u{feff}');
    (!line.is_empty()).then(|| line.to_string())
}
