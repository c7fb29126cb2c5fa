use crate::{
    fetch::DownloadSource,
    game::{self, ServerRegion},
    workspace,
};
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub last_game_path: Option<PathBuf>,
    #[serde(default)]
    pub known_game_paths: Vec<PathBuf>,
    #[serde(default)]
    pub last_installed_version: Option<String>,
}

impl AppConfig {
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Ok(read_or_default(path, "app config"));
        }
        let config = AppConfig::default();
        config.save(path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self, "app config")
    }

    pub fn remember_game(&mut self, root: &Path) {
        let root = root.to_path_buf();
        if !self.known_game_paths.contains(&root) {
            self.known_game_paths.push(root.clone());
        }
        self.last_game_path = Some(root);
    }
}

/// Install choices remembered per game folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameChoice {
    #[serde(default)]
    pub region: ServerRegion,
    #[serde(default = "default_true")]
    pub release: bool,
    #[serde(default)]
    pub source: DownloadSource,
    #[serde(default = "default_true")]
    pub use_extras: bool,
    #[serde(default = "default_true")]
    pub apply_mods: bool,
    #[serde(default)]
    pub local_file: Option<PathBuf>,
}

impl GameChoice {
    /// Defaults derived from the install's `game_info.xml`.
    pub fn detected(root: &Path) -> Self {
        let kind = game::detect_game_kind(root);
        Self {
            region: kind.region,
            release: kind.release,
            source: DownloadSource::default(),
            use_extras: true,
            apply_mods: true,
            local_file: None,
        }
    }

    pub fn load(root: &Path) -> Self {
        let path = choice_path(root);
        if path.exists() {
            read_or_default_with(&path, "game choice", || Self::detected(root))
        } else {
            Self::detected(root)
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        write_json(&choice_path(root), self, "game choice")
    }

    pub fn supports_extras(&self) -> bool {
        self.region == ServerRegion::Ru && self.release
    }
}

pub fn choice_path(root: &Path) -> PathBuf {
    workspace::legacy_dir(root)
        .join("settings")
        .join("choice.json")
}

fn read_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    read_or_default_with(path, what, T::default)
}

fn read_or_default_with<T: DeserializeOwned>(
    path: &Path,
    what: &str,
    fallback: impl FnOnce() -> T,
) -> T {
    let parsed = fs::read_to_string(path)
        .with_context(|| format!("read {what}"))
        .and_then(|raw| serde_json::from_str(&raw).with_context(|| format!("parse {what}")));
    match parsed {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "using default settings");
            fallback()
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {what} dir"))?;
    }
    let raw = serde_json::to_string_pretty(value).with_context(|| format!("serialize {what}"))?;
    fs::write(path, raw).with_context(|| format!("write {what}"))?;
    Ok(())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::fake_game;

    #[test]
    fn app_config_round_trips_and_tolerates_garbage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.json");
        let mut config = AppConfig::load_or_create(&path).expect("create");
        assert!(path.is_file());

        config.remember_game(Path::new("/games/a"));
        config.remember_game(Path::new("/games/a"));
        config.last_installed_version = Some("3.1".to_string());
        config.save(&path).expect("save");
        let loaded = AppConfig::load_or_create(&path).expect("load");
        assert_eq!(loaded, config);
        assert_eq!(loaded.known_game_paths.len(), 1);

        fs::write(&path, "{ broken").expect("write");
        assert_eq!(AppConfig::load_or_create(&path).expect("load"), AppConfig::default());
    }

    #[test]
    fn choice_defaults_follow_game_info_and_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        fake_game(temp.path(), "WOWS.PT.PRODUCTION", &[]);
        let choice = GameChoice::load(temp.path());
        assert_eq!(choice.region, ServerRegion::ZhSg);
        assert!(!choice.release);
        assert!(!choice.supports_extras());

        let path = choice_path(temp.path());
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        fs::write(&path, r#"{"region": "ru", "source": "github"}"#).expect("write");
        let choice = GameChoice::load(temp.path());
        assert_eq!(choice.source, DownloadSource::Github);
        assert!(choice.release && choice.apply_mods && choice.use_extras);
        assert!(choice.supports_extras());

        let mut edited = choice.clone();
        edited.apply_mods = false;
        edited.save(temp.path()).expect("save");
        assert_eq!(GameChoice::load(temp.path()), edited);
    }
}
