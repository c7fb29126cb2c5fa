use anyhow::{Context, Result};
use directories::BaseDirs;
use std::{
    fs,
    path::{Path, PathBuf},
};

const APP_DIR: &str = "lexiforge";

/// Per-user data directory holding downloads, overlays, settings and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn resolve() -> Result<Self> {
        let base = BaseDirs::new().context("resolve home dir")?;
        Ok(Self::at(base.data_local_dir().join(APP_DIR)))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.downloads_dir(),
            self.mods_dir(),
            self.processed_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("create data dir {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.root.join("mods")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("lexiforge.log")
    }

    /// Overlay roots in precedence order: the data dir, then the legacy
    /// folders next to the game and the working directory.
    pub fn overlay_roots(&self, game_root: Option<&Path>) -> Vec<PathBuf> {
        let mut roots = vec![self.mods_dir()];
        if let Some(game_root) = game_root {
            roots.push(legacy_dir(game_root).join("mods"));
        }
        if let Ok(cwd) = std::env::current_dir() {
            let legacy = legacy_dir(&cwd).join("mods");
            if !roots.contains(&legacy) {
                roots.push(legacy);
            }
        }
        roots
    }
}

/// `l10n_installer/` folder kept next to a game install.
pub fn legacy_dir(base: &Path) -> PathBuf {
    base.join("l10n_installer")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_lives_under_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::at(temp.path().join("data"));
        workspace.ensure().expect("ensure");
        assert!(workspace.downloads_dir().is_dir());
        assert!(workspace.processed_dir().is_dir());
        assert!(workspace.mods_dir().is_dir());
        assert!(!workspace.cache_dir().exists());
        assert_eq!(workspace.config_path(), temp.path().join("data").join("config.json"));
    }

    #[test]
    fn overlay_roots_start_with_primary() {
        let workspace = Workspace::at("/data");
        let roots = workspace.overlay_roots(Some(Path::new("/game")));
        assert_eq!(roots[0], PathBuf::from("/data/mods"));
        assert_eq!(roots[1], PathBuf::from("/game/l10n_installer/mods"));
        assert!(roots.len() <= 3);
    }
}
