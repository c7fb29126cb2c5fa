use crate::{
    config::AppConfig,
    manifest::{self, InstalledStatus},
};
use anyhow::{bail, Context, Result};
use quick_xml::{events::Event, Reader};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};
use tracing::{debug, info};

pub const GAME_INFO_FILE: &str = "game_info.xml";
pub const LOCALE_CONFIG_FILE: &str = "locale_config.xml";
const MAX_TARGETS: usize = 2;

/// Launchers in lookup order, with a label for status output.
pub const LAUNCHERS: [(&str, &str); 3] = [
    ("lgc_api.exe", "Lesta Game Center"),
    ("wgc_api.exe", "Wargaming Game Center"),
    ("wgc360_api.exe", "WGC 360"),
];

const LESTA_PREFERENCES: &str = r"C:\ProgramData\Lesta\GameCenter\preferences.xml";
const GUESSED_FOLDERS: [&str; 4] = ["Games/Korabli", "Games/Korabli_PT", "Korabli", "Korabli_PT"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerRegion {
    #[default]
    #[serde(rename = "ru")]
    Ru,
    #[serde(rename = "zh_sg")]
    ZhSg,
    #[serde(rename = "zh_cn")]
    ZhCn,
}

impl ServerRegion {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerRegion::Ru => "ru",
            ServerRegion::ZhSg => "zh_sg",
            ServerRegion::ZhCn => "zh_cn",
        }
    }
}

impl fmt::Display for ServerRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerRegion {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ru" => Ok(ServerRegion::Ru),
            "zh_sg" => Ok(ServerRegion::ZhSg),
            "zh_cn" => Ok(ServerRegion::ZhCn),
            other => Err(format!("unknown server region: {other}")),
        }
    }
}

/// Server region plus release/public-test flavour of one install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameKind {
    pub region: ServerRegion,
    pub release: bool,
}

impl Default for GameKind {
    fn default() -> Self {
        Self {
            region: ServerRegion::Ru,
            release: true,
        }
    }
}

impl GameKind {
    pub fn from_game_id(id: &str) -> Self {
        let (region, release) = match id.trim() {
            "WOWS.RU.PRODUCTION" => (ServerRegion::Ru, true),
            "WOWS.RPT.PRODUCTION" => (ServerRegion::Ru, false),
            "WOWS.WW.PRODUCTION" => (ServerRegion::ZhSg, true),
            "WOWS.PT.PRODUCTION" => (ServerRegion::ZhSg, false),
            "WOWS.CN.PRODUCTION" => (ServerRegion::ZhCn, true),
            other => (ServerRegion::Ru, !other.contains("PT.PRODUCTION")),
        };
        Self { region, release }
    }
}

/// One numbered build directory under `<game>/bin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub build: String,
    pub number: u64,
    pub dir: PathBuf,
}

impl Target {
    pub fn info_dir(&self) -> PathBuf {
        self.dir.join("l10n")
    }

    /// `res_mods` for release clients, `res` for public test.
    pub fn content_dir(&self, release: bool) -> PathBuf {
        self.dir.join(if release { "res_mods" } else { "res" })
    }

    pub fn catalog_path(&self, release: bool, region: ServerRegion) -> PathBuf {
        self.content_dir(release)
            .join("texts")
            .join(region.as_str())
            .join("LC_MESSAGES")
            .join("global.mo")
    }

    pub fn status(&self) -> InstalledStatus {
        manifest::query_installed(&self.build, &self.info_dir())
    }
}

pub fn is_valid_game_root(root: &Path) -> bool {
    root.join(GAME_INFO_FILE).is_file() && root.join("bin").is_dir()
}

pub fn is_valid_build_dir(dir: &Path) -> bool {
    dir.join("res").join(LOCALE_CONFIG_FILE).is_file()
}

/// The two highest-numbered valid build directories, highest first.
pub fn discover_targets(root: &Path) -> Vec<Target> {
    let Ok(entries) = fs::read_dir(root.join("bin")) else {
        return Vec::new();
    };
    let mut targets: Vec<Target> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let build = entry.file_name().to_str()?.to_string();
            let number = build.parse::<u64>().ok()?;
            let dir = entry.path();
            is_valid_build_dir(&dir).then_some(Target { build, number, dir })
        })
        .collect();
    targets.sort_by(|a, b| b.number.cmp(&a.number));
    targets.truncate(MAX_TARGETS);
    targets
}

/// Reads `game/id` from `game_info.xml`; unknown or missing files fall back
/// to the release client of the `ru` region.
pub fn detect_game_kind(root: &Path) -> GameKind {
    let Ok(bytes) = fs::read(root.join(GAME_INFO_FILE)) else {
        return GameKind::default();
    };
    match element_texts(&bytes, &["game", "id"]).into_iter().next() {
        Some(id) => {
            debug!(game_id = %id, "detected game id");
            GameKind::from_game_id(&id)
        }
        None => GameKind::default(),
    }
}

/// Picks the install root: an explicit path wins outright (it is validated
/// later), then the saved path, the working directory, known paths, the
/// launcher's registered games and finally a few common folders.
pub fn locate_install_root(explicit: Option<&Path>, config: &AppConfig) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    candidates.extend(config.last_game_path.clone());
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd);
    }
    candidates.extend(config.known_game_paths.iter().cloned());
    candidates.extend(launcher_game_dirs(Path::new(LESTA_PREFERENCES)));
    candidates.extend(guessed_game_dirs());

    candidates.into_iter().find(|path| is_valid_game_root(path))
}

fn launcher_game_dirs(preferences: &Path) -> Vec<PathBuf> {
    let Ok(bytes) = fs::read(preferences) else {
        return Vec::new();
    };
    element_texts(&bytes, &["game", "working_dir"])
        .into_iter()
        .filter(|dir| !dir.contains("Tank") && !dir.contains("GameCheck"))
        .map(PathBuf::from)
        .collect()
}

fn guessed_game_dirs() -> Vec<PathBuf> {
    let mut bases: Vec<PathBuf> = Vec::new();
    if cfg!(windows) {
        bases.extend(
            ('A'..='Z')
                .map(|drive| PathBuf::from(format!("{drive}:/")))
                .filter(|drive| drive.exists()),
        );
    }
    if let Some(home) = directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()) {
        bases.push(home);
    }
    bases
        .iter()
        .flat_map(|base| GUESSED_FOLDERS.iter().map(move |folder| base.join(folder)))
        .collect()
}

pub fn find_launcher(root: &Path) -> Option<(PathBuf, &'static str)> {
    LAUNCHERS
        .iter()
        .map(|(file, label)| (root.join(file), *label))
        .find(|(path, _)| path.is_file())
}

pub fn launch(root: &Path) -> Result<PathBuf> {
    let Some((launcher, label)) = find_launcher(root) else {
        bail!("no game launcher found in {}", root.display());
    };
    Command::new(&launcher)
        .current_dir(root)
        .spawn()
        .with_context(|| format!("start {}", launcher.display()))?;
    info!(launcher = %launcher.display(), label, "launched game client");
    Ok(launcher)
}

/// Text of every element whose open-element path ends with `suffix`.
fn element_texts(bytes: &[u8], suffix: &[&str]) -> Vec<String> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut found = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(e)) => {
                if ends_with_names(&stack, suffix) {
                    if let Ok(text) = e.unescape() {
                        found.push(text.trim().to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    found
}

fn ends_with_names(stack: &[String], suffix: &[&str]) -> bool {
    stack.len() >= suffix.len()
        && stack[stack.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(name, wanted)| name == wanted)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn fake_game(root: &Path, game_id: &str, builds: &[&str]) {
        fs::create_dir_all(root.join("bin")).expect("bin");
        fs::write(
            root.join(GAME_INFO_FILE),
            format!(
                "<?xml version=\"1.0\"?>\n<protocol>\n  <game>\n    <id>{game_id}</id>\n  </game>\n</protocol>\n"
            ),
        )
        .expect("game info");
        for build in builds {
            let res = root.join("bin").join(build).join("res");
            fs::create_dir_all(&res).expect("res");
            fs::write(res.join(LOCALE_CONFIG_FILE), "<locale_config/>").expect("locale config");
        }
    }

    #[test]
    fn game_ids_map_to_region_and_channel() {
        assert_eq!(
            GameKind::from_game_id("WOWS.RPT.PRODUCTION"),
            GameKind { region: ServerRegion::Ru, release: false }
        );
        assert_eq!(
            GameKind::from_game_id("WOWS.CN.PRODUCTION"),
            GameKind { region: ServerRegion::ZhCn, release: true }
        );
        assert_eq!(
            GameKind::from_game_id("WOWS.XX.PT.PRODUCTION"),
            GameKind { region: ServerRegion::Ru, release: false }
        );
        assert_eq!(GameKind::from_game_id("SOMETHING"), GameKind::default());
        assert_eq!(GameKind::default().region, ServerRegion::Ru);
        assert_eq!(ServerRegion::default(), ServerRegion::Ru);
    }

    #[test]
    fn detects_kind_from_game_info() {
        let temp = tempfile::tempdir().expect("tempdir");
        fake_game(temp.path(), "WOWS.WW.PRODUCTION", &[]);
        assert_eq!(
            detect_game_kind(temp.path()),
            GameKind { region: ServerRegion::ZhSg, release: true }
        );
        assert_eq!(detect_game_kind(&temp.path().join("missing")), GameKind::default());
    }

    #[test]
    fn keeps_two_highest_valid_builds() {
        let temp = tempfile::tempdir().expect("tempdir");
        fake_game(temp.path(), "WOWS.RU.PRODUCTION", &["9", "120", "35"]);
        fs::create_dir_all(temp.path().join("bin").join("500")).expect("invalid build");
        fs::create_dir_all(temp.path().join("bin").join("notes")).expect("non numeric");

        let builds: Vec<String> = discover_targets(temp.path())
            .into_iter()
            .map(|target| target.build)
            .collect();
        assert_eq!(builds, vec!["120".to_string(), "35".to_string()]);
        assert!(is_valid_game_root(temp.path()));
        assert!(discover_targets(&temp.path().join("bin")).is_empty());
    }

    #[test]
    fn target_paths_follow_channel_layout() {
        let target = Target {
            build: "7".to_string(),
            number: 7,
            dir: PathBuf::from("/game/bin/7"),
        };
        assert_eq!(
            target.catalog_path(true, ServerRegion::Ru),
            PathBuf::from("/game/bin/7/res_mods/texts/ru/LC_MESSAGES/global.mo")
        );
        assert_eq!(target.content_dir(false), PathBuf::from("/game/bin/7/res"));
        assert_eq!(target.info_dir(), PathBuf::from("/game/bin/7/l10n"));
    }

    #[test]
    fn explicit_root_wins_and_saved_root_is_validated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let game = temp.path().join("game");
        fake_game(&game, "WOWS.RU.PRODUCTION", &["1"]);

        let explicit = temp.path().join("elsewhere");
        let config = AppConfig::default();
        assert_eq!(locate_install_root(Some(&explicit), &config), Some(explicit));

        let config = AppConfig {
            last_game_path: Some(game.clone()),
            ..AppConfig::default()
        };
        assert_eq!(locate_install_root(None, &config), Some(game));
    }

    #[test]
    fn launcher_preferences_skip_other_products() {
        let temp = tempfile::tempdir().expect("tempdir");
        let prefs = temp.path().join("preferences.xml");
        fs::write(
            &prefs,
            "<protocol><application><games_manager><games>\
             <game><working_dir>D:\\Korabli</working_dir></game>\
             <game><working_dir>D:\\Tanks</working_dir></game>\
             </games></games_manager></application></protocol>",
        )
        .expect("prefs");
        assert_eq!(launcher_game_dirs(&prefs), vec![PathBuf::from("D:\\Korabli")]);
    }

    #[test]
    fn finds_first_launcher_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(find_launcher(temp.path()).is_none());
        assert!(launch(temp.path()).is_err());
        fs::write(temp.path().join("wgc360_api.exe"), b"").expect("write");
        fs::write(temp.path().join("wgc_api.exe"), b"").expect("write");
        let (path, label) = find_launcher(temp.path()).expect("launcher");
        assert_eq!(path, temp.path().join("wgc_api.exe"));
        assert_eq!(label, "Wargaming Game Center");
    }
}
