use crate::{
    config::{self, AppConfig, GameChoice},
    fetch::{DownloadSource, HttpFetcher},
    game::{self, ServerRegion},
    install::InstallRequest,
    logging,
    manifest::InstalledStatus,
    mods::{self, ScratchDir},
    worker::{InstallEvent, InstallWorker},
    workspace::Workspace,
};
use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq)]
struct CliAction {
    command: CliCommand,
    format: OutputFormat,
    game: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
enum CliCommand {
    Install(InstallOptions),
    Status,
    Mods,
    Paths,
    Launch,
    Help,
    Version,
}

/// Overrides on top of the saved per-game choices.
#[derive(Debug, Default, PartialEq)]
struct InstallOptions {
    source: Option<DownloadSource>,
    file: Option<PathBuf>,
    region: Option<ServerRegion>,
    release: Option<bool>,
    mods: Option<bool>,
    extras: Option<bool>,
    force: bool,
    quiet: bool,
}

impl InstallOptions {
    fn apply(&self, choice: &mut GameChoice) {
        if let Some(source) = self.source {
            choice.source = source;
        }
        if let Some(file) = &self.file {
            choice.source = DownloadSource::Local;
            choice.local_file = Some(file.clone());
        }
        if let Some(region) = self.region {
            choice.region = region;
        }
        if let Some(release) = self.release {
            choice.release = release;
        }
        if let Some(mods) = self.mods {
            choice.apply_mods = mods;
        }
        if let Some(extras) = self.extras {
            choice.use_extras = extras;
        }
    }
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let action = parse_args(&args)?;
    match action.command {
        CliCommand::Help => {
            print_help();
            return Ok(());
        }
        CliCommand::Version => {
            println!("lexiforge v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let workspace = Workspace::resolve()?;
    workspace.ensure()?;
    let _log_guard = match logging::init(&workspace.log_path()) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };
    let config = AppConfig::load_or_create(&workspace.config_path())?;
    run_command(action, workspace, config)
}

fn parse_args(args: &[String]) -> Result<CliAction> {
    let mut format = OutputFormat::Text;
    let mut game = None;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = OutputFormat::parse(value).ok_or_else(|| anyhow!("Unknown format: {value}"))?;
            continue;
        }
        if arg == "--format" {
            let value = iter.next().ok_or_else(|| anyhow!("--format requires a value"))?;
            format = OutputFormat::parse(value).ok_or_else(|| anyhow!("Unknown format: {value}"))?;
            continue;
        }
        if let Some(value) = arg.strip_prefix("--game=") {
            game = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--game" {
            let value = iter.next().ok_or_else(|| anyhow!("--game requires a path"))?;
            game = Some(PathBuf::from(value));
            continue;
        }
        tokens.push(arg.clone());
    }

    let head = tokens.first().map(|token| token.as_str());
    let command = match head {
        Some("--help" | "-h" | "help") => CliCommand::Help,
        Some("--version" | "-V" | "version") => CliCommand::Version,
        Some("status") => CliCommand::Status,
        Some("mods") => CliCommand::Mods,
        Some("paths") => CliCommand::Paths,
        Some("launch") => CliCommand::Launch,
        Some("install") => CliCommand::Install(parse_install(tokens.get(1..).unwrap_or_default())?),
        _ => CliCommand::Install(parse_install(&tokens)?),
    };
    Ok(CliAction {
        command,
        format,
        game,
    })
}

fn parse_install(args: &[String]) -> Result<InstallOptions> {
    let mut options = InstallOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            match &inline {
                Some(value) => Ok(value.clone()),
                None => iter
                    .next()
                    .cloned()
                    .ok_or_else(|| anyhow!("{name} requires a value")),
            }
        };
        match flag {
            "--source" => {
                let raw = value("--source")?;
                options.source = Some(raw.parse::<DownloadSource>().map_err(|err| anyhow!(err))?);
            }
            "--file" => options.file = Some(PathBuf::from(value("--file")?)),
            "--region" => {
                let raw = value("--region")?;
                options.region = Some(raw.parse::<ServerRegion>().map_err(|err| anyhow!(err))?);
            }
            "--release" => options.release = Some(true),
            "--pt" => options.release = Some(false),
            "--mods" => options.mods = Some(true),
            "--no-mods" => options.mods = Some(false),
            "--extras" => options.extras = Some(true),
            "--no-extras" => options.extras = Some(false),
            "--force" | "-f" => options.force = true,
            "--quiet" | "-q" => options.quiet = true,
            other => bail!("Unknown install option: {other}"),
        }
    }
    Ok(options)
}

fn run_command(action: CliAction, workspace: Workspace, config: AppConfig) -> Result<()> {
    let root = game::locate_install_root(action.game.as_deref(), &config);
    match action.command {
        CliCommand::Install(options) => {
            let root = root.ok_or_else(|| anyhow!("No game install found; pass --game <path>"))?;
            install(workspace, config, root, options)
        }
        CliCommand::Status => {
            let root = root.ok_or_else(|| anyhow!("No game install found; pass --game <path>"))?;
            show_status(&root, action.format)
        }
        CliCommand::Mods => list_mods(&workspace, root.as_deref(), action.format),
        CliCommand::Paths => list_paths(&workspace, root.as_deref(), action.format),
        CliCommand::Launch => {
            let root = root.ok_or_else(|| anyhow!("No game install found; pass --game <path>"))?;
            let launcher = game::launch(&root)?;
            println!("Started {}", launcher.display());
            Ok(())
        }
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn install(workspace: Workspace, config: AppConfig, root: PathBuf, options: InstallOptions) -> Result<()> {
    let mut choice = GameChoice::load(&root);
    options.apply(&mut choice);
    let request = InstallRequest {
        game_root: root,
        choice,
        force: options.force,
    };

    let worker = InstallWorker::new(workspace, Arc::new(HttpFetcher::new()));
    let events = worker.start(request, config)?;
    let mut percent = 0.0f32;
    for event in events {
        match event {
            InstallEvent::Progress(value) => percent = value,
            InstallEvent::Status(text) => {
                if !options.quiet {
                    println!("[{percent:>3.0}%] {text}");
                }
            }
            InstallEvent::Completed { report } => {
                if report.up_to_date {
                    println!("Catalog {} is already installed.", report.version);
                } else {
                    println!(
                        "Installed catalog {} into build(s) {}.",
                        report.version,
                        report.builds.join(", ")
                    );
                    if report.overlays_applied + report.overlays_failed > 0 {
                        println!(
                            "Overlays applied: {}, skipped: {}",
                            report.overlays_applied, report.overlays_failed
                        );
                    }
                }
                if report.extras_installed {
                    println!("Extras bundle installed.");
                }
                return Ok(());
            }
            InstallEvent::Failed { error } => bail!("Install failed: {error}"),
        }
    }
    bail!("Install worker stopped without a result")
}

#[derive(Serialize)]
struct StatusOutput {
    game_root: String,
    region: ServerRegion,
    release: bool,
    launcher: Option<String>,
    targets: Vec<InstalledStatus>,
}

fn show_status(root: &Path, format: OutputFormat) -> Result<()> {
    let choice = GameChoice::load(root);
    let targets = game::discover_targets(root);
    let output = StatusOutput {
        game_root: root.display().to_string(),
        region: choice.region,
        release: choice.release,
        launcher: game::find_launcher(root).map(|(_, label)| label.to_string()),
        targets: targets.iter().map(game::Target::status).collect(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            println!("Game root: {}", output.game_root);
            println!(
                "Client: {} ({})",
                output.region,
                if output.release { "release" } else { "public test" }
            );
            println!("Launcher: {}", output.launcher.as_deref().unwrap_or("not found"));
            if output.targets.is_empty() {
                println!("No game build found.");
            }
            for status in &output.targets {
                println!("  {}", status.status_text());
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ModListItem {
    path: String,
    kind: &'static str,
}

fn list_mods(workspace: &Workspace, root: Option<&Path>, format: OutputFormat) -> Result<()> {
    let roots = workspace.overlay_roots(root);
    let scratch = ScratchDir::create(workspace.cache_dir())?;
    let items: Vec<ModListItem> = mods::resolve(true, &roots, &scratch)
        .into_iter()
        .map(|overlay| ModListItem {
            path: overlay.path.display().to_string(),
            kind: overlay.kind.label(),
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            for dir in &roots {
                println!("Overlay dir: {}", dir.display());
            }
            if items.is_empty() {
                println!("No overlays found.");
            }
            for item in &items {
                println!("  [{}] {}", item.kind, item.path);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    data_dir: String,
    config: String,
    log: String,
    downloads: String,
    game_root: Option<String>,
    choice: Option<String>,
    overlay_dirs: Vec<String>,
}

fn list_paths(workspace: &Workspace, root: Option<&Path>, format: OutputFormat) -> Result<()> {
    let output = PathsOutput {
        data_dir: workspace.root().display().to_string(),
        config: workspace.config_path().display().to_string(),
        log: workspace.log_path().display().to_string(),
        downloads: workspace.downloads_dir().display().to_string(),
        game_root: root.map(|root| root.display().to_string()),
        choice: root.map(|root| config::choice_path(root).display().to_string()),
        overlay_dirs: workspace
            .overlay_roots(root)
            .iter()
            .map(|dir| dir.display().to_string())
            .collect(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            println!("Data dir: {}", output.data_dir);
            println!("Config: {}", output.config);
            println!("Log: {}", output.log);
            println!("Downloads: {}", output.downloads);
            println!(
                "Game root: {}",
                output.game_root.as_deref().unwrap_or("not found")
            );
            if let Some(choice) = &output.choice {
                println!("Game choices: {choice}");
            }
            for dir in &output.overlay_dirs {
                println!("Overlay dir: {dir}");
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("lexiforge v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  lexiforge                        Install with saved choices");
    println!("  lexiforge install [options]      Install or update the catalog");
    println!("  lexiforge status                 Show installed catalog per build");
    println!("  lexiforge mods                   List overlay files that would be applied");
    println!("  lexiforge paths                  Show detected paths");
    println!("  lexiforge launch                 Start the game launcher");
    println!();
    println!("Global options:");
    println!("  --game <path>                    Game install root");
    println!("  --format <json|text>             Output format for status, mods and paths");
    println!("  -h, --help                       Show help");
    println!("  -V, --version                    Show version");
    println!();
    println!("Install options:");
    println!("  --source <gitee|github|local>    Where the base catalog comes from");
    println!("  --file <path>                    Local .mo or .zip catalog (implies local)");
    println!("  --region <ru|zh_sg|zh_cn>        Client server region");
    println!("  --release | --pt                 Release or public test client");
    println!("  --mods | --no-mods               Apply overlay files");
    println!("  --extras | --no-extras           Install the extras bundle (ru release only)");
    println!("  -f, --force                      Reinstall even when up to date");
    println!("  -q, --quiet                      Only print the result");
    println!();
    println!("Set LEXIFORGE_LOG (e.g. debug) to change log verbosity.");
}
