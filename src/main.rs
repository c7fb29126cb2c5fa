mod archive;
mod backup;
mod catalog;
mod cli;
mod config;
mod fetch;
mod game;
mod install;
mod logging;
mod manifest;
mod merge;
mod mo;
mod mods;
mod po;
mod progress;
mod words;
mod worker;
mod workspace;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
