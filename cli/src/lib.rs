//! `pcf-anchor` command line.
//!
//! Runs scripted sessions against the simulated tracker and inspects the
//! on-disk binding library those sessions write.

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use pcf_core::PcfConfig;
use pcf_store::JsonFileLibrary;

pub mod run_cmd;
pub mod scenario;
pub mod store_cmd;

pub use run_cmd::RunArgs;
pub use scenario::Scenario;
pub use store_cmd::{ForgetArgs, ShowArgs};

#[derive(Debug, Parser)]
#[command(name = "pcf-anchor", version, about = "Persistent coordinate frame anchors")]
pub struct Cli {
    /// Config file (defaults to $PCF_ANCHOR_CONFIG, then
    /// ~/.config/pcf-anchor/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Drive a scenario through the anchor runtime and persist bindings
    Run(RunArgs),

    /// List stored bindings, or print one
    Show(ShowArgs),

    /// Remove a stored binding
    Forget(ForgetArgs),
}

impl Cli {
    pub fn load_config(&self) -> anyhow::Result<PcfConfig> {
        let config = match &self.config {
            Some(path) => PcfConfig::load_from_path(path)?,
            None => PcfConfig::load()?,
        };
        Ok(config)
    }
}

/// Run the parsed command line. Returns the process exit code.
pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.load_config()?;
    match cli.command {
        Command::Run(args) => run_cmd::run_run(args, &config).await,
        Command::Show(args) => store_cmd::run_show(&args, &config),
        Command::Forget(args) => store_cmd::run_forget(&args, &config),
    }
}

/// Open the binding store at `--store`, falling back to `[store] dir`.
pub fn open_library(store: Option<&Path>, config: &PcfConfig) -> anyhow::Result<JsonFileLibrary> {
    let library = match store {
        Some(dir) => JsonFileLibrary::with_base_dir(dir.to_path_buf()),
        None => JsonFileLibrary::from_config(&config.store),
    };
    library.context("failed to open binding store")
}
