use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::unpack::Selector;

/// Version string: `MYINIT_VERSION` from the build, else the crate version.
#[must_use]
pub fn version() -> &'static str {
    option_env!("MYINIT_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Top-level CLI entry point.
#[derive(Parser, Debug)]
#[command(
    name = "myinit",
    about = "Deploy and upgrade a versioned bundle of configuration files",
    version = version()
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Log every change instead of making it (unpack only)
    #[arg(short = 'd', long = "dry", global = true)]
    pub dry_run: bool,

    /// Answer variable prompts with their declared defaults
    #[arg(short = 'y', long, global = true)]
    pub use_defaults: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build an archive from ./config.yaml
    #[command(alias = "p")]
    Pack(PackOpts),
    /// Install or upgrade from an archive
    #[command(alias = "u")]
    Unpack(UnpackOpts),
}

/// Options for the `pack` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct PackOpts {}

/// Options for the `unpack` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct UnpackOpts {
    /// Archive to unpack
    pub archive: PathBuf,

    /// Entry id to unpack, or an id prefix ending in '/'
    pub selector: Option<Selector>,
}
