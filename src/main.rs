use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use myinit_cli::{cli, commands, logging};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();
    let command = match args.command {
        cli::Command::Pack(_) => "pack",
        cli::Command::Unpack(_) => "unpack",
    };
    let log_file = logging::init_subscriber(args.verbose, command);
    let log = Arc::new(logging::Logger::new(log_file));
    log.debug(&format!("myinit {}", cli::version()));

    match &args.command {
        cli::Command::Pack(opts) => commands::pack::run(&args.global, opts, &log),
        cli::Command::Unpack(opts) => commands::unpack::run(&args.global, opts, &log),
    }
}
