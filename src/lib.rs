//! Configuration bundle deployment engine.
//!
//! `myinit pack` bundles the files listed in a YAML manifest into a
//! versioned `.tar.gz`; `myinit unpack` installs such an archive and, on
//! upgrade, reconciles every file three ways: the copy shipped by the
//! previously installed archive, the copy on the system and the new one.
//! Files the user never touched are replaced silently; edited files are
//! offered for overwrite, skip or an interactive merge.
//!
//! The public API is organised into layers:
//!
//! - **[`config`]**, **[`vars`]**: parse the manifest and resolve its templated variables
//! - **[`archive`]**: build and read archives
//! - **[`reconcile`]**, **[`workspace`]**: per-file decisions and the installed baseline
//! - **[`prompt`]**, **[`session`]**: the interaction gate and per-run state
//! - **[`commands`]**: top-level subcommand orchestration (`pack`, `unpack`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod archive;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod platform;
pub mod prompt;
pub mod reconcile;
pub mod session;
pub mod vars;
pub mod workspace;
