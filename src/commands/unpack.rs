use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;

use crate::archive::{ArchiveHandle, read_archive};
use crate::cli::{GlobalOpts, UnpackOpts};
use crate::config::{CommandSpec, Entry, EntryKind, Manifest};
use crate::error::{ExternalError, ManifestError, MyinitError, PromptError, describe_status};
use crate::logging::{Logger, Outcome};
use crate::prompt::Choice;
use crate::reconcile::{self, FileJob};
use crate::session::Session;
use crate::vars::{Builtins, EXTRA_PREFIX_VAR};
use crate::workspace::{Baseline, Workspace};

/// Which entries of the archive to unpack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Ids starting with this prefix (given as `prefix/`).
    Prefix(String),
    /// Exactly this id.
    Exact(String),
}

impl Selector {
    /// Whether the entry with `id` is selected.
    #[must_use]
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Self::Prefix(prefix) => id.starts_with(prefix.as_str()),
            Self::Exact(exact) => id == exact,
        }
    }
}

impl FromStr for Selector {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ManifestError::InvalidField {
                field: "selector".to_string(),
                value: String::new(),
            });
        }
        Ok(s.strip_suffix('/').map_or_else(
            || Self::Exact(s.to_string()),
            |prefix| Self::Prefix(prefix.to_string()),
        ))
    }
}

/// Run the unpack command.
///
/// # Errors
///
/// Returns an error if the archive is invalid, a file cannot be applied, a
/// command entry fails, or the user aborts.
pub fn run(global: &GlobalOpts, opts: &UnpackOpts, log: &Arc<Logger>) -> Result<()> {
    let (mut session, builtins) = super::interactive_session(global, log);
    let result = unpack(&opts.archive, opts.selector.as_ref(), &builtins, &mut session);
    log.print_summary();
    result?;
    Ok(())
}

/// Install the entries of `archive` selected by `selector`, reconciling each
/// file against the installed version, then record the archive as installed.
///
/// # Errors
///
/// Returns the first fatal error; files applied before it stay applied but
/// the workspace is left untouched.
pub fn unpack(
    archive: &Path,
    selector: Option<&Selector>,
    builtins: &Builtins,
    session: &mut Session,
) -> Result<(), MyinitError> {
    session.log.stage("Reading archive");
    let (handle, mut manifest) = read_archive(archive, builtins.clone(), &mut session.gate)?;
    session.log.info(&format!(
        "{} {}",
        manifest.id,
        manifest.conf_version.as_deref().unwrap_or("(unversioned)")
    ));
    session.confirm_expected_user(&manifest)?;

    let workspace = Workspace::prepare(&mut manifest, session)?;
    let baseline = workspace.load_baseline(builtins, session)?;
    if baseline.is_none() {
        session.log.info("no installed version found, unpacking everything");
    }

    let selected: Vec<usize> = manifest
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| selector.is_none_or(|s| s.matches(&e.id)))
        .map(|(pos, _)| pos)
        .collect();
    if selected.is_empty() {
        session.log.warn("no entry matches the selector");
    }

    for pos in selected {
        let Some(entry) = manifest.entries.get(pos).cloned() else {
            continue;
        };
        session.log.stage(entry.display_name());
        if entry.ask_for_confirm && !confirm_entry(&entry, session)? {
            session
                .log
                .record(&entry.id, Outcome::Skipped, Some("declined"));
            continue;
        }
        match &entry.kind {
            EntryKind::Command(spec) => {
                run_command(&mut manifest, pos, &entry, spec, session)?;
            }
            EntryKind::File(files) => {
                for file in 0..files.len() {
                    unpack_file(
                        &mut manifest,
                        (pos, file),
                        &entry,
                        &handle,
                        baseline.as_ref(),
                        session,
                    )?;
                }
            }
        }
    }

    session.log.stage("Updating workspace");
    let extra_prefix = manifest.resolve_global(EXTRA_PREFIX_VAR, &mut session.gate)?;
    workspace.commit(&handle, &manifest.archive_file_name(), &extra_prefix, session)
}

fn confirm_entry(entry: &Entry, session: &mut Session) -> Result<bool, PromptError> {
    let answer = session.gate.ask(
        "entry_ask_for_confirm",
        &format!("Unpack {}? ", entry.display_name()),
        &[Choice::Yes, Choice::No, Choice::Exit],
    )?;
    Ok(answer == Choice::Yes)
}

fn unpack_file(
    manifest: &mut Manifest,
    (entry_pos, file_pos): (usize, usize),
    entry: &Entry,
    handle: &ArchiveHandle,
    baseline: Option<&Baseline>,
    session: &mut Session,
) -> Result<(), MyinitError> {
    let Some(spec) = entry.files().get(file_pos) else {
        return Ok(());
    };
    let paths = manifest.resolve_paths(entry_pos, file_pos, &mut session.gate)?;
    let baseline = match baseline {
        Some(b) if !spec.from_extra => b.contents(&entry.id, &paths.archive)?,
        _ => None,
    };
    let job = FileJob {
        spec,
        paths: &paths,
        new: handle.read(&paths.archive)?,
        baseline,
    };

    let decision = reconcile::decide(&job, session)?;
    let outcome = reconcile::commit(&job, decision, session)?;
    let stored = handle
        .metadata(&paths.archive)
        .map_or_else(String::new, |(mode, uid, gid)| {
            format!(" (mode {:o}, uid {uid}, gid {gid})", mode & 0o7777)
        });
    session.log.debug(&format!(
        "{}{stored} -> {}: {outcome:?}",
        paths.archive,
        paths.system.display()
    ));
    session.log.record(
        &format!("{}: {}", entry.id, paths.system.display()),
        outcome,
        None,
    );
    Ok(())
}

/// The argument vector running `command` in a login shell, switching user
/// through `sudo` when `as_user` is someone else.
fn shell_invocation(command: &str, as_user: Option<&str>, current_user: &str) -> Vec<String> {
    let mut argv = Vec::new();
    if let Some(user) = as_user.filter(|u| *u != current_user) {
        argv.extend(["sudo", "-u", user, "-i"].map(String::from));
    }
    argv.extend(["bash", "-i", "-l", "-c", command].map(String::from));
    argv
}

fn run_command(
    manifest: &mut Manifest,
    pos: usize,
    entry: &Entry,
    spec: &CommandSpec,
    session: &mut Session,
) -> Result<(), MyinitError> {
    let command = manifest.resolve_command(pos, &mut session.gate)?;
    let argv = shell_invocation(&command, spec.as_user.as_deref(), &session.identity.user);
    if session.dry_run {
        session
            .log
            .dry_run(&format!("would run: {}", argv.join(" ")));
        session.log.record(&entry.id, Outcome::DryRun, None);
        return Ok(());
    }

    session.log.info(&format!("running: {command}"));
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match reconcile::run_tool(session, program, &args)? {
        Some(0) => {
            session.log.record(&entry.id, Outcome::Applied, None);
            Ok(())
        }
        status if spec.allow_failure => {
            let status = describe_status(status);
            session
                .log
                .warn(&format!("{} exited with {status}, continuing", entry.id));
            session.log.record(&entry.id, Outcome::Failed, Some(&status));
            Ok(())
        }
        status => Err(ExternalError::CommandEntryFailed {
            entry: entry.id.clone(),
            status: describe_status(status),
        }
        .into()),
    }
}
