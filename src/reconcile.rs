//! Reconciliation engine: decide, per file, how a new archive version meets
//! the file already on the system, then apply that decision.
//!
//! The decision compares three versions of a file: the one shipped by the
//! previously installed archive (the baseline), the one on the system and
//! the one in the new archive. A system file identical to its baseline was
//! never touched and is replaced silently. A modified file goes through the
//! interaction gate, which may pin the answer for the rest of the run.
use std::borrow::Cow;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::config::{ExpectWhenUnpack, FilePaths, FileSpec};
use crate::error::{ExternalError, MyinitError, PromptError, describe_status};
use crate::logging::Outcome;
use crate::prompt::Choice;
use crate::session::Session;

const CONFLICT_OPTIONS: &[Choice] = &[
    Choice::Overwrite,
    Choice::Skip,
    Choice::Resolve,
    Choice::AlwaysOverwrite,
    Choice::AlwaysSkip,
    Choice::AlwaysResolve,
    Choice::Exit,
];

const CONFLICT_BIN_OPTIONS: &[Choice] = &[
    Choice::Overwrite,
    Choice::Skip,
    Choice::AlwaysOverwrite,
    Choice::AlwaysSkip,
    Choice::Exit,
];

/// Editor used to finish a merge when `$EDITOR` is unset.
const DEFAULT_EDITOR: &str = "vim";

/// One file of the new archive, ready to be reconciled.
#[derive(Debug, Clone, Copy)]
pub struct FileJob<'a> {
    /// The manifest's description of the file.
    pub spec: &'a FileSpec,
    /// Resolved archive and system paths.
    pub paths: &'a FilePaths,
    /// Contents from the new archive.
    pub new: &'a [u8],
    /// Contents from the installed archive, when it tracks the same entry
    /// and archive path.
    pub baseline: Option<&'a [u8]>,
}

/// What to do with the system file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Replace the system file with these bytes.
    Write(Vec<u8>),
    /// Leave the system file alone.
    Skip,
}

/// The bytes as text, if they are valid UTF-8.
#[must_use]
pub fn try_decode_utf8(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok()
}

/// Fold `\r\n` and lone `\r` into `\n`.
fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Whether the system copy still matches the baseline, and whether all three
/// versions are text.
fn compare(baseline: &[u8], system: &[u8], new: &[u8]) -> (bool, bool) {
    match (
        try_decode_utf8(baseline),
        try_decode_utf8(system),
        try_decode_utf8(new),
    ) {
        (Some(old), Some(sys), Some(_)) => {
            (normalize_newlines(old) == normalize_newlines(sys), true)
        }
        _ => (baseline == system, false),
    }
}

/// Decide how to treat one file.
///
/// # Errors
///
/// Returns [`PromptError::UserAbort`] if the user stops the run, an
/// [`ExternalError::MergeFailed`] if a requested merge fails, or an I/O
/// error if the system file cannot be read.
pub fn decide(job: &FileJob<'_>, session: &mut Session) -> Result<Decision, MyinitError> {
    let system_path = &job.paths.system;
    let shown = system_path.display();
    let exists = match system_path.try_exists() {
        Ok(exists) => exists,
        Err(e) => {
            session.log.error(&format!("cannot access {shown}: {e}"));
            let answer = session.gate.ask(
                "system_file_path_access_failed",
                &format!("{shown} can not be accessed. Continue as if it does not exist? "),
                &[Choice::Yes, Choice::No, Choice::Exit],
            )?;
            if answer != Choice::Yes {
                return Err(PromptError::UserAbort.into());
            }
            false
        }
    };

    match job.spec.expect {
        ExpectWhenUnpack::NotExist if exists => {
            let answer = session.gate.ask(
                "system_file_path_exists_whether_overwrite",
                &format!("{shown} exists, which is unexpected. Overwrite? "),
                &[
                    Choice::Yes,
                    Choice::No,
                    Choice::All,
                    Choice::NotToAll,
                    Choice::Exit,
                ],
            )?;
            return Ok(if answer == Choice::No {
                Decision::Skip
            } else {
                Decision::Write(job.new.to_vec())
            });
        }
        ExpectWhenUnpack::Exist if !exists => {
            let answer = session.gate.ask(
                "system_file_path_not_exists",
                &format!("{shown} does not exist, which is unexpected. Continue? "),
                &[Choice::Yes, Choice::No, Choice::All, Choice::Exit],
            )?;
            if answer != Choice::Yes {
                return Err(PromptError::UserAbort.into());
            }
        }
        _ => {}
    }

    let Some(baseline) = job.baseline.filter(|_| exists && !job.spec.from_extra) else {
        return Ok(Decision::Write(job.new.to_vec()));
    };

    let system = fs::read(system_path).map_err(MyinitError::io(system_path))?;
    let (unmodified, text) = compare(baseline, &system, job.new);
    if unmodified {
        session
            .log
            .debug(&format!("{shown} unchanged since last install"));
        return Ok(Decision::Write(job.new.to_vec()));
    }

    if text {
        let answer = session.gate.ask(
            "conflict",
            &format!(
                "{shown} is modified since the installation of last version. Overwrite, skip or resolve conflict? "
            ),
            CONFLICT_OPTIONS,
        )?;
        match answer {
            Choice::Skip => Ok(Decision::Skip),
            Choice::Resolve => Ok(Decision::Write(merge(job, &system, session)?)),
            _ => Ok(Decision::Write(job.new.to_vec())),
        }
    } else {
        let answer = session.gate.ask(
            "conflict_bin",
            &format!(
                "{shown} (binary) is modified since the installation of last version. Overwrite or skip? "
            ),
            CONFLICT_BIN_OPTIONS,
        )?;
        Ok(if answer == Choice::Skip {
            Decision::Skip
        } else {
            Decision::Write(job.new.to_vec())
        })
    }
}

fn stage(bytes: &[u8]) -> Result<NamedTempFile, MyinitError> {
    let mut file = NamedTempFile::new().map_err(MyinitError::io(&std::env::temp_dir()))?;
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(MyinitError::io(file.path()))?;
    Ok(file)
}

/// Merge the system copy with the new version, then let the user edit the
/// result. Returns the merged bytes.
///
/// Both staged copies are removed when this returns, whatever the outcome.
fn merge(job: &FileJob<'_>, system: &[u8], session: &Session) -> Result<Vec<u8>, MyinitError> {
    let label = job.paths.system.display().to_string();
    let merged = stage(system)?;
    let incoming = stage(job.new)?;
    let merged_path = merged.path().display().to_string();
    let incoming_path = incoming.path().display().to_string();
    let (ours, base, theirs) = (
        format!("{label} (system)"),
        format!("{label} (null)"),
        format!("{label} (new)"),
    );

    let args = [
        "merge-file",
        "-L",
        ours.as_str(),
        "-L",
        base.as_str(),
        "-L",
        theirs.as_str(),
        merged_path.as_str(),
        "/dev/null",
        incoming_path.as_str(),
    ];
    session.log.info(&format!("executing git {}", args.join(" ")));
    let status = run_tool(session, "git", &args)?;
    // git merge-file exits with the number of conflicts left (capped at
    // 127). Those exits still go to the editor, where the markers get
    // resolved; only a signal or a status above 127 is a failed merge.
    if !matches!(status, Some(0..=127)) {
        return Err(merge_failed(&label, "git merge-file", status));
    }

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| DEFAULT_EDITOR.to_string());
    let status = run_tool(session, &editor, &[&merged_path])?;
    if status != Some(0) {
        return Err(merge_failed(&label, &editor, status));
    }

    fs::read(merged.path()).map_err(MyinitError::io(merged.path()))
}

pub(crate) fn run_tool(
    session: &Session,
    program: &str,
    args: &[&str],
) -> Result<Option<i32>, MyinitError> {
    session.executor.run_interactive(program, args).map_err(|e| {
        ExternalError::ExternalToolFailed {
            program: program.to_string(),
            reason: format!("{e:#}"),
        }
        .into()
    })
}

fn merge_failed(path: &str, tool: &str, status: Option<i32>) -> MyinitError {
    ExternalError::MergeFailed {
        path: path.to_string(),
        tool: tool.to_string(),
        status: describe_status(status),
    }
    .into()
}

/// Apply a decision to the system.
///
/// Writing creates the parent directory (with execute bits added to the
/// file mode), replaces the file atomically, then runs `chown` and `chmod`
/// when the spec asks for them.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written, or
/// [`ExternalError::PermissionApplyFailed`] if `chown`/`chmod` fail.
pub fn commit(
    job: &FileJob<'_>,
    decision: Decision,
    session: &Session,
) -> Result<Outcome, MyinitError> {
    let Decision::Write(bytes) = decision else {
        return Ok(Outcome::Skipped);
    };
    let target = &job.paths.system;
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    if session.dry_run {
        session
            .log
            .dry_run(&format!("would create dir {}", parent.display()));
        session
            .log
            .dry_run(&format!("would write {} bytes to {}", bytes.len(), target.display()));
        if let Some(owner) = &job.spec.owner {
            session
                .log
                .dry_run(&format!("would chown {} to {owner}", target.display()));
        }
        if let Some(mode) = job.spec.mode {
            session
                .log
                .dry_run(&format!("would chmod {} to {mode}", target.display()));
        }
        return Ok(Outcome::DryRun);
    }

    create_parent(parent, job.spec)?;
    replace_file(target, parent, &bytes)?;

    if let Some(owner) = &job.spec.owner {
        apply_permission(session, "chown", &owner.to_string(), target)?;
    }
    if let Some(mode) = job.spec.mode {
        apply_permission(session, "chmod", &mode.to_string(), target)?;
    }
    Ok(Outcome::Applied)
}

fn create_parent(parent: &Path, spec: &FileSpec) -> Result<(), MyinitError> {
    if parent.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    if let Some(mode) = spec.mode {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode.bits() | 0o111);
    }
    builder.create(parent).map_err(MyinitError::io(parent))
}

/// Write `bytes` next to `target` and rename over it.
fn replace_file(target: &Path, parent: &Path, bytes: &[u8]) -> Result<(), MyinitError> {
    let mut staged = NamedTempFile::new_in(parent).map_err(MyinitError::io(parent))?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.flush())
        .map_err(MyinitError::io(target))?;

    // Temp files are created 0600; keep the mode of the file being replaced.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(target).map_or(0o644, |m| m.permissions().mode() & 0o7777);
        fs::set_permissions(staged.path(), fs::Permissions::from_mode(mode))
            .map_err(MyinitError::io(target))?;
    }

    staged
        .persist(target)
        .map_err(|e| MyinitError::io(target)(e.error))?;
    Ok(())
}

fn apply_permission(
    session: &Session,
    program: &str,
    value: &str,
    target: &Path,
) -> Result<(), MyinitError> {
    let path = target.display().to_string();
    let result = session
        .executor
        .run_unchecked(program, &[value, &path])
        .map_err(|e| ExternalError::ExternalToolFailed {
            program: program.to_string(),
            reason: format!("{e:#}"),
        })?;
    if result.success {
        return Ok(());
    }
    let stderr = result.stderr.trim();
    if !stderr.is_empty() {
        session.log.error(&format!("{program}: {stderr}"));
    }
    Err(ExternalError::PermissionApplyFailed {
        program: program.to_string(),
        path,
        status: describe_status(result.code),
    }
    .into())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::exec::test_helpers::MockExecutor;
    use crate::platform::OwnerSpec;
    use crate::session::test_helpers::session;
    use crate::vars::VarTable;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn spec(expect: ExpectWhenUnpack) -> FileSpec {
        let mut vars = VarTable::new(crate::vars::Builtins::default());
        let dir = vars.alloc(crate::vars::VarNode::Template(String::new()));
        FileSpec {
            name: "f".to_string(),
            archive_dir: dir,
            system_dir: dir,
            mode: None,
            owner: None,
            expect,
            from_extra: false,
        }
    }

    fn paths(dir: &Path) -> FilePaths {
        FilePaths {
            archive: "cfg/f".to_string(),
            system: dir.join("f"),
        }
    }

    fn ok_session(answers: &[&str]) -> (Session, crate::prompt::ScriptedSource) {
        let (s, source, _) = session(answers, Arc::new(MockExecutor::ok()), false);
        (s, source)
    }

    #[test]
    fn no_baseline_overwrites_without_prompt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "local\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: None,
        };
        let (mut s, source) = ok_session(&[]);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Write(b"new\n".to_vec()));
        assert!(source.prompts().is_empty());
    }

    #[test]
    fn unreadable_parent_asks_before_treating_file_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("blocker"), "not a directory\n").unwrap();
        let spec = spec(ExpectWhenUnpack::None);
        let paths = FilePaths {
            archive: "cfg/f".to_string(),
            system: dir.path().join("blocker/f"),
        };
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(b"old\n".as_slice()),
        };

        let (mut s, source, log) = session(&["y"], Arc::new(MockExecutor::ok()), false);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Write(b"new\n".to_vec()));
        assert!(source.prompts()[0].contains("can not be accessed"));
        assert!(log.lines().iter().any(|l| l.contains("cannot access")));

        let (mut s, _) = ok_session(&["n"]);
        assert!(matches!(
            decide(&job, &mut s),
            Err(MyinitError::Prompt(PromptError::UserAbort))
        ));
    }

    #[test]
    fn unmodified_file_overwrites_without_prompt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "same\r\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"newer\n",
            baseline: Some(b"same\n".as_slice()),
        };
        let (mut s, source) = ok_session(&[]);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Write(b"newer\n".to_vec()));
        assert!(source.prompts().is_empty());
    }

    #[test]
    fn modified_text_offers_resolve() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "edited\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(b"old\n".as_slice()),
        };
        let (mut s, source) = ok_session(&["s"]);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Skip);
        assert!(
            source.prompts()[0]
                .ends_with("[Overwrite/Skip/Resolve/Alwaysoverwrite/Alwaysskip/Alwaysresolve/Exit]: ")
        );
    }

    #[test]
    fn modified_binary_offers_only_overwrite_and_skip() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), [0xff, 0x00, 0x01]).unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(&[0xff, 0x00][..]),
        };
        let (mut s, source) = ok_session(&["o"]);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Write(b"new\n".to_vec()));
        let prompt = &source.prompts()[0];
        assert!(prompt.contains("(binary)"));
        assert!(prompt.ends_with("[Overwrite/Skip/Alwaysoverwrite/Alwaysskip/Exit]: "));
    }

    #[test]
    fn binary_rejects_resolve_answer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), [0xfe]).unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: &[0xfd],
            baseline: Some(&[0xfc][..]),
        };
        let (mut s, source) = ok_session(&["resolve", "skip"]);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Skip);
        assert_eq!(source.prompts().len(), 2);
    }

    #[test]
    fn pinned_conflict_answer_applies_to_later_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "edited\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(b"old\n".as_slice()),
        };
        let (mut s, source) = ok_session(&["alwaysskip"]);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Skip);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Skip);
        assert_eq!(source.prompts().len(), 1);
    }

    #[test]
    fn exit_aborts_reconciliation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "edited\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(b"old\n".as_slice()),
        };
        let (mut s, _) = ok_session(&["exit"]);
        assert!(matches!(
            decide(&job, &mut s),
            Err(MyinitError::Prompt(PromptError::UserAbort))
        ));
    }

    #[test]
    fn extra_files_skip_comparison() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "edited\n").unwrap();
        let mut spec = spec(ExpectWhenUnpack::None);
        spec.from_extra = true;
        let paths = paths(dir.path());
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(b"old\n".as_slice()),
        };
        let (mut s, source) = ok_session(&[]);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Write(b"new\n".to_vec()));
        assert!(source.prompts().is_empty());
    }

    #[test]
    fn not_exist_policy_asks_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "keep\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::NotExist), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: None,
        };
        let (mut s, source) = ok_session(&["n"]);
        let decision = decide(&job, &mut s).unwrap();
        assert_eq!(decision, Decision::Skip);
        assert!(source.prompts()[0].ends_with("[Yes/No/All/Nottoall/Exit]: "));
        assert_eq!(commit(&job, decision, &s).unwrap(), Outcome::Skipped);
        assert_eq!(fs::read(dir.path().join("f")).unwrap(), b"keep\n");
    }

    #[test]
    fn not_exist_policy_yes_overwrites_without_comparison() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "edited\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::NotExist), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(b"old\n".as_slice()),
        };
        let (mut s, source) = ok_session(&["y"]);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Write(b"new\n".to_vec()));
        assert_eq!(source.prompts().len(), 1);
    }

    #[test]
    fn exist_policy_aborts_on_no() {
        let dir = tempfile::tempdir().unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::Exist), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: None,
        };
        let (mut s, _) = ok_session(&["n"]);
        assert!(matches!(
            decide(&job, &mut s),
            Err(MyinitError::Prompt(PromptError::UserAbort))
        ));
    }

    fn fake_merge(program: &str, args: &[&str]) {
        if program == "git" {
            let merged = args[args.len() - 3];
            fs::write(merged, "merged\n").unwrap();
        }
    }

    #[test]
    fn resolve_runs_merge_then_editor() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "edited\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(b"old\n".as_slice()),
        };
        let mock = Arc::new(MockExecutor::with_codes(vec![Some(1), Some(0)]).with_hook(fake_merge));
        let (mut s, _, _) = session(&["r"], mock.clone(), false);
        assert_eq!(decide(&job, &mut s).unwrap(), Decision::Write(b"merged\n".to_vec()));

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("git merge-file -L"));
        assert!(calls[0].contains("(system)"));
        assert!(calls[0].contains("/dev/null"));
    }

    #[test]
    fn merge_killed_by_signal_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "edited\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(b"old\n".as_slice()),
        };
        let mock = Arc::new(MockExecutor::with_codes(vec![None]));
        let (mut s, _, _) = session(&["r"], mock, false);
        assert!(matches!(
            decide(&job, &mut s),
            Err(MyinitError::External(ExternalError::MergeFailed { .. }))
        ));
    }

    #[test]
    fn editor_failure_fails_merge() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "edited\n").unwrap();
        let (spec, paths) = (spec(ExpectWhenUnpack::None), paths(dir.path()));
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: Some(b"old\n".as_slice()),
        };
        let mock = Arc::new(MockExecutor::with_codes(vec![Some(0), Some(2)]));
        let (mut s, _, _) = session(&["r"], mock, false);
        let err = decide(&job, &mut s).unwrap_err();
        assert!(err.to_string().contains("status 2"));
    }

    #[test]
    fn commit_writes_file_and_applies_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(ExpectWhenUnpack::None);
        spec.mode = Some(Mode::from_yaml(&serde_yaml::Value::String("640".into())).unwrap());
        spec.owner = Some(OwnerSpec::parse("alice:users").unwrap());
        let paths = FilePaths {
            archive: "cfg/f".to_string(),
            system: dir.path().join("nested/deeper/f"),
        };
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"new\n",
            baseline: None,
        };
        let mock = Arc::new(MockExecutor::ok());
        let (s, _, _) = session(&[], mock.clone(), false);
        let outcome = commit(&job, Decision::Write(b"new\n".to_vec()), &s).unwrap();
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(fs::read(&paths.system).unwrap(), b"new\n");

        let shown = paths.system.display();
        assert_eq!(
            mock.calls(),
            vec![format!("chown alice:users {shown}"), format!("chmod 640 {shown}")]
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("nested")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111, "directories must be traversable");
        }
    }

    #[test]
    fn commit_fails_when_chmod_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(ExpectWhenUnpack::None);
        spec.mode = Some(Mode::from_yaml(&serde_yaml::Value::String("600".into())).unwrap());
        let paths = paths(dir.path());
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"x",
            baseline: None,
        };
        let (s, _, _) = session(&[], Arc::new(MockExecutor::with_codes(vec![Some(1)])), false);
        assert!(matches!(
            commit(&job, Decision::Write(b"x".to_vec()), &s),
            Err(MyinitError::External(ExternalError::PermissionApplyFailed { .. }))
        ));
    }

    #[test]
    fn dry_run_commit_only_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(ExpectWhenUnpack::None);
        spec.mode = Some(Mode::from_yaml(&serde_yaml::Value::String("600".into())).unwrap());
        let paths = FilePaths {
            archive: "cfg/f".to_string(),
            system: dir.path().join("sub/f"),
        };
        let job = FileJob {
            spec: &spec,
            paths: &paths,
            new: b"x",
            baseline: None,
        };
        let mock = Arc::new(MockExecutor::ok());
        let (s, _, log) = session(&[], mock.clone(), true);
        assert_eq!(
            commit(&job, Decision::Write(b"x".to_vec()), &s).unwrap(),
            Outcome::DryRun
        );
        assert!(!dir.path().join("sub").exists());
        assert!(mock.calls().is_empty());
        assert!(log.lines().iter().any(|l| l.contains("would chmod")));
    }

    #[test]
    fn replace_keeps_existing_mode() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");
        fs::write(&target, "old").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(0o751)).unwrap();
            replace_file(&target, dir.path(), b"new").unwrap();
            let mode = fs::metadata(&target).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o751);
        }
        assert_eq!(fs::read(&target).unwrap(), b"new");
        let leftovers: Vec<PathBuf> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(leftovers, vec![target]);
    }

    #[test]
    fn compare_classifies_text_and_binary() {
        assert_eq!(compare(b"a\r\n", b"a\n", b"b"), (true, true));
        assert_eq!(compare(b"a", b"b", b"c"), (false, true));
        assert_eq!(compare(b"a", b"a", &[0xff]), (true, false));
        assert_eq!(compare(&[0xff], &[0xfe], b"c"), (false, false));
    }
}
