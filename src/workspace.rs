//! The workspace: where the installed manifest and archive are kept.
//!
//! The workspace directory comes from the manifest's `WorkspaceDir`
//! variable. It holds `config.yaml` and the archive of the last successful
//! unpack, which serve as the baseline for the next one. It is only
//! rewritten once every entry of a run has been applied.
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::{ArchiveHandle, read_archive};
use crate::config::{MANIFEST_MEMBER, Manifest};
use crate::error::{MyinitError, PromptError};
use crate::prompt::Choice;
use crate::session::Session;
use crate::vars::Builtins;

/// Global variable naming the workspace directory.
pub const WORKSPACE_VAR: &str = "WorkspaceDir";

/// The previously installed version.
#[derive(Debug)]
pub struct Baseline {
    /// The archive copied into the workspace by the last unpack.
    pub archive: ArchiveHandle,
    /// Its manifest, indexed.
    pub manifest: Manifest,
}

impl Baseline {
    /// Contents of `archive_path` as installed for `entry_id`, if the
    /// installed version tracked that file.
    ///
    /// # Errors
    ///
    /// Returns an error if the installed manifest lists the file but its
    /// archive lacks it.
    pub fn contents(
        &self,
        entry_id: &str,
        archive_path: &str,
    ) -> Result<Option<&[u8]>, MyinitError> {
        if !self.manifest.tracks(entry_id, archive_path) {
            return Ok(None);
        }
        Ok(Some(self.archive.read(archive_path)?))
    }
}

/// The workspace directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

fn ask_force_overwrite(session: &mut Session, what: &str) -> Result<(), PromptError> {
    let answer = session.gate.ask(
        "_",
        &format!(
            "{what}. If you continue, unpacked files will forcibly overwrite files in the system. Continue? "
        ),
        &[Choice::Yes, Choice::No, Choice::Exit],
    )?;
    if answer == Choice::Yes {
        Ok(())
    } else {
        Err(PromptError::UserAbort)
    }
}

impl Workspace {
    /// Resolve the workspace directory from `manifest` and create it
    /// (mode 0700).
    ///
    /// # Errors
    ///
    /// Returns an error if `WorkspaceDir` cannot be resolved or the
    /// directory cannot be created.
    pub fn prepare(manifest: &mut Manifest, session: &mut Session) -> Result<Self, MyinitError> {
        let dir = PathBuf::from(manifest.resolve_global(WORKSPACE_VAR, &mut session.gate)?);
        if session.dry_run {
            session
                .log
                .dry_run(&format!("would create dir {}", dir.display()));
        } else {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o700);
            }
            builder.create(&dir).map_err(MyinitError::io(&dir))?;
        }
        Ok(Self { dir })
    }

    /// The workspace directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the installed version, if there is a usable one.
    ///
    /// Problems probing the workspace are logged and turned into a question:
    /// continuing means unpacking without a baseline.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::UserAbort`] if the user declines to continue,
    /// or an error if the installed manifest or archive is invalid.
    pub fn load_baseline(
        &self,
        builtins: &Builtins,
        session: &mut Session,
    ) -> Result<Option<Baseline>, MyinitError> {
        let conf = self.dir.join(MANIFEST_MEMBER);
        match conf.try_exists() {
            Ok(false) => return Ok(None),
            Ok(true) => {}
            Err(e) => {
                session
                    .log
                    .error(&format!("cannot access {}: {e}", conf.display()));
                ask_force_overwrite(session, &format!("{} can not be accessed", conf.display()))?;
                return Ok(None);
            }
        }

        let installed = Manifest::load(&conf, builtins.clone())?;
        let archive_path = self.dir.join(installed.archive_file_name());
        let archive_exists = archive_path.try_exists().unwrap_or_else(|e| {
            session
                .log
                .error(&format!("cannot access {}: {e}", archive_path.display()));
            false
        });
        if !archive_exists {
            ask_force_overwrite(
                session,
                &format!(
                    "{} does not exist or the access is denied",
                    archive_path.display()
                ),
            )?;
            return Ok(None);
        }

        session.log.debug(&format!(
            "baseline: {} {}",
            installed.id,
            installed.conf_version.as_deref().unwrap_or("(unversioned)")
        ));
        let (archive, manifest) = read_archive(&archive_path, builtins.clone(), &mut session.gate)?;
        Ok(Some(Baseline { archive, manifest }))
    }

    /// Record `archive` as the installed version: extract its extra
    /// directory and manifest here, then copy the archive itself to
    /// `archive_name` (the manifest's `<id>[.<version>].tar.gz`), which is
    /// where [`load_baseline`](Self::load_baseline) looks for it next time.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or copying fails.
    pub fn commit(
        &self,
        archive: &ArchiveHandle,
        archive_name: &str,
        extra_prefix: &str,
        session: &Session,
    ) -> Result<(), MyinitError> {
        let shown = self.dir.display();
        if session.dry_run {
            session
                .log
                .dry_run(&format!("would extract {extra_prefix} to workspace {shown}"));
            session
                .log
                .dry_run(&format!("would extract {MANIFEST_MEMBER} to workspace {shown}"));
        } else {
            let count = archive.extract_prefix(extra_prefix, &self.dir)?;
            archive.extract_member(MANIFEST_MEMBER, &self.dir)?;
            session.log.debug(&format!(
                "extracted {count} extra members and {MANIFEST_MEMBER} to {shown}"
            ));
        }

        let dest = self.dir.join(archive_name);
        if same_file(archive.path(), &dest) {
            session.log.info("archive already in workspace, not copying");
            return Ok(());
        }
        if session.dry_run {
            session.log.dry_run(&format!(
                "would copy {} to {}",
                archive.path().display(),
                dest.display()
            ));
        } else {
            fs::copy(archive.path(), &dest).map_err(MyinitError::io(&dest))?;
        }
        Ok(())
    }
}

/// Whether `a` and `b` name the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
