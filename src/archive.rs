//! Archive codec: gzip-compressed tar bundles of a manifest and its files.
//!
//! [`pack`] reads every tracked file from the system and stores it under
//! its archive path, together with the extra directory and the manifest
//! itself. [`read_archive`] decodes a bundle once into an in-memory
//! [`ArchiveHandle`] and returns the manifest it carries, indexed and ready
//! for reconciliation.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read as _};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, EntryType, Header};

use crate::config::{MANIFEST_MEMBER, Manifest};
use crate::error::{ArchiveError, MyinitError};
use crate::prompt::Gate;
use crate::session::Session;
use crate::vars::{Builtins, EXTRA_PREFIX_VAR};

fn packing_error(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::PackingIo {
        path: path.display().to_string(),
        source,
    }
}

/// Build the archive for `manifest` next to `manifest_path`.
///
/// Relative system paths are taken relative to the manifest's directory.
/// Returns the path of the written archive.
///
/// # Errors
///
/// Fails with [`ArchiveError::DryRunUnsupported`] in dry-run mode, with
/// [`ArchiveError::PackingIo`] if a source file cannot be read, or with a
/// resolution or validation error.
pub fn pack(
    manifest: &mut Manifest,
    manifest_path: &Path,
    session: &mut Session,
) -> Result<PathBuf, MyinitError> {
    if session.dry_run {
        return Err(ArchiveError::DryRunUnsupported.into());
    }
    session.confirm_expected_user(manifest)?;

    let base = manifest_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let out_path = base.join(manifest.archive_file_name());
    let out = File::create(&out_path).map_err(packing_error(&out_path))?;
    let mut builder = Builder::new(GzEncoder::new(out, Compression::default()));

    for entry in 0..manifest.entries.len() {
        let count = manifest.entries.get(entry).map_or(0, |e| e.files().len());
        for file in 0..count {
            let Some(spec) = manifest
                .entries
                .get(entry)
                .and_then(|e| e.files().get(file))
                .cloned()
            else {
                continue;
            };
            if spec.from_extra {
                continue;
            }

            let paths = manifest.resolve_paths(entry, file, &mut session.gate)?;
            let source = base.join(&paths.system);
            let reader = File::open(&source).map_err(packing_error(&source))?;
            let meta = reader.metadata().map_err(packing_error(&source))?;

            let mut header = Header::new_gnu();
            header.set_metadata(&meta);
            if let Some(mode) = spec.mode {
                header.set_mode(mode.bits());
            }
            if let Some(owner) = &spec.owner {
                let (uid, gid) = owner.lookup_ids()?;
                header.set_uid(u64::from(uid));
                header.set_gid(u64::from(gid));
                header
                    .set_username(&owner.user)
                    .map_err(packing_error(&source))?;
                header
                    .set_groupname(&owner.group)
                    .map_err(packing_error(&source))?;
            }

            session.log.info(&format!(
                "adding: {} -> {}",
                paths.system.display(),
                paths.archive
            ));
            builder
                .append_data(&mut header, &paths.archive, reader)
                .map_err(packing_error(&source))?;
        }
    }

    let prefix = manifest.resolve_global(EXTRA_PREFIX_VAR, &mut session.gate)?;
    let extra_dir = base.join(&prefix);
    if extra_dir.is_dir() {
        session.log.info(&format!("adding: {prefix}"));
        builder
            .append_dir_all(prefix.trim_end_matches('/'), &extra_dir)
            .map_err(packing_error(&extra_dir))?;
    } else {
        session.log.warn(&format!(
            "extra archive dir {} does not exist, not packing it",
            extra_dir.display()
        ));
    }

    session
        .log
        .info(&format!("adding: {} -> {MANIFEST_MEMBER}", manifest_path.display()));
    builder
        .append_path_with_name(manifest_path, MANIFEST_MEMBER)
        .map_err(packing_error(manifest_path))?;

    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(packing_error(&out_path))?;
    Ok(out_path)
}

/// A decoded archive member.
#[derive(Debug, Clone)]
struct Member {
    dir: bool,
    mode: u32,
    uid: u64,
    gid: u64,
    data: Vec<u8>,
}

/// An archive decoded into memory, looked up by member path.
#[derive(Debug)]
pub struct ArchiveHandle {
    path: PathBuf,
    members: BTreeMap<String, Member>,
}

/// Normalize a member path: no leading `./`, no trailing `/`.
fn member_key(raw: &str) -> String {
    raw.trim_start_matches("./").trim_end_matches('/').to_string()
}

impl ArchiveHandle {
    /// Decode the archive at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if the file is unreadable or not a
    /// gzip-compressed tar.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let io_error = |source| ArchiveError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = File::open(path).map_err(io_error)?;
        let mut archive = Archive::new(GzDecoder::new(file));

        let mut members = BTreeMap::new();
        for entry in archive.entries().map_err(io_error)? {
            let mut entry = entry.map_err(io_error)?;
            let key = member_key(&entry.path().map_err(io_error)?.to_string_lossy());
            let header = entry.header();
            let kind = header.entry_type();
            if !matches!(kind, EntryType::Regular | EntryType::Directory) {
                continue;
            }
            let mut member = Member {
                dir: kind.is_dir(),
                mode: header.mode().map_err(io_error)?,
                uid: header.uid().map_err(io_error)?,
                gid: header.gid().map_err(io_error)?,
                data: Vec::new(),
            };
            entry.read_to_end(&mut member.data).map_err(io_error)?;
            members.insert(key, member);
        }

        Ok(Self {
            path: path.to_path_buf(),
            members,
        })
    }

    /// Path the archive was read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contents of the file stored at `member`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::MemberMissing`] if no such file exists.
    pub fn read(&self, member: &str) -> Result<&[u8], ArchiveError> {
        self.members
            .get(&member_key(member))
            .filter(|m| !m.dir)
            .map(|m| m.data.as_slice())
            .ok_or_else(|| ArchiveError::MemberMissing {
                archive: self.path.display().to_string(),
                member: member.to_string(),
            })
    }

    /// Permission bits and owner ids recorded for `member`.
    #[must_use]
    pub fn metadata(&self, member: &str) -> Option<(u32, u64, u64)> {
        self.members
            .get(&member_key(member))
            .map(|m| (m.mode, m.uid, m.gid))
    }

    /// The manifest document stored in the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the member is missing or not UTF-8.
    pub fn manifest_text(&self) -> Result<&str, ArchiveError> {
        std::str::from_utf8(self.read(MANIFEST_MEMBER)?).map_err(|e| ArchiveError::Io {
            path: format!("{}:{MANIFEST_MEMBER}", self.path.display()),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })
    }

    /// Write one member below `dest`, keeping its archive path.
    ///
    /// # Errors
    ///
    /// Returns an error if the member is missing or cannot be written.
    pub fn extract_member(&self, member: &str, dest: &Path) -> Result<(), ArchiveError> {
        let key = member_key(member);
        let found = self
            .members
            .get(&key)
            .ok_or_else(|| ArchiveError::MemberMissing {
                archive: self.path.display().to_string(),
                member: member.to_string(),
            })?;
        write_member(dest, &key, found)
    }

    /// Write every member whose path starts with `prefix` below `dest`.
    /// Returns the number of members written.
    ///
    /// # Errors
    ///
    /// Returns an error if a member cannot be written.
    pub fn extract_prefix(&self, prefix: &str, dest: &Path) -> Result<usize, ArchiveError> {
        let mut written = 0;
        for (key, member) in self.members.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            write_member(dest, key, member)?;
            written += 1;
        }
        Ok(written)
    }
}

fn write_member(dest: &Path, key: &str, member: &Member) -> Result<(), ArchiveError> {
    let relative = Path::new(key);
    if relative
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        return Err(ArchiveError::Io {
            path: key.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "unsafe member path"),
        });
    }
    let target = dest.join(relative);
    let io_error = |source| ArchiveError::Io {
        path: target.display().to_string(),
        source,
    };

    if member.dir {
        return fs::create_dir_all(&target).map_err(io_error);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(&target, &member.data).map_err(io_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&target, fs::Permissions::from_mode(member.mode & 0o7777))
            .map_err(io_error)?;
    }
    Ok(())
}

/// Open an archive and load the manifest it carries.
///
/// The manifest gets the archive path as the `Archive` variable and its
/// archive-path index built.
///
/// # Errors
///
/// Returns an error if the archive cannot be decoded or its manifest is
/// invalid.
pub fn read_archive(
    path: &Path,
    builtins: Builtins,
    gate: &mut Gate,
) -> Result<(ArchiveHandle, Manifest), MyinitError> {
    let handle = ArchiveHandle::open(path)?;
    let mut manifest = Manifest::parse(
        handle.manifest_text()?,
        &format!("{}:{MANIFEST_MEMBER}", path.display()),
        builtins,
    )?;
    manifest.inject_archive_path(path);
    manifest.build_index(gate)?;
    Ok((handle, manifest))
}
