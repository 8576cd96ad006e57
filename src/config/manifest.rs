//! The deployment manifest: entries, file specs and their variables.
//!
//! A manifest is parsed with serde into a raw document, then lowered into
//! typed [`Entry`] values whose templates live in the manifest's
//! [`VarTable`]. Lowering validates ids, modes and owners, so a loaded
//! manifest never holds a malformed field.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::validation::{Mode, ensure_unique_ids};
use super::yaml_loader;
use crate::error::{ManifestError, MyinitError};
use crate::platform::OwnerSpec;
use crate::prompt::Gate;
use crate::vars::{Builtins, ScopeId, VarId, VarNode, VarTable, scalar_text};

/// Archive member holding the manifest itself.
pub const MANIFEST_MEMBER: &str = "config.yaml";

/// Synthetic global variable holding the path of the archive being unpacked.
pub const ARCHIVE_VAR: &str = "Archive";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    id: String,
    #[serde(default)]
    conf_version: Option<Value>,
    #[serde(default)]
    expect_as_user: Option<String>,
    #[serde(default)]
    common_var_dict: Option<Mapping>,
    #[serde(default)]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHead {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ask_for_confirm: bool,
    #[serde(default)]
    var_dict: Option<Mapping>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawEntry {
    Command {
        #[serde(flatten)]
        head: RawHead,
        command: Value,
        #[serde(default, rename = "asUser")]
        as_user: Option<String>,
        #[serde(default, rename = "allowFailure")]
        allow_failure: bool,
    },
    File {
        #[serde(flatten)]
        head: RawHead,
        #[serde(default)]
        files: Vec<RawFile>,
    },
}

impl RawEntry {
    const fn head(&self) -> &RawHead {
        match self {
            Self::Command { head, .. } | Self::File { head, .. } => head,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFile {
    name: String,
    archive_dir: Value,
    system_dir: Value,
    #[serde(default)]
    mode: Option<Value>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    expect_when_unpack: ExpectWhenUnpack,
    #[serde(default)]
    from_extra_archive_dir: bool,
}

/// What the target path is expected to look like before unpacking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpectWhenUnpack {
    /// The file should not exist yet; ask before overwriting it.
    NotExist,
    /// The file should already exist; ask before creating it.
    Exist,
    /// No expectation.
    #[default]
    None,
}

/// One tracked file of a file entry.
#[derive(Debug, Clone)]
pub struct FileSpec {
    /// File name, joined to both directories.
    pub name: String,
    /// Directory inside the archive (`archiveDir`).
    pub archive_dir: VarId,
    /// Directory on the target system (`systemDir`).
    pub system_dir: VarId,
    /// Permission bits applied with `chmod` after writing.
    pub mode: Option<Mode>,
    /// Owner applied with `chown` after writing.
    pub owner: Option<OwnerSpec>,
    /// `expectWhenUnpack` policy.
    pub expect: ExpectWhenUnpack,
    /// Shipped through the extra directory; copied but never compared.
    pub from_extra: bool,
}

/// A shell command entry.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Command line template.
    pub command: VarId,
    /// Run through `sudo -u` when this differs from the current user.
    pub as_user: Option<String>,
    /// A failing exit is recorded instead of ending the run.
    pub allow_failure: bool,
}

/// What an entry deploys.
#[derive(Debug, Clone)]
pub enum EntryKind {
    /// Runs a shell command.
    Command(CommandSpec),
    /// Installs files, in order.
    File(Vec<FileSpec>),
}

/// A unit of deployment.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Unique id, also matched by selectors.
    pub id: String,
    /// Optional display name.
    pub name: Option<String>,
    /// Ask before unpacking this entry.
    pub ask_for_confirm: bool,
    /// The entry-local variable scope.
    pub scope: ScopeId,
    /// Command or files.
    pub kind: EntryKind,
}

impl Entry {
    /// The display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// The file specs of a file entry (empty for commands).
    #[must_use]
    pub fn files(&self) -> &[FileSpec] {
        match &self.kind {
            EntryKind::File(files) => files,
            EntryKind::Command(_) => &[],
        }
    }
}

/// Resolved locations of one file spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePaths {
    /// Member path inside the archive.
    pub archive: String,
    /// Destination on the target system.
    pub system: PathBuf,
}

/// A loaded manifest with its variable table.
#[derive(Debug)]
pub struct Manifest {
    /// Bundle id; names the archive.
    pub id: String,
    /// `confVersion`, rendered as text.
    pub conf_version: Option<String>,
    /// User the bundle is meant to be unpacked as.
    pub expect_as_user: Option<String>,
    /// Entries in manifest order.
    pub entries: Vec<Entry>,
    /// Every variable and template of the manifest.
    pub vars: VarTable,
    /// Entry id → archive path → file position, filled by [`build_index`](Self::build_index).
    index: HashMap<String, HashMap<String, usize>>,
}

impl Manifest {
    /// Load and lower the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] if the file is unreadable or invalid.
    pub fn load(path: &Path, builtins: Builtins) -> Result<Self, ManifestError> {
        let raw: RawManifest = yaml_loader::load_document(path)?;
        Self::lower(raw, builtins)
    }

    /// Parse and lower a manifest held in memory.
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] if the document is invalid.
    pub fn parse(text: &str, source_name: &str, builtins: Builtins) -> Result<Self, ManifestError> {
        let raw: RawManifest = yaml_loader::parse_document(text, source_name)?;
        Self::lower(raw, builtins)
    }

    fn lower(raw: RawManifest, builtins: Builtins) -> Result<Self, ManifestError> {
        ensure_unique_ids(raw.entries.iter().map(|e| e.head().id.as_str()))?;

        let mut vars = VarTable::new(builtins);
        for (name, value) in raw.common_var_dict.iter().flatten() {
            vars.define_global(&key_name(name)?, VarNode::from_yaml(value));
        }

        let mut entries = Vec::with_capacity(raw.entries.len());
        for raw_entry in raw.entries {
            entries.push(lower_entry(raw_entry, &mut vars)?);
        }

        Ok(Self {
            id: raw.id,
            conf_version: raw.conf_version.as_ref().and_then(scalar_text),
            expect_as_user: raw.expect_as_user,
            entries,
            vars,
            index: HashMap::new(),
        })
    }

    /// File name of the archive built from this manifest:
    /// `<id>[.<version>].tar.gz`.
    #[must_use]
    pub fn archive_file_name(&self) -> String {
        match &self.conf_version {
            Some(version) => format!("{}.{version}.tar.gz", self.id),
            None => format!("{}.tar.gz", self.id),
        }
    }

    fn file_at(&self, entry: usize, file: usize) -> Result<(&Entry, &FileSpec), ManifestError> {
        let e = self.entries.get(entry).ok_or_else(|| ManifestError::InvalidField {
            field: "entry".to_string(),
            value: entry.to_string(),
        })?;
        let spec = e.files().get(file).ok_or_else(|| ManifestError::InvalidField {
            field: format!("{}.files", e.id),
            value: file.to_string(),
        })?;
        Ok((e, spec))
    }

    /// Resolve only the archive path of a file spec.
    ///
    /// Leaves `systemDir` alone, so indexing never asks for variables that
    /// only the system side uses.
    ///
    /// # Errors
    ///
    /// Returns an error if the `archiveDir` template cannot be resolved.
    pub fn resolve_archive_path(
        &mut self,
        entry: usize,
        file: usize,
        gate: &mut Gate,
    ) -> Result<String, MyinitError> {
        let (e, spec) = self.file_at(entry, file)?;
        let (scope, dir, name) = (e.scope, spec.archive_dir, spec.name.clone());
        let label = format!("{}/{name}/archiveDir", e.id);
        let archive_dir = self.vars.resolve(&label, dir, Some(scope), gate)?;
        Ok(join_path(&archive_dir, &name))
    }

    /// Resolve the archive and system paths of a file spec.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory template cannot be resolved.
    pub fn resolve_paths(
        &mut self,
        entry: usize,
        file: usize,
        gate: &mut Gate,
    ) -> Result<FilePaths, MyinitError> {
        let archive = self.resolve_archive_path(entry, file, gate)?;
        let (e, spec) = self.file_at(entry, file)?;
        let (scope, dir, name) = (e.scope, spec.system_dir, spec.name.clone());
        let label = format!("{}/{name}/systemDir", e.id);
        let system_dir = self.vars.resolve(&label, dir, Some(scope), gate)?;
        Ok(FilePaths {
            archive,
            system: PathBuf::from(join_path(&system_dir, &name)),
        })
    }

    /// Resolve the command line of a command entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be resolved.
    pub fn resolve_command(&mut self, entry: usize, gate: &mut Gate) -> Result<String, MyinitError> {
        let target = self.entries.get(entry).and_then(|e| match &e.kind {
            EntryKind::Command(spec) => Some((e.scope, spec.command)),
            EntryKind::File(_) => None,
        });
        let Some((scope, command)) = target else {
            return Err(ManifestError::InvalidField {
                field: "command".to_string(),
                value: entry.to_string(),
            }
            .into());
        };
        let label = self
            .entries
            .get(entry)
            .map_or_else(String::new, |e| format!("{}/command", e.id));
        self.vars.resolve(&label, command, Some(scope), gate)
    }

    /// Resolve a manifest-level variable by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name cannot be resolved.
    pub fn resolve_global(&mut self, name: &str, gate: &mut Gate) -> Result<String, MyinitError> {
        self.vars.resolve_name(name, None, gate)
    }

    /// Make the archive path available to templates as `{Archive}`.
    pub fn inject_archive_path(&mut self, archive: &Path) {
        self.vars.define_global(
            ARCHIVE_VAR,
            VarNode::Value {
                text: archive.display().to_string(),
                literal: true,
            },
        );
    }

    /// Build the archive-path lookup for every file entry.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::DuplicateArchivePath`] if two file specs
    /// resolve to the same archive path, or a resolution error.
    pub fn build_index(&mut self, gate: &mut Gate) -> Result<(), MyinitError> {
        let mut index: HashMap<String, HashMap<String, usize>> = HashMap::new();
        let mut seen = std::collections::HashSet::new();

        for entry in 0..self.entries.len() {
            for file in 0..self.entries.get(entry).map_or(0, |e| e.files().len()) {
                let archive = self.resolve_archive_path(entry, file, gate)?;
                if !seen.insert(archive.clone()) {
                    return Err(ManifestError::DuplicateArchivePath(archive).into());
                }
                if let Some(e) = self.entries.get(entry) {
                    index.entry(e.id.clone()).or_default().insert(archive, file);
                }
            }
        }

        self.index = index;
        Ok(())
    }

    /// Whether entry `entry_id` tracks a file at `archive_path`.
    ///
    /// Only meaningful after [`build_index`](Self::build_index).
    #[must_use]
    pub fn tracks(&self, entry_id: &str, archive_path: &str) -> bool {
        self.index
            .get(entry_id)
            .is_some_and(|files| files.contains_key(archive_path))
    }
}

fn key_name(key: &Value) -> Result<String, ManifestError> {
    scalar_text(key).ok_or_else(|| ManifestError::InvalidField {
        field: "variable name".to_string(),
        value: format!("{key:?}"),
    })
}

fn lower_entry(raw: RawEntry, vars: &mut VarTable) -> Result<Entry, ManifestError> {
    let scope = vars.new_scope();
    let head = raw.head();
    for (name, value) in head.var_dict.iter().flatten() {
        vars.define_local(scope, &key_name(name)?, VarNode::from_yaml(value));
    }
    let (id, name, ask_for_confirm) = (head.id.clone(), head.name.clone(), head.ask_for_confirm);

    let kind = match raw {
        RawEntry::Command {
            command,
            as_user,
            allow_failure,
            ..
        } => EntryKind::Command(CommandSpec {
            command: vars.alloc(VarNode::from_yaml(&command)),
            as_user,
            allow_failure,
        }),
        RawEntry::File { files, .. } => EntryKind::File(
            files
                .into_iter()
                .map(|f| lower_file(f, vars))
                .collect::<Result<_, _>>()?,
        ),
    };

    Ok(Entry {
        id,
        name,
        ask_for_confirm,
        scope,
        kind,
    })
}

fn lower_file(raw: RawFile, vars: &mut VarTable) -> Result<FileSpec, ManifestError> {
    Ok(FileSpec {
        mode: raw.mode.as_ref().map(Mode::from_yaml).transpose()?,
        owner: raw.owner.as_deref().map(OwnerSpec::parse).transpose()?,
        archive_dir: vars.alloc(VarNode::from_yaml(&raw.archive_dir)),
        system_dir: vars.alloc(VarNode::from_yaml(&raw.system_dir)),
        expect: raw.expect_when_unpack,
        from_extra: raw.from_extra_archive_dir,
        name: raw.name,
    })
}

/// Join a resolved directory and a file name the way a shell path would:
/// an absolute name wins, an empty directory is ignored.
#[must_use]
pub fn join_path(dir: &str, name: &str) -> String {
    if name.starts_with('/') || dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
