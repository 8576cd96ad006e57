//! Domain-specific error types for the deployment engine.
//!
//! Internal modules return typed errors (e.g., [`ResolveError`],
//! [`ManifestError`]) while command handlers at the CLI boundary convert
//! them to [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! MyinitError
//! ├── Resolve(ResolveError)    variable references and templates
//! ├── Manifest(ManifestError)  manifest parsing and validation
//! ├── Archive(ArchiveError)    packing and reading bundles
//! ├── External(ExternalError)  merge tool, editor, chown/chmod, commands
//! ├── Prompt(PromptError)      user aborts and closed input
//! └── Io                       reading or writing target-system files
//! ```

use thiserror::Error;

/// Top-level error type for the deployment engine.
#[derive(Error, Debug)]
pub enum MyinitError {
    /// Variable resolution failed.
    #[error("Variable error: {0}")]
    Resolve(#[from] ResolveError),

    /// The manifest could not be loaded or is invalid.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// An archive could not be written or read.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// An external process failed.
    #[error("External tool error: {0}")]
    External(#[from] ExternalError),

    /// The interactive gate stopped the run.
    #[error("{0}")]
    Prompt(#[from] PromptError),

    /// A target-system file or directory could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl MyinitError {
    /// Wrap an I/O error on `path`.
    pub fn io(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Errors raised while resolving variable references.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// A referenced name exists in no scope.
    #[error("'{0}' unresolved: not defined in entry, manifest or built-in scope")]
    UnresolvedReference(String),

    /// The reference chain is too deep (usually a cycle).
    #[error("resolving '{0}': depth limit of {limit} exceeded", limit = crate::vars::MAX_DEPTH)]
    RecursionLimit(String),

    /// The reference value is absent (`null`) or has an unsupported shape.
    #[error("'{0}' is not a valid reference")]
    InvalidReference(String),

    /// A template contains an unbalanced brace.
    #[error("malformed template for '{name}': {template}")]
    MalformedTemplate {
        /// Variable being resolved.
        name: String,
        /// Offending template text.
        template: String,
    },
}

/// Errors that arise from loading and validating a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Two entries share the same id.
    #[error("duplicate entry id: {0}")]
    DuplicateEntryId(String),

    /// Two file specs resolve to the same archive path.
    #[error("duplicate archive path: {0}")]
    DuplicateArchivePath(String),

    /// An owner string is not `user:group`, or names an unknown user/group.
    #[error("invalid owner '{owner}': {reason}")]
    InvalidOwnerSpec {
        /// Owner string as written.
        owner: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A mode is not an octal permission value.
    #[error("invalid mode '{0}': expected octal value between 000 and 777")]
    InvalidMode(String),

    /// A field holds a value outside its allowed set.
    #[error("invalid value for {field}: {value}")]
    InvalidField {
        /// Field name.
        field: String,
        /// Offending value.
        value: String,
    },

    /// The YAML document could not be parsed.
    #[error("invalid manifest {source_name}: {message}")]
    Parse {
        /// Where the document came from.
        source_name: String,
        /// Parser message.
        message: String,
    },

    /// The manifest file could not be read.
    #[error("IO error reading manifest {path}: {source}")]
    Io {
        /// Path of the manifest.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors raised by the archive codec.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// A source file could not be read or appended while packing.
    #[error("packing {path}: {source}")]
    PackingIo {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A member expected in the archive is missing.
    #[error("archive {archive} has no member {member}")]
    MemberMissing {
        /// Archive path.
        archive: String,
        /// Missing member path.
        member: String,
    },

    /// The archive could not be opened or decoded.
    #[error("reading archive {path}: {source}")]
    Io {
        /// Archive path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// `--dry` was given to a command that cannot honour it.
    #[error("--dry option is invalid when packing")]
    DryRunUnsupported,
}

/// Errors that arise from external process outcomes.
#[derive(Error, Debug)]
pub enum ExternalError {
    /// The merge tool or editor failed while resolving a conflict.
    #[error("resolving {path}: {tool} exited with {status}")]
    MergeFailed {
        /// File being resolved.
        path: String,
        /// Program that failed.
        tool: String,
        /// Exit status description.
        status: String,
    },

    /// A helper program could not be started.
    #[error("failed to execute {program}: {reason}")]
    ExternalToolFailed {
        /// Program name.
        program: String,
        /// Reason reported by the OS.
        reason: String,
    },

    /// `chown` or `chmod` exited non-zero.
    #[error("{program} {path} exited with {status}")]
    PermissionApplyFailed {
        /// `chown` or `chmod`.
        program: String,
        /// Target path.
        path: String,
        /// Exit status description.
        status: String,
    },

    /// A command entry exited non-zero without `allowFailure`.
    #[error("command entry '{entry}' exited with {status}")]
    CommandEntryFailed {
        /// Entry id.
        entry: String,
        /// Exit status description.
        status: String,
    },
}

/// Errors raised by the interaction gate.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PromptError {
    /// The user chose to stop.
    #[error("aborted by user")]
    UserAbort,

    /// Standard input closed while an answer was required.
    #[error("input closed while waiting for an answer to: {0}")]
    InputClosed(String),
}

/// Describe an optional exit code for error messages.
#[must_use]
pub fn describe_status(code: Option<i32>) -> String {
    code.map_or_else(
        || "termination by signal".to_string(),
        |c| format!("status {c}"),
    )
}
