//! Manifest loading: YAML parsing, lowering and validation.
pub mod manifest;
pub mod validation;
pub mod yaml_loader;

pub use manifest::{
    ARCHIVE_VAR, CommandSpec, Entry, EntryKind, ExpectWhenUnpack, FilePaths, FileSpec,
    MANIFEST_MEMBER, Manifest,
};
pub use validation::Mode;
