//! YAML document loading.
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::ManifestError;

/// Read and deserialize a YAML file.
///
/// # Errors
///
/// Returns [`ManifestError::Io`] if the file cannot be read and
/// [`ManifestError::Parse`] if it is not a valid document of type `T`.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_document(&content, &path.display().to_string())
}

/// Deserialize a YAML document held in memory.
///
/// `source_name` names the document in error messages.
///
/// # Errors
///
/// Returns [`ManifestError::Parse`] if the text is not a valid document of
/// type `T`.
pub fn parse_document<T: DeserializeOwned>(text: &str, source_name: &str) -> Result<T, ManifestError> {
    serde_yaml::from_str(text).map_err(|e| ManifestError::Parse {
        source_name: source_name.to_string(),
        message: e.to_string(),
    })
}
