//! Field-level checks applied while lowering a manifest.
use std::collections::HashSet;
use std::fmt;

use serde_yaml::Value;

use crate::error::ManifestError;
use crate::vars::scalar_text;

/// Largest permission value a file spec may carry.
const MAX_MODE: u32 = 0o777;

/// A validated permission mode (`0o000..=0o777`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(u32);

impl Mode {
    /// Parse a mode from its YAML form.
    ///
    /// Strings are read as octal digits (`"644"`, `"0600"`). Integers are
    /// taken as the numeric permission value, so YAML `0o644` works while
    /// a bare `644` is out of range.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidMode`] for anything else.
    pub fn from_yaml(value: &Value) -> Result<Self, ManifestError> {
        let invalid = || {
            ManifestError::InvalidMode(scalar_text(value).unwrap_or_else(|| format!("{value:?}")))
        };
        let bits = match value {
            Value::String(s) => validate_octal_mode(s).ok_or_else(invalid)?,
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(invalid)?,
            _ => return Err(invalid()),
        };
        if bits > MAX_MODE {
            return Err(invalid());
        }
        Ok(Self(bits))
    }

    /// The raw permission bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

/// Parse an octal digit string; `None` if empty or not octal.
fn validate_octal_mode(mode: &str) -> Option<u32> {
    if mode.is_empty() || !mode.chars().all(|c| ('0'..='7').contains(&c)) {
        return None;
    }
    u32::from_str_radix(mode, 8).ok()
}

/// Reject the first id that appears twice.
///
/// # Errors
///
/// Returns [`ManifestError::DuplicateEntryId`] naming the repeated id.
pub fn ensure_unique_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Result<(), ManifestError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ManifestError::DuplicateEntryId(id.to_string()));
        }
    }
    Ok(())
}
