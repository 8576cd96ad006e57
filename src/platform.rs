//! OS identity: who is running the tool, and `user:group` owner lookups.
use std::fmt;

use nix::unistd::{Group, User, getegid, geteuid};

use crate::error::ManifestError;

/// The effective user and group of the running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User name.
    pub user: String,
    /// Effective uid.
    pub uid: u32,
    /// Primary group name.
    pub group: String,
    /// Effective gid.
    pub gid: u32,
}

impl Identity {
    /// Detect the effective identity of the current process.
    ///
    /// Names fall back to the numeric id when the account database has no
    /// entry (e.g. in minimal containers).
    #[must_use]
    pub fn detect() -> Self {
        let uid = geteuid();
        let gid = getegid();
        let user = User::from_uid(uid)
            .ok()
            .flatten()
            .map_or_else(|| uid.to_string(), |u| u.name);
        let group = Group::from_gid(gid)
            .ok()
            .flatten()
            .map_or_else(|| gid.to_string(), |g| g.name);
        Self {
            user,
            uid: uid.as_raw(),
            group,
            gid: gid.as_raw(),
        }
    }

    /// Create an identity with explicit values (for testing).
    #[must_use]
    pub fn new(user: &str, uid: u32, group: &str, gid: u32) -> Self {
        Self {
            user: user.to_string(),
            uid,
            group: group.to_string(),
            gid,
        }
    }
}

/// A parsed `user:group` owner string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerSpec {
    /// User name.
    pub user: String,
    /// Group name.
    pub group: String,
}

impl OwnerSpec {
    /// Parse `user:group`; both halves must be non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidOwnerSpec`] if the string is malformed.
    pub fn parse(owner: &str) -> Result<Self, ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidOwnerSpec {
            owner: owner.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = owner.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(user), Some(group), None) if !user.is_empty() && !group.is_empty() => {
                Ok(Self {
                    user: user.to_string(),
                    group: group.to_string(),
                })
            }
            _ => Err(invalid("expected exactly one ':' between user and group")),
        }
    }

    /// Map the names to numeric ids through the account database.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidOwnerSpec`] if the user or group is unknown.
    pub fn lookup_ids(&self) -> Result<(u32, u32), ManifestError> {
        let unknown = |what: &str| ManifestError::InvalidOwnerSpec {
            owner: self.to_string(),
            reason: what.to_string(),
        };
        let user = User::from_name(&self.user)
            .ok()
            .flatten()
            .ok_or_else(|| unknown(&format!("unknown user {}", self.user)))?;
        let group = Group::from_name(&self.group)
            .ok()
            .flatten()
            .ok_or_else(|| unknown(&format!("unknown group {}", self.group)))?;
        Ok((user.uid.as_raw(), group.gid.as_raw()))
    }
}

impl fmt::Display for OwnerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user, self.group)
    }
}
