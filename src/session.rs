//! Per-run state threaded through packing and unpacking.
use std::sync::Arc;

use crate::config::Manifest;
use crate::error::PromptError;
use crate::exec::Executor;
use crate::logging::Log;
use crate::platform::Identity;
use crate::prompt::{Choice, Gate};

/// Everything a command needs besides the manifest.
pub struct Session {
    /// Prompts and the pinned-answer table for this run.
    pub gate: Gate,
    /// Logger for output and outcome recording.
    pub log: Arc<dyn Log>,
    /// Runs external programs (shell, merge tool, chown, chmod).
    pub executor: Arc<dyn Executor>,
    /// The invoking user and group.
    pub identity: Identity,
    /// Log mutations instead of performing them.
    pub dry_run: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("gate", &self.gate)
            .field("log", &"<dyn Log>")
            .field("executor", &self.executor)
            .field("identity", &self.identity)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Session {
    /// Create a session.
    #[must_use]
    pub fn new(
        gate: Gate,
        log: Arc<dyn Log>,
        executor: Arc<dyn Executor>,
        identity: Identity,
        dry_run: bool,
    ) -> Self {
        Self {
            gate,
            log,
            executor,
            identity,
            dry_run,
        }
    }

    /// Ask before continuing if the manifest expects a different user.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::UserAbort`] unless the user answers yes.
    pub fn confirm_expected_user(&mut self, manifest: &Manifest) -> Result<(), PromptError> {
        let Some(expected) = manifest.expect_as_user.as_deref() else {
            return Ok(());
        };
        if expected == self.identity.user {
            return Ok(());
        }
        let answer = self.gate.ask(
            "incorrect_user",
            &format!(
                "This configuration expects you to be user {expected}, but you are currently user {}. Continue? ",
                self.identity.user
            ),
            &[Choice::Yes, Choice::No, Choice::Exit],
        )?;
        if answer == Choice::Yes {
            Ok(())
        } else {
            Err(PromptError::UserAbort)
        }
    }
}
