//! Core logging types: outcome entries and the [`Log`] trait.

/// One recorded deployment step (an entry or a single file) for the summary.
#[derive(Debug, Clone)]
pub struct OutcomeEntry {
    /// Human-readable step name, e.g. `shellrc: /home/alice/.bashrc`.
    pub name: String,
    /// What happened to it.
    pub outcome: Outcome,
    /// Optional detail message (e.g., why it was skipped).
    pub message: Option<String>,
}

/// What the run did with a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The file was written or the command ran.
    Applied,
    /// The user (or a pinned answer) chose to leave it alone.
    Skipped,
    /// Dry run; nothing was changed.
    DryRun,
    /// A command entry failed but declared `allowFailure`.
    Failed,
}

/// Abstraction over logging backends, so engine code can log without
/// knowing whether output goes to the console or is captured in a test.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a step result for the summary.
    fn record(&self, name: &str, outcome: Outcome, message: Option<&str>);
}
