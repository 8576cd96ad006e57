//! Structured logger with dry-run awareness and summary collection.
use std::path::PathBuf;
use std::sync::Mutex;

use super::types::{Log, Outcome, OutcomeEntry};

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Front end over [`tracing`] that also collects per-file outcomes for the
/// end-of-run summary.
///
/// Where messages end up is decided by the installed subscriber; see
/// [`init_subscriber`](super::subscriber::init_subscriber).
#[derive(Debug)]
pub struct Logger {
    outcomes: Mutex<Vec<OutcomeEntry>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a logger. `log_file` is only mentioned in the summary.
    #[must_use]
    pub const fn new(log_file: Option<PathBuf>) -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            log_file,
        }
    }

    /// Return the log file path, if available.
    #[cfg(test)]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Return a clone of all recorded outcomes.
    #[must_use]
    pub fn outcomes(&self) -> Vec<OutcomeEntry> {
        self.outcomes.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: "myinit::stage", "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose; always
    /// written to the log file).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        tracing::info!(target: "myinit::dry_run", "{msg}");
    }

    /// Record a step result for the summary.
    pub fn record(&self, name: &str, outcome: Outcome, message: Option<&str>) {
        if let Ok(mut guard) = self.outcomes.lock() {
            guard.push(OutcomeEntry {
                name: name.to_string(),
                outcome,
                message: message.map(String::from),
            });
        }
    }

    /// Print one line per recorded step, the totals and the log file.
    pub fn print_summary(&self) {
        let outcomes = self.outcomes();
        if outcomes.is_empty() {
            return;
        }
        self.stage("Summary");
        for line in summary_lines(&outcomes) {
            self.info(&line);
        }
        if let Some(path) = &self.log_file {
            self.info(&format!("{DIM}log: {}{RESET}", path.display()));
        }
    }
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

const fn marker(outcome: Outcome) -> (&'static str, &'static str) {
    match outcome {
        Outcome::Applied => ("✓", "\x1b[32m"),
        Outcome::Skipped => ("○", "\x1b[33m"),
        Outcome::DryRun => ("~", "\x1b[37m"),
        Outcome::Failed => ("✗", "\x1b[31m"),
    }
}

/// Colored summary lines: each step, then the totals. Outcomes with a zero
/// count are left out of the totals.
fn summary_lines(outcomes: &[OutcomeEntry]) -> Vec<String> {
    let mut lines: Vec<String> = outcomes
        .iter()
        .map(|entry| {
            let (icon, color) = marker(entry.outcome);
            let detail = entry
                .message
                .as_deref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));
            format!("{color}{icon} {}{detail}{RESET}", entry.name)
        })
        .collect();

    let totals: Vec<String> = [
        (Outcome::Applied, "applied"),
        (Outcome::Skipped, "skipped"),
        (Outcome::DryRun, "dry-run"),
        (Outcome::Failed, "failed"),
    ]
    .into_iter()
    .filter_map(|(outcome, label)| {
        let n = outcomes.iter().filter(|e| e.outcome == outcome).count();
        let (_, color) = marker(outcome);
        (n > 0).then(|| format!("{color}{n} {label}{RESET}"))
    })
    .collect();
    let noun = if outcomes.len() == 1 { "step" } else { "steps" };
    lines.push(format!("{} {noun}: {}", outcomes.len(), totals.join(", ")));
    lines
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn record(&self, name: &str, outcome: Outcome, message: Option<&str>) {
        self.record(name, outcome, message);
    }
}
