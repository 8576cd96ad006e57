//! Tracing subscriber setup: console formatter, file layer, and initialisation.
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::utils::{format_utc_datetime, format_utc_time, log_file_path, strip_ansi};

/// Extracts the `message` field from a [`tracing::Event`].
#[derive(Default)]
struct MessageExtractor {
    message: String,
}

impl tracing::field::Visit for MessageExtractor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

/// A [`tracing_subscriber::Layer`] appending every event, ANSI-stripped
/// and timestamped, to the run's log file.
///
/// Filtered at `DEBUG` independently of the console, so the file always
/// holds the full run.
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Truncate `path`, write the run header for `command` and keep the
    /// file open for appending. `None` if the file cannot be written.
    pub(super) fn create(path: &Path, command: &str) -> Option<Self> {
        let rule = "=".repeat(42);
        let header = format!(
            "{rule}\nmyinit {} {command} {}\n{rule}\n",
            crate::cli::version(),
            format_utc_datetime(),
        );
        fs::write(path, header).ok()?;
        let file = fs::OpenOptions::new().append(true).open(path).ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }
}

/// Console/file presentation class of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Stage,
    DryRun,
    Error,
    Warn,
    Info,
    Debug,
}

impl Channel {
    fn classify(level: tracing::Level, target: &str) -> Self {
        match (level, target) {
            (tracing::Level::ERROR, _) => Self::Error,
            (tracing::Level::WARN, _) => Self::Warn,
            (tracing::Level::INFO, STAGE_TARGET) => Self::Stage,
            (tracing::Level::INFO, DRY_RUN_TARGET) => Self::DryRun,
            (tracing::Level::INFO, _) => Self::Info,
            _ => Self::Debug,
        }
    }
}

/// Target used by [`Logger::stage`](super::Logger::stage).
const STAGE_TARGET: &str = "myinit::stage";
/// Target used by [`Logger::dry_run`](super::Logger::dry_run).
const DRY_RUN_TARGET: &str = "myinit::dry_run";

/// Render one log-file line (no ANSI, timestamp prefix).
fn file_line(channel: Channel, ts: &str, msg: &str) -> String {
    match channel {
        Channel::Stage => format!("[{ts}] ==> {msg}"),
        Channel::DryRun => format!("[{ts}]     [dry run] {msg}"),
        Channel::Error => format!("[{ts}]     [error] {msg}"),
        Channel::Warn => format!("[{ts}]     [warn] {msg}"),
        Channel::Debug => format!("[{ts}]     [debug] {msg}"),
        Channel::Info => format!("[{ts}]     {msg}"),
    }
}

/// Render one console line.
fn console_line(channel: Channel, msg: &str) -> String {
    match channel {
        Channel::Error => format!("\x1b[31mERROR\x1b[0m {msg}"),
        Channel::Warn => format!("\x1b[33mWARN\x1b[0m  {msg}"),
        Channel::Stage => format!("\x1b[1;34m==>\x1b[0m \x1b[1m{msg}\x1b[0m"),
        Channel::DryRun => format!("  \x1b[33m[DRY RUN]\x1b[0m {msg}"),
        Channel::Info => format!("  {msg}"),
        Channel::Debug => format!("  \x1b[2m{msg}\x1b[0m"),
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let channel = Channel::classify(*metadata.level(), metadata.target());

        let mut extractor = MessageExtractor::default();
        event.record(&mut extractor);
        let line = file_line(channel, &format_utc_time(), &strip_ansi(&extractor.message));

        if let Ok(mut f) = self.file.lock() {
            writeln!(f, "{line}").ok();
        }
    }
}

/// A [`tracing_subscriber::fmt::FormatEvent`] that emits the myinit console
/// style: colored level tags, `==>` stage headers, indented details.
struct ConsoleFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let channel = Channel::classify(*metadata.level(), metadata.target());

        let mut extractor = MessageExtractor::default();
        event.record(&mut extractor);
        writeln!(writer, "{}", console_line(channel, &extractor.message))
    }
}

/// Install the global [`tracing`] subscriber for one run of `command`.
///
/// Console events go to stdout, with warnings and errors on stderr;
/// `MYINIT_LOG` (an `EnvFilter` directive) overrides the level picked by
/// `verbose`. Every event is also appended to
/// `$XDG_CACHE_HOME/myinit/<command>.log`, whose path is returned when the
/// file could be opened. Call once, before anything logs.
pub fn init_subscriber(verbose: bool, command: &str) -> Option<PathBuf> {
    use tracing_subscriber::fmt::writer::MakeWriterExt as _;
    use tracing_subscriber::{
        EnvFilter, Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let console_filter = EnvFilter::try_from_env("MYINIT_LOG")
        .unwrap_or_else(|_| EnvFilter::default().add_directive(console_level.into()));

    let make_writer = std::io::stderr
        .with_max_level(tracing::Level::WARN)
        .and(std::io::stdout.with_min_level(tracing::Level::INFO));

    let console_layer = fmt::layer()
        .event_format(ConsoleFormatter)
        .with_writer(make_writer)
        .with_filter(console_filter);

    let log_file = log_file_path(command);
    let file_layer = log_file
        .as_deref()
        .and_then(|path| FileLayer::create(path, command));
    let opened = file_layer.is_some();

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer.map(|layer| layer.with_filter(LevelFilter::DEBUG)))
        .init();

    log_file.filter(|_| opened)
}
