//! Run logging: console and log-file output through [`tracing`], plus the
//! per-file outcome summary printed at the end of an unpack.

mod logger;
mod subscriber;
mod types;
mod utils;

pub use logger::Logger;
pub use subscriber::init_subscriber;
pub use types::{Log, Outcome, OutcomeEntry};

/// A logger whose events reach a [`FileLayer`](subscriber::FileLayer) in a
/// temp dir, through a subscriber installed for the current thread only.
///
/// Keep the returned guard alive for the rest of the test.
#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn isolated_logger() -> (Logger, tempfile::TempDir, tracing::dispatcher::DefaultGuard) {
    use tracing_subscriber::{Layer as _, filter::LevelFilter, layer::SubscriberExt as _};
    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = tmp.path().join("test.log");
    let file_layer = subscriber::FileLayer::create(&path, "test").expect("open log file");
    let subscriber =
        tracing_subscriber::registry().with(file_layer.with_filter(LevelFilter::DEBUG));
    let guard = tracing::dispatcher::set_default(&tracing::Dispatch::new(subscriber));
    (Logger::new(Some(path)), tmp, guard)
}
