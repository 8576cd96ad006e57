//! Log file location, ANSI stripping and timestamps.
use std::ffi::OsString;
use std::path::PathBuf;

/// Remove terminal escape sequences so console text can go to the log file.
///
/// A CSI sequence (`ESC [`) runs up to its final byte in `@`..=`~`. Any
/// other escape drops the `ESC` and the character after it.
pub(super) fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('\x1b') {
        let (text, tail) = rest.split_at(pos);
        out.push_str(text);
        rest = after_escape(tail);
    }
    out.push_str(rest);
    out
}

/// The remainder of `tail` (which starts with `ESC`) after its sequence.
fn after_escape(tail: &str) -> &str {
    let mut chars = tail.char_indices().skip(1);
    let last = match chars.next() {
        Some((_, '[')) => chars.find(|(_, c)| ('@'..='~').contains(c)),
        other => other,
    };
    last.and_then(|(i, c)| tail.get(i + c.len_utf8()..))
        .unwrap_or("")
}

/// Directory holding myinit's log files, given `XDG_CACHE_HOME` and `HOME`.
fn log_dir_from(xdg_cache: Option<OsString>, home: Option<OsString>) -> PathBuf {
    let cache = xdg_cache
        .filter(|dir| !dir.is_empty())
        .map_or_else(
            || home.map_or_else(|| PathBuf::from("."), PathBuf::from).join(".cache"),
            PathBuf::from,
        );
    cache.join("myinit")
}

/// `<cache>/myinit/<command>.log`, creating the directory.
///
/// `None` if the directory cannot be created; the run then logs to the
/// console only.
pub(super) fn log_file_path(command: &str) -> Option<PathBuf> {
    let dir = log_dir_from(
        std::env::var_os("XDG_CACHE_HOME"),
        std::env::var_os("HOME"),
    );
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir.join(format!("{command}.log")))
}

/// Run header timestamp, `YYYY-MM-DD HH:MM:SS` UTC.
pub(super) fn format_utc_datetime() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Per-line timestamp, `HH:MM:SS` UTC.
pub(super) fn format_utc_time() -> String {
    chrono::Utc::now().format("%H:%M:%S").to_string()
}
