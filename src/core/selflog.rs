//! Self-diagnostics channel
//!
//! Failures inside the logging system (sink errors, dropped events, spool
//! trouble) are reported here instead of through the logging pipeline, so a
//! broken sink can never recurse into itself. Output is disabled until a
//! handler is installed, or until the `RUST_STRUCTURED_LOGGER_SELFLOG`
//! environment variable is set to `stderr`, `1` or `true`.
//!
//! # Example
//!
//! ```
//! use rust_structured_logger::core::selflog;
//! use std::sync::{Arc, Mutex};
//!
//! let lines = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&lines);
//! selflog::enable(move |line: &str| sink.lock().unwrap().push(line.to_string()));
//!
//! selflog::report("example", format_args!("queue at {}%", 90));
//! assert!(lines.lock().unwrap().iter().any(|l| l.contains("[example] queue at 90%")));
//!
//! selflog::disable();
//! ```

use arc_swap::ArcSwapOption;
use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Once};

pub const SELFLOG_ENV_VAR: &str = "RUST_STRUCTURED_LOGGER_SELFLOG";

struct Handler(Box<dyn Fn(&str) + Send + Sync>);

static HANDLER: ArcSwapOption<Handler> = ArcSwapOption::const_empty();
static ENV_INIT: Once = Once::new();

fn init_from_env() {
    ENV_INIT.call_once(|| {
        if let Ok(value) = std::env::var(SELFLOG_ENV_VAR) {
            if matches!(value.to_ascii_lowercase().as_str(), "stderr" | "1" | "true") {
                HANDLER.store(Some(Arc::new(Handler(Box::new(write_stderr)))));
            }
        }
    });
}

fn write_stderr(line: &str) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = writeln!(handle, "{}", line);
}

/// Install a handler receiving every diagnostic line
pub fn enable<F>(handler: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    ENV_INIT.call_once(|| {});
    HANDLER.store(Some(Arc::new(Handler(Box::new(handler)))));
}

/// Write diagnostics to standard error
pub fn enable_stderr() {
    enable(write_stderr);
}

pub fn disable() {
    ENV_INIT.call_once(|| {});
    HANDLER.store(None);
}

#[inline]
pub fn is_enabled() -> bool {
    init_from_env();
    HANDLER.load().is_some()
}

/// Report a diagnostic line for `component`
///
/// The arguments are only formatted when a handler is installed.
pub fn report(component: &str, args: fmt::Arguments<'_>) {
    init_from_env();
    let guard = HANDLER.load();
    if let Some(handler) = guard.as_ref() {
        let line = format!(
            "{} [{}] {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            component,
            args
        );
        (handler.0)(&line);
    }
}

/// Render a panic payload for diagnostics
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
