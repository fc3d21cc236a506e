//! Logging macros
//!
//! The macros bind trailing arguments to template placeholders by position,
//! like [`Logger::write`](crate::Logger::write), and check the level before
//! evaluating any argument.
//!
//! # Examples
//!
//! ```
//! use rust_structured_logger::prelude::*;
//! use rust_structured_logger::info;
//! use std::sync::Arc;
//!
//! let memory = Arc::new(MemorySink::new());
//! let logger = Logger::builder().shared_sink(memory.clone()).build();
//!
//! info!(logger, "Server started");
//!
//! let port = 8080;
//! info!(logger, "Server listening on port {Port}", port);
//!
//! let user_id = 42;
//! info!(logger, "User {UserId} performed {Action}", user_id, "login");
//! assert_eq!(memory.messages()[2], "User 42 performed login");
//! ```

/// Log a template at an explicit level.
///
/// # Examples
///
/// ```
/// # use rust_structured_logger::prelude::*;
/// # let logger = Logger::builder().build();
/// use rust_structured_logger::log;
/// log!(logger, LogLevel::Info, "Simple message");
/// log!(logger, LogLevel::Error, "Error code: {Code}", 500);
/// ```
#[macro_export]
macro_rules! log {
    ($logger:expr, $level:expr, $template:expr $(, $arg:expr)* $(,)?) => {{
        let level = $level;
        let logger = &$logger;
        if logger.is_enabled(level) {
            logger.write(level, $template, &[$(&($arg) as &dyn $crate::LogArg),*]);
        }
    }};
}

/// Log a trace-level template.
#[macro_export]
macro_rules! trace {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Trace, $($arg)+)
    };
}

/// Log a debug-level template.
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Debug, $($arg)+)
    };
}

/// Log an info-level template.
#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Info, $($arg)+)
    };
}

/// Log a warn-level template.
#[macro_export]
macro_rules! warn {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Warn, $($arg)+)
    };
}

/// Log an error-level template.
///
/// ```
/// # use rust_structured_logger::prelude::*;
/// # let logger = Logger::builder().build();
/// use rust_structured_logger::error;
/// error!(logger, "Payment {PaymentId} declined", "pay-17");
/// ```
#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Error, $($arg)+)
    };
}

/// Log a fatal-level template.
#[macro_export]
macro_rules! fatal {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Fatal, $($arg)+)
    };
}

/// Write a diagnostic line about the logger itself
///
/// Formatting is skipped entirely when no selflog handler is installed.
#[macro_export]
macro_rules! selflog {
    ($component:expr, $($arg:tt)+) => {
        if $crate::core::selflog::is_enabled() {
            $crate::core::selflog::report($component, format_args!($($arg)+));
        }
    };
}
