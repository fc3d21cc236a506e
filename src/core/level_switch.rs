//! Runtime-adjustable minimum level
//!
//! A [`LevelSwitch`] is read on every logging call before any other work is
//! done, so the read is a single atomic load. Writers never block readers.

use super::log_level::LogLevel;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Atomically swappable minimum level
///
/// Share one switch between several loggers (or sinks) through an `Arc` to
/// change their threshold together without rebuilding anything.
///
/// # Example
///
/// ```
/// use rust_structured_logger::{LevelSwitch, LogLevel};
///
/// let switch = LevelSwitch::new(LogLevel::Info);
/// assert!(!switch.is_enabled(LogLevel::Debug));
///
/// switch.set_level(LogLevel::Debug);
/// assert!(switch.is_enabled(LogLevel::Debug));
/// ```
pub struct LevelSwitch {
    level: AtomicU8,
}

impl LevelSwitch {
    pub const fn new(level: LogLevel) -> Self {
        Self {
            level: AtomicU8::new(level as u8),
        }
    }

    #[inline]
    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    /// Change the minimum level; visible to all subsequent reads
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level as u8 >= self.level.load(Ordering::Acquire)
    }
}

impl Default for LevelSwitch {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl fmt::Debug for LevelSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelSwitch")
            .field("level", &self.level())
            .finish()
    }
}
