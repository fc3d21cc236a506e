//! Overflow policies for bounded queues and spools
//!
//! Applied by the async sink when its queue is full, and by the durable
//! sink when its spool reaches capacity.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What to do with an event that does not fit
///
/// # Example
///
/// ```
/// use rust_structured_logger::OverflowPolicy;
/// use std::time::Duration;
///
/// let policy = OverflowPolicy::default();
/// assert_eq!(policy, OverflowPolicy::DropNewest);
///
/// let policy = OverflowPolicy::BlockWithTimeout(Duration::from_millis(100));
/// assert_eq!(policy.to_string(), "BlockWithTimeout(100ms)");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Reject the incoming event
    #[default]
    DropNewest,

    /// Evict the oldest queued event (or spool segment) to make room
    DropOldest,

    /// Wait for space up to the timeout, then reject the incoming event
    ///
    /// The only policy that can delay the logging call.
    BlockWithTimeout(Duration),
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropNewest => write!(f, "DropNewest"),
            OverflowPolicy::DropOldest => write!(f, "DropOldest"),
            OverflowPolicy::BlockWithTimeout(d) => write!(f, "BlockWithTimeout({:?})", d),
        }
    }
}

/// Callback for overflow notifications
///
/// Receives the total number of events dropped so far.
pub type OverflowCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_policy_default() {
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::DropNewest);
    }

    #[test]
    fn test_overflow_policy_display() {
        assert_eq!(OverflowPolicy::DropNewest.to_string(), "DropNewest");
        assert_eq!(OverflowPolicy::DropOldest.to_string(), "DropOldest");
        assert_eq!(
            OverflowPolicy::BlockWithTimeout(Duration::from_millis(100)).to_string(),
            "BlockWithTimeout(100ms)"
        );
    }
}
