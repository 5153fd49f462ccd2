//! Mailbox monitoring for the session actor.
//!
//! | Level    | Depth     |
//! |----------|-----------|
//! | Normal   | < 100     |
//! | Warning  | 100-400   |
//! | Critical | > 400     |
//!
//! Depth is the backlog left in the mailbox each time the actor picks up a
//! message. Drops are recorded by the producers that use `try_send`
//! (signaling handlers, transport listeners).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Depth above which the mailbox is considered elevated.
pub const SESSION_MAILBOX_NORMAL: usize = 100;

/// Depth above which the mailbox is considered critical.
pub const SESSION_MAILBOX_WARNING: usize = 400;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Tracks queue depth and processed/dropped counts for one session mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    session_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record the backlog observed when a message is picked up.
    pub fn record_depth(&self, depth: usize) {
        let previous = self.depth.swap(depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);

        let level = Self::level_for_depth(depth);
        if level == Self::level_for_depth(previous) {
            return;
        }
        match level {
            MailboxLevel::Critical => {
                warn!(
                    target: "media.session",
                    session_id = %self.session_id,
                    depth = depth,
                    threshold = SESSION_MAILBOX_WARNING,
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning => {
                warn!(
                    target: "media.session",
                    session_id = %self.session_id,
                    depth = depth,
                    threshold = SESSION_MAILBOX_NORMAL,
                    "Mailbox depth elevated"
                );
            }
            MailboxLevel::Normal => {
                debug!(
                    target: "media.session",
                    session_id = %self.session_id,
                    depth = depth,
                    "Mailbox depth back to normal"
                );
            }
        }
    }

    /// Record a message as handled.
    pub fn record_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message dropped because the mailbox was full.
    pub fn record_drop(&self) {
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            target: "media.session",
            session_id = %self.session_id,
            dropped = dropped,
            "Message dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        Self::level_for_depth(self.current_depth())
    }

    /// Highest level reached since the session started.
    #[must_use]
    pub fn peak_level(&self) -> MailboxLevel {
        Self::level_for_depth(self.peak_depth())
    }

    fn level_for_depth(depth: usize) -> MailboxLevel {
        if depth > SESSION_MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth > SESSION_MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_tracks_depth_and_peak() {
        let monitor = MailboxMonitor::new("session-1");

        monitor.record_depth(3);
        monitor.record_processed();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_depth(1);
        monitor.record_processed();
        assert_eq!(monitor.current_depth(), 1);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 2);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new("session-1");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_depth(SESSION_MAILBOX_NORMAL);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_depth(SESSION_MAILBOX_NORMAL + 1);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        monitor.record_depth(SESSION_MAILBOX_WARNING + 1);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);

        monitor.record_depth(0);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
        assert_eq!(monitor.peak_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_mailbox_monitor_counts_drops() {
        let monitor = MailboxMonitor::new("session-1");
        monitor.record_drop();
        monitor.record_drop();
        assert_eq!(monitor.messages_dropped(), 2);
        assert_eq!(monitor.current_depth(), 0);
    }
}
