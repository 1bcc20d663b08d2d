//! Buffered items and their lifecycle.

/// Where a buffered write is in its lifecycle.
///
/// ```text
/// Pending ──flush──▶ InFlight ──ok──▶ Flushed
///    ▲                  │
///    │                fail
///    │                  ▼
///    └──── Requeued(n) ◀┴──▶ PermanentlyFailed   (n reached max_retries)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteState {
    /// Buffered, never attempted.
    Pending,
    /// Part of the flush currently running.
    InFlight,
    /// Written by a successful flush.
    Flushed,
    /// Buffered again after `n` failed attempts.
    Requeued(u32),
    /// Dropped after exhausting its retries.
    PermanentlyFailed,
}

impl WriteState {
    /// Returns true for states held in the live buffer.
    pub const fn is_buffered(self) -> bool {
        matches!(self, Self::Pending | Self::Requeued(_))
    }

    /// Returns true for terminal states.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Flushed | Self::PermanentlyFailed)
    }
}

/// A value waiting in a write buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedWrite<T> {
    /// Item id; one live entry per id.
    pub id: String,
    /// Latest value for the id.
    pub data: T,
    /// Wall-clock time of the latest `add`, ms since the epoch.
    pub timestamp: u64,
    /// Buffer category the item belongs to.
    pub category: String,
    /// Failed flush attempts so far.
    pub retry_count: u32,
    /// Lifecycle state.
    pub state: WriteState,
}

impl<T> BufferedWrite<T> {
    /// Creates a pending write.
    pub fn new(id: impl Into<String>, data: T, category: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: id.into(),
            data,
            timestamp,
            category: category.into(),
            retry_count: 0,
            state: WriteState::Pending,
        }
    }

    /// Replaces the value, keeping the retry history.
    pub(crate) fn replace(&mut self, data: T, timestamp: u64) {
        self.data = data;
        self.timestamp = timestamp;
    }

    pub(crate) fn mark_in_flight(&mut self) {
        self.state = WriteState::InFlight;
    }

    pub(crate) fn mark_flushed(&mut self) {
        self.state = WriteState::Flushed;
    }

    /// Records a failed attempt and returns the resulting state.
    pub(crate) fn record_failure(&mut self, max_retries: u32) -> WriteState {
        self.retry_count += 1;
        self.state = if self.retry_count >= max_retries {
            WriteState::PermanentlyFailed
        } else {
            WriteState::Requeued(self.retry_count)
        };
        self.state
    }

    /// Puts the item back without charging an attempt.
    pub(crate) fn return_unattempted(&mut self) {
        self.state = if self.retry_count == 0 {
            WriteState::Pending
        } else {
            WriteState::Requeued(self.retry_count)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_until_exhausted() {
        let mut write = BufferedWrite::new("a", 1, "nouns", 10);
        assert_eq!(write.state, WriteState::Pending);

        write.mark_in_flight();
        assert_eq!(write.record_failure(3), WriteState::Requeued(1));
        assert!(write.state.is_buffered());
        assert_eq!(write.record_failure(3), WriteState::Requeued(2));
        assert_eq!(write.record_failure(3), WriteState::PermanentlyFailed);
        assert!(write.state.is_terminal());
        assert_eq!(write.retry_count, 3);
    }

    #[test]
    fn unattempted_return_keeps_history() {
        let mut write = BufferedWrite::new("a", 1, "nouns", 10);
        write.mark_in_flight();
        write.return_unattempted();
        assert_eq!(write.state, WriteState::Pending);

        write.record_failure(5);
        write.mark_in_flight();
        write.return_unattempted();
        assert_eq!(write.state, WriteState::Requeued(1));
    }

    #[test]
    fn replace_keeps_retry_count() {
        let mut write = BufferedWrite::new("a", 1, "nouns", 10);
        write.record_failure(5);
        write.replace(2, 20);
        assert_eq!(write.data, 2);
        assert_eq!(write.timestamp, 20);
        assert_eq!(write.retry_count, 1);
    }
}
