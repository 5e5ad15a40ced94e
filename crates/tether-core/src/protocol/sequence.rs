//! Per-session counter that assigns ids to outbound frames.
//!
//! # Why ids must never be reused (for beginners)
//!
//! The peer remembers every DATA id it has already processed so that a frame
//! retransmitted after a reconnect is acknowledged again but *not* delivered
//! to the application twice.  If an id were ever handed out a second time
//! within the same session, the peer would mistake a brand-new message for a
//! duplicate and silently drop it.
//!
//! For that reason the counter does **not** wrap around like a classic
//! sequence number.  Once `u32::MAX` has been issued the counter is exhausted
//! and [`MessageCounter::next`] returns `None`; the connection then refuses
//! further sends.  At one message per microsecond that takes over an hour of
//! continuous traffic on a single session.
//!
//! # Thread safety
//!
//! The counter is owned by exactly one `Connection`, which is only ever
//! mutated by one task at a time, so a plain integer suffices here.

/// A monotonically increasing, never-reused id source.
///
/// # Examples
///
/// ```rust
/// use tether_core::protocol::MessageCounter;
///
/// let mut counter = MessageCounter::new();
/// assert_eq!(counter.next(), Some(0));
/// assert_eq!(counter.next(), Some(1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageCounter {
    next: u32,
    exhausted: bool,
}

impl MessageCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id, or `None` once every `u32` has been issued.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<u32> {
        if self.exhausted {
            return None;
        }
        let id = self.next;
        match self.next.checked_add(1) {
            Some(n) => self.next = n,
            None => self.exhausted = true,
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_zero() {
        // Arrange
        let mut counter = MessageCounter::new();

        // Act
        let first = counter.next();

        // Assert
        assert_eq!(first, Some(0));
    }

    #[test]
    fn test_counter_increments_monotonically() {
        // Arrange
        let mut counter = MessageCounter::new();

        // Act
        let values: Vec<u32> = (0..100).filter_map(|_| counter.next()).collect();

        // Assert
        for window in values.windows(2) {
            assert!(window[1] > window[0], "values must be strictly increasing");
        }
        assert_eq!(values.len(), 100);
    }

    #[test]
    fn test_counter_is_exhausted_after_u32_max() {
        // Arrange – start one step before the end of the id space
        let mut counter = MessageCounter {
            next: u32::MAX,
            exhausted: false,
        };

        // Act
        let last = counter.next();
        let after = counter.next();

        // Assert
        assert_eq!(last, Some(u32::MAX));
        assert_eq!(after, None, "ids must never wrap back to 0");
        assert_eq!(counter.next(), None);
    }

    #[test]
    fn test_clone_continues_from_same_position() {
        let mut counter = MessageCounter::new();
        counter.next();
        let mut copy = counter.clone();
        assert_eq!(copy.next(), Some(1));
        assert_eq!(counter.next(), Some(1));
    }
}
