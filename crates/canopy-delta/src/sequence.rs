//! Per-recipient event numbering.

use crate::error::{DeltaError, Result};
use crate::message::EventSequenceNumber;

/// Issues sequence numbers on the repository side of one participation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    last: EventSequenceNumber,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> EventSequenceNumber {
        self.last += 1;
        self.last
    }

    /// Number of events issued so far.
    pub fn last(&self) -> EventSequenceNumber {
        self.last
    }
}

/// Checks the sequence numbers a client receives: each must be exactly one
/// greater than the previous, starting at 1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    last: EventSequenceNumber,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after `last` events were already received.
    pub fn resume(last: EventSequenceNumber) -> Self {
        Self { last }
    }

    pub fn last(&self) -> EventSequenceNumber {
        self.last
    }

    pub fn expected(&self) -> EventSequenceNumber {
        self.last + 1
    }

    /// Accept `sequence`, or report the gap or duplicate without advancing.
    pub fn accept(&mut self, sequence: EventSequenceNumber) -> Result<()> {
        if sequence != self.expected() {
            return Err(DeltaError::SequenceGap {
                expected: self.expected(),
                received: sequence,
            });
        }
        self.last = sequence;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_tracker_agree() {
        let mut counter = SequenceCounter::new();
        let mut tracker = SequenceTracker::new();
        for _ in 0..5 {
            tracker.accept(counter.next()).unwrap();
        }
        assert_eq!(tracker.last(), counter.last());
    }

    #[test]
    fn test_gaps_and_duplicates_are_rejected() {
        let mut tracker = SequenceTracker::resume(2);
        assert_eq!(
            tracker.accept(4),
            Err(DeltaError::SequenceGap {
                expected: 3,
                received: 4
            })
        );
        assert_eq!(
            tracker.accept(2),
            Err(DeltaError::SequenceGap {
                expected: 3,
                received: 2
            })
        );
        tracker.accept(3).unwrap();
        assert_eq!(tracker.last(), 3);
    }
}
