//! Per-peer sequence numbering.
//!
//! The sequence field is 16 bits on the wire, but the counter logically
//! wraps inside a smaller space (8 bits by default). The wraparound window
//! scales with that space: at 8 bits a frame below 50 is accepted after a
//! last value above 200.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use nowcast_link::MacAddr;

use crate::error::SequenceError;

/// Logical width of the sequence counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSpace {
    bits: u8,
}

impl Default for SequenceSpace {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BITS)
    }
}

impl SequenceSpace {
    pub const DEFAULT_BITS: u8 = 8;

    /// Create a space of `bits` width, clamped to `1..=16`.
    pub fn new(bits: u8) -> Self {
        Self {
            bits: bits.clamp(1, 16),
        }
    }

    pub fn bits(self) -> u8 {
        self.bits
    }

    /// Number of distinct sequence values.
    pub fn modulus(self) -> u32 {
        1 << self.bits
    }

    /// A last-accepted value above this arms the wraparound window.
    pub fn wrap_high(self) -> u16 {
        (self.modulus() * 200 / 256) as u16
    }

    /// Incoming values below this are accepted once the window is armed.
    pub fn wrap_low(self) -> u16 {
        (self.modulus() * 50 / 256) as u16
    }

    /// Successor of `seq`, wrapping at the modulus.
    pub fn next(self, seq: u16) -> u16 {
        ((u32::from(seq) + 1) % self.modulus()) as u16
    }

    /// Returns true if `incoming` follows `last`.
    pub fn is_newer(self, last: u16, incoming: u16) -> bool {
        incoming > last || (last > self.wrap_high() && incoming < self.wrap_low())
    }
}

/// Receive-side duplicate and out-of-order filter, keyed by source address.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    space: SequenceSpace,
    last: Mutex<HashMap<MacAddr, u16>>,
}

impl SequenceTracker {
    pub fn new(space: SequenceSpace) -> Self {
        Self {
            space,
            last: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MacAddr, u16>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept `incoming` from `peer` if it is newer than the last accepted value.
    ///
    /// A peer never seen before starts at 0. Rejection leaves state untouched.
    pub fn accept(&self, peer: MacAddr, incoming: u16) -> Result<(), SequenceError> {
        let mut last = self.lock();
        let previous = last.get(&peer).copied().unwrap_or(0);
        if self.space.is_newer(previous, incoming) {
            last.insert(peer, incoming);
            Ok(())
        } else {
            Err(SequenceError::DuplicateOrStale {
                last: previous,
                incoming,
            })
        }
    }

    /// Last accepted sequence for `peer`, if any frame was accepted.
    pub fn last(&self, peer: MacAddr) -> Option<u16> {
        self.lock().get(&peer).copied()
    }

    /// Number of peers with tracked state.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Send-side counterpart: one counter per destination.
///
/// The first number handed out for a destination is 1.
#[derive(Debug, Default)]
pub struct SendSequencer {
    space: SequenceSpace,
    next: Mutex<HashMap<MacAddr, u16>>,
}

impl SendSequencer {
    pub fn new(space: SequenceSpace) -> Self {
        Self {
            space,
            next: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next sequence number for `destination`.
    pub fn next_sequence(&self, destination: MacAddr) -> u16 {
        let mut counters = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry(destination).or_insert(0);
        *counter = self.space.next(*counter);
        *counter
    }
}

#[cfg(test)]
mod tests {
    use nowcast_link::BROADCAST;

    use super::*;

    const PEER: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0, 0, 1]);
    const OTHER: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0, 0, 2]);

    #[test]
    fn default_thresholds() {
        let space = SequenceSpace::default();
        assert_eq!(space.modulus(), 256);
        assert_eq!(space.wrap_high(), 200);
        assert_eq!(space.wrap_low(), 50);
    }

    #[test]
    fn thresholds_scale_with_width() {
        let space = SequenceSpace::new(16);
        assert_eq!(space.wrap_high(), 51_200);
        assert_eq!(space.wrap_low(), 12_800);
        assert_eq!(space.next(u16::MAX), 0);

        assert_eq!(SequenceSpace::new(0).bits(), 1);
        assert_eq!(SequenceSpace::new(40).bits(), 16);
    }

    #[test]
    fn monotonic_accept_reject_accept() {
        let tracker = SequenceTracker::default();
        assert!(tracker.accept(PEER, 5).is_ok());
        assert_eq!(
            tracker.accept(PEER, 3),
            Err(SequenceError::DuplicateOrStale {
                last: 5,
                incoming: 3
            })
        );
        assert!(tracker.accept(PEER, 6).is_ok());
        assert_eq!(tracker.last(PEER), Some(6));
    }

    #[test]
    fn duplicate_is_rejected() {
        let tracker = SequenceTracker::default();
        tracker.accept(PEER, 9).unwrap();
        assert!(tracker.accept(PEER, 9).is_err());
    }

    #[test]
    fn wraparound_window() {
        let tracker = SequenceTracker::default();
        tracker.accept(PEER, 250).unwrap();
        assert!(tracker.accept(PEER, 100).is_err());
        assert_eq!(tracker.last(PEER), Some(250));
        assert!(tracker.accept(PEER, 10).is_ok());
        assert_eq!(tracker.last(PEER), Some(10));
    }

    #[test]
    fn window_not_armed_at_threshold() {
        let tracker = SequenceTracker::default();
        tracker.accept(PEER, 200).unwrap();
        assert!(tracker.accept(PEER, 10).is_err());
    }

    #[test]
    fn zero_from_new_peer_is_rejected() {
        let tracker = SequenceTracker::default();
        assert!(tracker.accept(PEER, 0).is_err());
        assert!(tracker.is_empty());
    }

    #[test]
    fn peers_are_independent() {
        let tracker = SequenceTracker::default();
        tracker.accept(PEER, 40).unwrap();
        tracker.accept(OTHER, 1).unwrap();
        assert!(tracker.accept(OTHER, 2).is_ok());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn sequencer_starts_at_one_and_wraps() {
        let sequencer = SendSequencer::default();
        assert_eq!(sequencer.next_sequence(PEER), 1);
        assert_eq!(sequencer.next_sequence(PEER), 2);
        assert_eq!(sequencer.next_sequence(BROADCAST), 1);

        for _ in 3..=255 {
            sequencer.next_sequence(PEER);
        }
        assert_eq!(sequencer.next_sequence(PEER), 0);
        assert_eq!(sequencer.next_sequence(PEER), 1);
    }

    #[test]
    fn sequencer_output_passes_tracker_across_wrap() {
        let sequencer = SendSequencer::default();
        let tracker = SequenceTracker::default();
        for _ in 0..600 {
            let seq = sequencer.next_sequence(PEER);
            assert!(tracker.accept(OTHER, seq).is_ok(), "rejected {seq}");
        }
    }
}
