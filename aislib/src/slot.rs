//! A single time slot on one VHF channel.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::timing::{self, SLOTS_PER_MINUTE};

/// The two VHF channels of the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    /// Channel 87B, 161.975 MHz. Slot numbers 0..2250.
    C87B,
    /// Channel 88B, 162.025 MHz. Slot numbers 2250..4500.
    C88B,
}

impl Channel {
    /// Channel a combined slot number belongs to.
    pub fn of_slot(number: u16) -> Channel {
        if number < SLOTS_PER_MINUTE {
            Channel::C87B
        } else {
            Channel::C88B
        }
    }

    /// Channel for a carrier frequency in Hz, if it is one of ours.
    pub fn from_frequency(freq: u32) -> Option<Channel> {
        match freq {
            161_975_000 => Some(Channel::C87B),
            162_025_000 => Some(Channel::C88B),
            _ => None,
        }
    }

    /// The other channel.
    pub fn other(self) -> Channel {
        match self {
            Channel::C87B => Channel::C88B,
            Channel::C88B => Channel::C87B,
        }
    }

    /// Position of this channel in per-channel arrays.
    pub fn index(self) -> usize {
        match self {
            Channel::C87B => 0,
            Channel::C88B => 1,
        }
    }

    /// Offset of this channel's slots in the combined index space.
    pub fn base(self) -> u16 {
        match self {
            Channel::C87B => 0,
            Channel::C88B => SLOTS_PER_MINUTE,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Channel::C87B => write!(f, "87B"),
            Channel::C88B => write!(f, "88B"),
        }
    }
}

/// Mutable reservation state of a slot.
///
/// Invariant: `owner`, `timeout` and `frames_since_last_use` are all
/// `None` together exactly when the slot is free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotState {
    /// MMSI of the station holding the reservation.
    pub owner: Option<u32>,
    /// Reservation countdown, 0..=7. `Some(0)` expires on next use.
    pub timeout: Option<u8>,
    /// Minute ticks since the slot last carried a transmission.
    pub frames_since_last_use: Option<i8>,
    /// Set when the reservation was explicitly assigned.
    pub assigned: bool,
}

/// One reservation entry of the slot map.
///
/// The number and channel are fixed at construction; the reservation
/// state is guarded by a per-slot mutex so the listener and station
/// threads can mutate slots independently.
#[derive(Debug)]
pub struct Slot {
    number: u16,
    channel: Channel,
    state: Mutex<SlotState>,
}

impl Slot {
    pub fn new(number: u16) -> Slot {
        Slot {
            number,
            channel: Channel::of_slot(number),
            state: Mutex::new(SlotState::default()),
        }
    }

    /// Combined slot number, 0..4500.
    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Position of this slot on the minute ring, 0..2250.
    pub fn minute_index(&self) -> u16 {
        self.number % SLOTS_PER_MINUTE
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SlotState> {
        // A panic while holding a slot lock leaves consistent state, so
        // poisoning is cleared rather than propagated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the wall clock currently points at this slot.
    pub fn is_current(&self) -> bool {
        let (i87, i88) = timing::current_slots_idx();
        self.number == i87 || self.number == i88
    }

    pub fn owner(&self) -> Option<u32> {
        self.state().owner
    }

    pub fn timeout(&self) -> Option<u8> {
        self.state().timeout
    }

    pub fn frames_since_last_use(&self) -> Option<i8> {
        self.state().frames_since_last_use
    }

    pub fn is_free(&self) -> bool {
        self.state().owner.is_none()
    }

    /// Copy of the reservation state.
    pub fn snapshot(&self) -> SlotState {
        self.state().clone()
    }

    /// Reset the usage counter, leaving the reservation untouched.
    pub fn mark_as_used(&self) {
        self.state().frames_since_last_use = Some(-1);
    }

    /// Reserve this slot for `mmsi`.
    ///
    /// A slot that already has an owner is left untouched; callers that
    /// raced for it find out through the owner's next retransmission.
    pub fn book(&self, mmsi: u32, timeout: Option<u8>, assigned: bool) {
        let mut state = self.state();
        if state.owner.is_none() {
            state.owner = Some(mmsi);
            state.timeout = timeout;
            state.assigned = assigned;
            state.frames_since_last_use = Some(-1);
        }
    }

    /// Consume one usage cycle: mark used, then count the timeout down.
    /// A timeout of zero releases the reservation; no timeout means an
    /// indefinite reservation.
    pub fn use_slot(&self) {
        let mut state = self.state();
        state.frames_since_last_use = Some(-1);
        match state.timeout {
            None => {}
            Some(0) => *state = SlotState::default(),
            Some(t) => state.timeout = Some(t - 1),
        }
    }

    /// Replace the reservation countdown.
    pub fn set_timeout(&self, timeout: Option<u8>) {
        self.state().timeout = timeout;
    }

    /// Drop any reservation and reset the usage counter.
    pub fn release(&self) {
        *self.state() = SlotState::default();
    }

    /// One minute has passed: expire unused reservations.
    ///
    /// Never-used reservations and reservations idle for three minutes
    /// are released; everything else ages by one.
    pub fn minute_tick(&self) {
        let mut state = self.state();
        match state.frames_since_last_use {
            None => {
                if state.owner.is_some() {
                    *state = SlotState::default();
                }
            }
            Some(3) => *state = SlotState::default(),
            Some(n) => state.frames_since_last_use = Some(n + 1),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.snapshot();
        write!(
            f,
            "[{}, {:?}, {:?}]",
            self.number, state.owner, state.timeout
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_follows_number() {
        assert_eq!(Slot::new(0).channel(), Channel::C87B);
        assert_eq!(Slot::new(2249).channel(), Channel::C87B);
        assert_eq!(Slot::new(2250).channel(), Channel::C88B);
        assert_eq!(Slot::new(4499).channel(), Channel::C88B);
        assert_eq!(Slot::new(2251).minute_index(), 1);
    }

    #[test]
    fn book_sets_reservation() {
        let slot = Slot::new(42);
        slot.book(227006760, Some(5), false);
        assert_eq!(slot.owner(), Some(227006760));
        assert_eq!(slot.timeout(), Some(5));
        assert_eq!(slot.frames_since_last_use(), Some(-1));
    }

    #[test]
    fn book_on_owned_slot_is_a_no_op() {
        let slot = Slot::new(42);
        slot.book(1, Some(5), false);
        slot.book(2, Some(7), true);
        let state = slot.snapshot();
        assert_eq!(state.owner, Some(1));
        assert_eq!(state.timeout, Some(5));
        assert!(!state.assigned);
    }

    #[test]
    fn use_counts_timeout_down() {
        let slot = Slot::new(7);
        slot.book(9, Some(2), false);
        slot.use_slot();
        assert_eq!(slot.timeout(), Some(1));
        slot.use_slot();
        assert_eq!(slot.timeout(), Some(0));
    }

    #[test]
    fn use_with_zero_timeout_releases() {
        let slot = Slot::new(7);
        slot.book(9, Some(0), false);
        slot.use_slot();
        assert_eq!(slot.snapshot(), SlotState::default());
    }

    #[test]
    fn use_without_timeout_only_marks_usage() {
        let slot = Slot::new(7);
        slot.book(9, None, false);
        slot.state().frames_since_last_use = Some(2);
        slot.use_slot();
        assert_eq!(slot.owner(), Some(9));
        assert_eq!(slot.timeout(), None);
        assert_eq!(slot.frames_since_last_use(), Some(-1));
    }

    #[test]
    fn release_clears_everything() {
        let slot = Slot::new(7);
        slot.book(9, Some(3), true);
        slot.release();
        assert_eq!(slot.snapshot(), SlotState::default());
        // free slots have no timeout and no usage counter
        assert!(slot.is_free());
        assert_eq!(slot.timeout(), None);
        assert_eq!(slot.frames_since_last_use(), None);
    }

    #[test]
    fn minute_tick_expires_never_used_reservations() {
        let slot = Slot::new(7);
        slot.book(9, Some(3), false);
        slot.state().frames_since_last_use = None;
        slot.minute_tick();
        assert!(slot.is_free());
    }

    #[test]
    fn minute_tick_expires_idle_reservations() {
        let slot = Slot::new(7);
        slot.book(9, Some(3), false);
        slot.state().frames_since_last_use = Some(3);
        slot.minute_tick();
        assert!(slot.is_free());
    }

    #[test]
    fn minute_tick_ages_active_reservations() {
        let slot = Slot::new(7);
        slot.book(9, Some(3), false);
        slot.minute_tick();
        assert_eq!(slot.frames_since_last_use(), Some(0));
        assert_eq!(slot.owner(), Some(9));
    }
}
