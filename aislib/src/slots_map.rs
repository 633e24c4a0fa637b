//! The dual-channel ring of 4500 slots shared by every task of a station.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use chrono::Timelike;
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::slot::{Channel, Slot};
use crate::timing::{self, SLOTS_PER_MINUTE};

/// All slots of both channels.
///
/// Indices 0..2250 are channel 87B, 2250..4500 are channel 88B. The map
/// is created once at station startup and never resized; entries are
/// mutated in place behind their own locks, never replaced. Windowed
/// queries read point-wise snapshots without a global lock: a slot may
/// change hands between being surveyed and being booked, which
/// [`Slot::book`] absorbs by rejecting conflicting reservations.
#[derive(Debug)]
pub struct SlotsMap {
    slots: Vec<Slot>,
}

impl Default for SlotsMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotsMap {
    pub fn new() -> SlotsMap {
        SlotsMap {
            slots: (0..2 * SLOTS_PER_MINUTE).map(Slot::new).collect(),
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Slot for a combined index, 0..4500.
    pub fn slot(&self, number: u16) -> &Slot {
        &self.slots[number as usize]
    }

    /// The two slots the wall clock currently points at.
    pub fn current_slots(&self) -> [&Slot; 2] {
        let (i87, i88) = timing::current_slots_idx();
        [self.slot(i87), self.slot(i88)]
    }

    /// The current slot on one channel.
    pub fn current_slot(&self, chn: Channel) -> &Slot {
        self.current_slots()[chn.index()]
    }

    /// Forward distance from `s0` to `s1` on the minute ring, 0..2250.
    ///
    /// `s0` defaults to the current 87B slot.
    pub fn compute_slot_offset(&self, s1: &Slot, s0: Option<&Slot>) -> u16 {
        let from = s0
            .map(Slot::minute_index)
            .unwrap_or_else(|| self.current_slot(Channel::C87B).minute_index());
        (s1.minute_index() + SLOTS_PER_MINUTE - from) % SLOTS_PER_MINUTE
    }

    /// Absolute difference of two minute-ring indices.
    ///
    /// `s1` defaults to the current 87B slot.
    pub fn compute_absolute_slot_distance(&self, s0: &Slot, s1: Option<&Slot>) -> u16 {
        let other = s1
            .map(Slot::minute_index)
            .unwrap_or_else(|| self.current_slot(Channel::C87B).minute_index());
        s0.minute_index().abs_diff(other)
    }

    /// The slot `offset` positions after `s` on the same channel.
    pub fn compute_offset_slot(&self, s: &Slot, offset: u16) -> &Slot {
        let idx = (s.minute_index() + offset % SLOTS_PER_MINUTE) % SLOTS_PER_MINUTE;
        self.slot(idx + s.channel().base())
    }

    /// Slots of `chn` spanning the minute-ring range `[start, end)`.
    ///
    /// When the range wraps past the end of the minute it is the union
    /// `[start, 2250) ∪ [0, end + 1)`; the inclusive bump on the second
    /// half is part of the contract and is kept for parity with the
    /// observed behaviour of the system this simulates.
    pub fn compute_slots_range(&self, chn: Channel, start: u16, end: u16) -> Vec<&Slot> {
        let start = start % SLOTS_PER_MINUTE;
        let end = end % SLOTS_PER_MINUTE;
        let base = chn.base();
        let indices: Vec<u16> = if start <= end {
            (start..end).collect()
        } else {
            (start..SLOTS_PER_MINUTE).chain(0..end + 1).collect()
        };
        indices.into_iter().map(|i| self.slot(i + base)).collect()
    }

    /// Keep only the slots nobody owns.
    pub fn extract_available_slots<'a>(&self, slots: &[&'a Slot]) -> Vec<&'a Slot> {
        slots.iter().copied().filter(|s| s.is_free()).collect()
    }

    /// Look for `s_cnt` contiguous free slots in a window of `length`
    /// slots starting at `ref_si` (the current 87B index when omitted).
    ///
    /// Both channels are surveyed; a channel only qualifies with at
    /// least `max(s_cnt, 4)` free slots in the window. The requested
    /// channel wins when it qualifies, otherwise one qualifying channel
    /// is picked uniformly, and the returned run starts at a uniformly
    /// random position in that channel's free list. Empty when no
    /// channel qualifies.
    pub fn scan_for_free_slots(
        &self,
        length: u16,
        ref_si: Option<u16>,
        s_cnt: usize,
        chn: Option<Channel>,
    ) -> Vec<&Slot> {
        let ref_si = ref_si
            .map(|r| r % SLOTS_PER_MINUTE)
            .unwrap_or_else(|| self.current_slot(Channel::C87B).minute_index());
        let end_si = (ref_si + length) % SLOTS_PER_MINUTE;

        let available = [
            self.extract_available_slots(&self.compute_slots_range(Channel::C87B, ref_si, end_si)),
            self.extract_available_slots(&self.compute_slots_range(Channel::C88B, ref_si, end_si)),
        ];
        let qualifying: Vec<usize> = (0..2)
            .filter(|&i| available[i].len() >= s_cnt.max(4))
            .collect();

        let mut rng = rand::thread_rng();
        let chosen = match chn {
            Some(c) if qualifying.contains(&c.index()) => c.index(),
            _ => match qualifying.choose(&mut rng) {
                Some(&i) => i,
                None => return Vec::new(),
            },
        };

        let free = &available[chosen];
        let start = rng.gen_range(0..=free.len() - s_cnt);
        let mut selected = free[start..start + s_cnt].to_vec();
        selected.sort_by_key(|s| s.number());
        selected
    }

    /// Slots owned by `mmsi` on either channel inside the same window
    /// as [`SlotsMap::scan_for_free_slots`].
    pub fn scan_for_owned_slots(&self, mmsi: u32, length: u16, ref_si: Option<u16>) -> Vec<&Slot> {
        let ref_si = ref_si
            .map(|r| r % SLOTS_PER_MINUTE)
            .unwrap_or_else(|| self.current_slot(Channel::C87B).minute_index());
        let end_si = (ref_si + length) % SLOTS_PER_MINUTE;

        let mut owned = self.compute_slots_range(Channel::C87B, ref_si, end_si);
        owned.extend(self.compute_slots_range(Channel::C88B, ref_si, end_si));
        owned.retain(|s| s.owner() == Some(mmsi));
        owned
    }

    /// Current reservations grouped by owner, each group sorted by
    /// minute-ring index. An empty `mmsis` filter returns every owner.
    pub fn get_owned_slots(&self, mmsis: &[u32]) -> BTreeMap<u32, Vec<&Slot>> {
        let mut groups: BTreeMap<u32, Vec<&Slot>> = BTreeMap::new();
        for slot in &self.slots {
            if let Some(owner) = slot.owner() {
                if mmsis.is_empty() || mmsis.contains(&owner) {
                    groups.entry(owner).or_default().push(slot);
                }
            }
        }
        for slots in groups.values_mut() {
            slots.sort_by_key(|s| s.minute_index());
        }
        groups
    }

    /// One expiry sweep over every slot. See [`Slot::minute_tick`].
    pub fn expire_pass(&self) {
        for slot in &self.slots {
            slot.minute_tick();
        }
    }

    /// Run the minute-tick expiry in a background thread for the life
    /// of the process.
    pub fn spawn_cleanup(map: Arc<SlotsMap>) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("slots-cleanup".into())
            .spawn(move || {
                let mut last_minute = timing::current_datetime().minute();
                loop {
                    let minute = timing::current_datetime().minute();
                    if minute != last_minute {
                        last_minute = minute;
                        map.expire_pass();
                        debug!("slot expiry pass complete");
                    }
                    thread::sleep(timing::POLL_INTERVAL);
                }
            })
    }
}

#[cfg(test)]
mod test {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[test]
    fn map_has_both_channels() {
        let map = SlotsMap::new();
        assert_eq!(map.slots().len(), 4500);
        assert_eq!(map.slot(0).channel(), Channel::C87B);
        assert_eq!(map.slot(2250).channel(), Channel::C88B);
    }

    #[test]
    fn offset_is_forward_distance() {
        let map = SlotsMap::new();
        assert_eq!(
            map.compute_slot_offset(map.slot(10), Some(map.slot(5))),
            5
        );
        // wraps around the minute
        assert_eq!(
            map.compute_slot_offset(map.slot(5), Some(map.slot(2240))),
            15
        );
        // channels collapse to the minute ring
        assert_eq!(
            map.compute_slot_offset(map.slot(2260), Some(map.slot(5))),
            5
        );
    }

    #[quickcheck]
    fn offset_algebra(a: u16, b: u16) -> bool {
        let map = SlotsMap::new();
        let a = map.slot(a % 4500);
        let b = map.slot(b % 4500);
        let there = map.compute_slot_offset(a, Some(b));
        let back = map.compute_slot_offset(b, Some(a));
        map.compute_slot_offset(a, Some(a)) == 0
            && (there + back == 0 || there + back == SLOTS_PER_MINUTE)
    }

    #[test]
    fn absolute_distance_is_symmetric() {
        let map = SlotsMap::new();
        assert_eq!(
            map.compute_absolute_slot_distance(map.slot(100), Some(map.slot(40))),
            60
        );
        assert_eq!(
            map.compute_absolute_slot_distance(map.slot(40), Some(map.slot(100))),
            60
        );
    }

    #[test]
    fn offset_slot_stays_on_channel() {
        let map = SlotsMap::new();
        assert_eq!(map.compute_offset_slot(map.slot(2240), 20).number(), 10);
        assert_eq!(
            map.compute_offset_slot(map.slot(2250 + 2240), 20).number(),
            2250 + 10
        );
    }

    #[test]
    fn slots_range_simple() {
        let map = SlotsMap::new();
        let range = map.compute_slots_range(Channel::C87B, 10, 13);
        let numbers: Vec<u16> = range.iter().map(|s| s.number()).collect();
        assert_eq!(numbers, vec![10, 11, 12]);
    }

    #[test]
    fn slots_range_wraps_with_inclusive_bump() {
        let map = SlotsMap::new();
        let range = map.compute_slots_range(Channel::C87B, 2249, 1);
        let numbers: Vec<u16> = range.iter().map(|s| s.number()).collect();
        assert_eq!(numbers, vec![2249, 0, 1]);
    }

    #[test]
    fn slots_range_on_second_channel() {
        let map = SlotsMap::new();
        let range = map.compute_slots_range(Channel::C88B, 2248, 0);
        let numbers: Vec<u16> = range.iter().map(|s| s.number()).collect();
        assert_eq!(numbers, vec![2250 + 2248, 2250 + 2249, 2250]);
    }

    #[test]
    fn scan_prefers_requested_channel() {
        let map = SlotsMap::new();
        // channel 88B has nothing free in the window
        for i in 0..40u16 {
            map.slot(2250 + i).book(1, None, false);
        }
        let found = map.scan_for_free_slots(40, Some(0), 1, Some(Channel::C87B));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].channel(), Channel::C87B);
        let fallback = map.scan_for_free_slots(40, Some(0), 1, Some(Channel::C88B));
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].channel(), Channel::C87B);
    }

    #[test]
    fn scan_requires_four_candidates() {
        let map = SlotsMap::new();
        // three free slots per channel in the window is not enough
        for i in 0..10u16 {
            if i < 7 {
                map.slot(i).book(1, None, false);
                map.slot(2250 + i).book(1, None, false);
            }
        }
        assert!(map.scan_for_free_slots(10, Some(0), 1, None).is_empty());
    }

    #[test]
    fn scan_returns_contiguous_sorted_run() {
        let map = SlotsMap::new();
        for _ in 0..20 {
            let found = map.scan_for_free_slots(30, Some(100), 3, Some(Channel::C87B));
            assert_eq!(found.len(), 3);
            assert!(found.windows(2).all(|w| w[0].number() < w[1].number()));
            assert!(found.iter().all(|s| {
                let i = s.minute_index();
                (100..130).contains(&i)
            }));
        }
    }

    #[test]
    fn owned_scan_filters_by_mmsi() {
        let map = SlotsMap::new();
        map.slot(12).book(7, Some(3), false);
        map.slot(2250 + 14).book(7, Some(3), false);
        map.slot(13).book(8, Some(3), false);
        let owned = map.scan_for_owned_slots(7, 20, Some(10));
        let numbers: Vec<u16> = owned.iter().map(|s| s.number()).collect();
        assert_eq!(numbers, vec![12, 2250 + 14]);
    }

    #[test]
    fn owned_slots_grouped_and_sorted() {
        let map = SlotsMap::new();
        map.slot(2250 + 5).book(7, None, false);
        map.slot(40).book(7, None, false);
        map.slot(90).book(8, None, false);
        let groups = map.get_owned_slots(&[]);
        let sevens: Vec<u16> = groups[&7].iter().map(|s| s.number()).collect();
        assert_eq!(sevens, vec![2250 + 5, 40]);
        assert!(groups.contains_key(&8));
        let only_eight = map.get_owned_slots(&[8]);
        assert!(!only_eight.contains_key(&7));
    }

    #[test]
    fn expiry_releases_idle_and_never_used_slots() {
        let map = SlotsMap::new();
        map.slot(1).book(7, Some(3), false);
        map.slot(1).state().frames_since_last_use = Some(3);
        map.slot(2).book(7, Some(3), false);
        map.slot(2).state().frames_since_last_use = None;
        map.slot(3).book(7, Some(3), false);
        map.expire_pass();
        assert!(map.slot(1).is_free());
        assert!(map.slot(2).is_free());
        assert_eq!(map.slot(3).owner(), Some(7));
        assert_eq!(map.slot(3).frames_since_last_use(), Some(0));
    }
}
