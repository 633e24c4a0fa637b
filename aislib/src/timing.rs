//! Wall-clock to slot-index mapping.
//!
//! Each VHF channel carries 2250 slots per minute, one slot every
//! 60/2250 s ≈ 26.67 ms. The slot grid is anchored to the wall clock:
//! the current slot index is a pure function of the second and
//! microsecond of the current minute.

use std::time::Duration;

use chrono::{DateTime, Local, Timelike};

/// Slots per minute on one channel.
pub const SLOTS_PER_MINUTE: u16 = 2250;

/// Duration of a single slot in milliseconds.
pub const SLOT_DURATION_MS: f64 = 60_000.0 / SLOTS_PER_MINUTE as f64;

/// Cooperative sleep used by every polling and retry loop in the crate.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Current local wall clock.
pub fn current_datetime() -> DateTime<Local> {
    Local::now()
}

/// Seconds since the Unix epoch, sub-second precision.
pub fn timestamp() -> f64 {
    current_datetime().timestamp_micros() as f64 / 1e6
}

/// Map a wall-clock time to the current slot index pair.
///
/// Returns `(i_87B, i_88B)` where the 88B index is the 87B index offset
/// by a full minute of slots. Leap-second overflow clamps to the last
/// slot of the minute.
pub fn datetime_to_slots_idx<T: Timelike>(dt: &T) -> (u16, u16) {
    let ms_in_minute = dt.second() as f64 * 1000.0 + dt.nanosecond() as f64 / 1_000_000.0;
    let idx = ((ms_in_minute / SLOT_DURATION_MS) as u16).min(SLOTS_PER_MINUTE - 1);
    (idx, idx + SLOTS_PER_MINUTE)
}

/// Slot index pair for the current wall-clock time.
pub fn current_slots_idx() -> (u16, u16) {
    datetime_to_slots_idx(&current_datetime())
}

#[cfg(test)]
mod test {
    use chrono::NaiveTime;

    use super::*;

    fn at(sec: u32, nano: u32) -> NaiveTime {
        NaiveTime::from_hms_nano_opt(12, 30, sec, nano).unwrap()
    }

    #[test]
    fn minute_start_is_slot_zero() {
        assert_eq!(datetime_to_slots_idx(&at(0, 0)), (0, SLOTS_PER_MINUTE));
    }

    #[test]
    fn minute_end_is_last_slot() {
        assert_eq!(datetime_to_slots_idx(&at(59, 999_900_000)).0, 2249);
    }

    #[test]
    fn rolls_over_on_minute_change() {
        // second 60 does not exist; the next minute starts at second 0
        assert_eq!(datetime_to_slots_idx(&at(0, 0)).0, 0);
    }

    #[test]
    fn one_slot_boundary() {
        // slot 0 lasts until just before 26.67 ms
        assert_eq!(datetime_to_slots_idx(&at(0, 26_000_000)).0, 0);
        assert_eq!(datetime_to_slots_idx(&at(0, 27_000_000)).0, 1);
    }

    #[test]
    fn channels_are_one_minute_apart() {
        let (a, b) = datetime_to_slots_idx(&at(30, 0));
        assert_eq!(b - a, SLOTS_PER_MINUTE);
    }
}
