//! Registry of every vessel heard on the air.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::boat::BoatData;
use crate::protocol::messages::{PositionReport, StaticVoyage};

/// Last-known snapshot of every observed station, keyed by MMSI.
///
/// Entries are inserted on first observation and updated in place
/// afterwards; nothing is ever evicted.
#[derive(Debug, Default)]
pub struct BoatsRegistry {
    boats: Mutex<HashMap<u32, BoatData>>,
}

impl BoatsRegistry {
    pub fn new() -> BoatsRegistry {
        BoatsRegistry::default()
    }

    fn boats(&self) -> MutexGuard<'_, HashMap<u32, BoatData>> {
        self.boats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of distinct stations heard so far.
    pub fn len(&self) -> usize {
        self.boats().len()
    }

    pub fn is_empty(&self) -> bool {
        self.boats().is_empty()
    }

    pub fn has_boat(&self, mmsi: u32) -> bool {
        self.boats().contains_key(&mmsi)
    }

    /// Snapshot of one vessel, if it was ever heard.
    pub fn get(&self, mmsi: u32) -> Option<BoatData> {
        self.boats().get(&mmsi).cloned()
    }

    /// Every known MMSI, sorted.
    pub fn mmsis(&self) -> Vec<u32> {
        let mut mmsis: Vec<u32> = self.boats().keys().copied().collect();
        mmsis.sort_unstable();
        mmsis
    }

    /// Fold a received position report into the registry.
    pub fn record_position(&self, report: &PositionReport) {
        self.boats()
            .entry(report.mmsi)
            .or_default()
            .apply_position(report);
    }

    /// Fold a received static-and-voyage report into the registry.
    pub fn record_static(&self, report: &StaticVoyage) {
        self.boats()
            .entry(report.mmsi)
            .or_default()
            .apply_static(report);
    }
}

#[cfg(test)]
mod test {
    use crate::protocol::messages::{CommState, SotdmaState, SubMessage};

    use super::*;

    fn report(mmsi: u32, sog: u16) -> PositionReport {
        PositionReport {
            message_id: 1,
            repeat_indicator: 3,
            mmsi,
            navigational_status: 0,
            rate_of_turn: 0,
            speed_over_ground: sog,
            position_accuracy: 0,
            longitude: 0,
            latitude: 0,
            course_over_ground: 0,
            true_heading: 511,
            time_stamp: 0,
            special_maneuvre_indicator: 0,
            spare: 0,
            raim_flag: 1,
            comm_state: CommState::Sotdma(SotdmaState {
                sync_state: 0,
                slot_timeout: 3,
                sub_message: SubMessage::ReceivedStations(0),
            }),
        }
    }

    #[test]
    fn first_observation_inserts() {
        let registry = BoatsRegistry::new();
        assert!(registry.is_empty());
        registry.record_position(&report(7, 10));
        assert_eq!(registry.len(), 1);
        assert!(registry.has_boat(7));
        assert_eq!(registry.get(7).unwrap().speed_over_ground, 10);
    }

    #[test]
    fn later_observations_update_in_place() {
        let registry = BoatsRegistry::new();
        registry.record_position(&report(7, 10));
        registry.record_position(&report(7, 22));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(7).unwrap().speed_over_ground, 22);
    }
}
