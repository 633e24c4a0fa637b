//! Core of a simulated maritime AIS Class A station.
//!
//! The library models the MAC layer of the station: a dual-channel slot
//! map shared between a transmitter and two listeners, the SOTDMA/ITDMA
//! state machine that schedules transmissions against the wall clock, and
//! the bit-level codec for the position-report and static-voyage messages
//! exchanged over the simulated VHF data link.

pub mod boat;
pub mod protocol;
pub mod registry;
pub mod slot;
pub mod slots_map;
pub mod station;
pub mod timing;

pub use boat::BoatData;
pub use registry::BoatsRegistry;
pub use slot::{Channel, Slot};
pub use slots_map::SlotsMap;
pub use station::{RadioPort, Receiver, Station};
