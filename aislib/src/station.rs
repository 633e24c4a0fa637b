//! The SOTDMA/ITDMA station: scheduling, transmission and reception.
//!
//! One station owns the slot map, the boats registry and one datagram
//! port per channel. It runs the SOTDMA state machine (network entry,
//! first frame, continuous operation) on a dedicated thread while two
//! listener threads feed received frames back into the shared slot map.

use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::boat::BoatData;
use crate::protocol::messages::{
    AisMessage, CommState, ItdmaState, MessageError, SotdmaState, SubMessage,
};
use crate::protocol::{self, messages, MAX_DATAGRAM_SIZE};
use crate::registry::BoatsRegistry;
use crate::slot::{Channel, Slot};
use crate::slots_map::SlotsMap;
use crate::timing::{self, POLL_INTERVAL, SLOTS_PER_MINUTE};

/// Datagram transport for one VHF channel.
///
/// The station only needs a send/receive pair; the binary wires this to
/// a UDP socket, tests to a loopback.
pub trait RadioPort: Send + Sync + 'static {
    fn send(&self, datagram: &[u8]) -> io::Result<()>;
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Default reporting rate, transmissions per minute.
pub const DEFAULT_REPORTING_RATE: u16 = 10;

/// Reservation timeout bounds drawn for every new NTS.
pub const TMO_MIN: u8 = 3;
pub const TMO_MAX: u8 = 7;

/// Length of the RATDMA candidate window used for network entry.
const RATDMA_WINDOW: u16 = 150;

/// Seconds between two static-and-voyage (type 5) transmissions.
const MSG5_INTERVAL_SECS: f64 = 356.0;

/// Message types whose communication state is SOTDMA.
const SOTDMA_COM_STATE_MSG_TYPES: &[u8] = &[1, 2, 4, 9, 11, 18, 26];

/// Message types whose communication state is ITDMA.
const ITDMA_COM_STATE_MSG_TYPES: &[u8] = &[3, 9, 18, 26];

/// Message types carrying no communication state.
const NO_COM_STATE_MSG_TYPES: &[u8] = &[
    5, 6, 7, 8, 10, 12, 13, 14, 15, 16, 17, 19, 20, 21, 22, 23, 24, 25, 27,
];

/// Nominal slot index: `(NSS + (t_counter + rank) · NI) mod 2250`.
///
/// The result is a minute-ring index, i.e. the 87B slot; callers that
/// need the 88B twin re-channel it through
/// [`SlotsMap::compute_offset_slot`].
pub fn nominal_slot_index(nss: u16, t_counter: u32, rank: u32, ni: u16) -> u16 {
    ((nss as u64 % SLOTS_PER_MINUTE as u64
        + (t_counter as u64 + rank as u64) * ni as u64)
        % SLOTS_PER_MINUTE as u64) as u16
}

/// One simulated AIS Class A station.
pub struct Station<P: RadioPort> {
    mmsi: u32,
    boat: Arc<Mutex<BoatData>>,
    slots_map: Arc<SlotsMap>,
    registry: Arc<BoatsRegistry>,
    ports: [Arc<P>; 2],

    sync_state: u8,
    received_stations: Arc<AtomicU16>,
    last_msg5: Option<f64>,

    /// Reporting rate RI, transmissions per minute.
    reporting_rate: u16,
    /// Nominal increment NI, slots between consecutive NS values.
    nominal_increment: u16,
    /// Selection interval SI, width of the NTS search window.
    selection_interval: u16,
    t_counter: u32,

    /// Nominal start slot, fixed at network entry.
    nss: u16,
    /// Nominal slot of the current frame.
    ns: u16,
    /// Nominal transmission slot; `None` when no reservation is held.
    nts: Option<u16>,
}

impl<P: RadioPort> Station<P> {
    /// Create a station for `boat`, transmitting and receiving through
    /// one port per channel.
    pub fn new(boat: Arc<Mutex<BoatData>>, port_87b: Arc<P>, port_88b: Arc<P>) -> Station<P> {
        let mmsi = boat.lock().unwrap_or_else(PoisonError::into_inner).mmsi;
        let mut station = Station {
            mmsi,
            boat,
            slots_map: Arc::new(SlotsMap::new()),
            registry: Arc::new(BoatsRegistry::new()),
            ports: [port_87b, port_88b],
            sync_state: 0,
            received_stations: Arc::new(AtomicU16::new(0)),
            last_msg5: None,
            reporting_rate: 0,
            nominal_increment: 0,
            selection_interval: 0,
            t_counter: 0,
            nss: 0,
            ns: 0,
            nts: None,
        };
        station.set_reporting_rate(DEFAULT_REPORTING_RATE);
        station
    }

    pub fn mmsi(&self) -> u32 {
        self.mmsi
    }

    pub fn slots_map(&self) -> &Arc<SlotsMap> {
        &self.slots_map
    }

    pub fn registry(&self) -> &Arc<BoatsRegistry> {
        &self.registry
    }

    /// Reception half of the station, shared with the listener threads.
    pub fn receiver(&self) -> Receiver {
        Receiver {
            mmsi: self.mmsi,
            slots_map: Arc::clone(&self.slots_map),
            registry: Arc::clone(&self.registry),
            received_stations: Arc::clone(&self.received_stations),
        }
    }

    /// Start the listeners, the slot expiry task and the station state
    /// machine. The returned handles live for the rest of the process.
    pub fn spawn(self) -> io::Result<Vec<thread::JoinHandle<()>>> {
        let mut handles = Vec::new();
        for channel in [Channel::C87B, Channel::C88B] {
            handles.push(spawn_listener(
                Arc::clone(&self.ports[channel.index()]),
                self.receiver(),
                channel,
            )?);
        }
        handles.push(SlotsMap::spawn_cleanup(Arc::clone(&self.slots_map))?);
        handles.push(
            thread::Builder::new()
                .name("sotdma-station".into())
                .spawn(move || self.run())?,
        );
        Ok(handles)
    }

    fn set_reporting_rate(&mut self, reporting_rate: u16) {
        self.reporting_rate = reporting_rate;
        let report_interval = 60.0 / reporting_rate as f64;
        self.nominal_increment = (SLOTS_PER_MINUTE as f64 / report_interval) as u16;
        self.selection_interval = (0.2 * self.nominal_increment as f64) as u16;
    }

    fn boat_snapshot(&self) -> BoatData {
        self.boat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn wait_for_slot(&self, slot: &Slot) {
        while !slot.is_current() {
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_for_nts(&self) {
        if let Some(nts) = self.nts {
            self.wait_for_slot(self.slots_map.slot(nts));
        }
    }

    /// NS index for `rank` frames ahead of the current frame.
    fn get_next_ns(&self, rank: u32) -> u16 {
        nominal_slot_index(
            self.slots_map.slot(self.nss).number(),
            self.t_counter,
            rank,
            self.nominal_increment,
        )
    }

    fn set_next_ns(&mut self) {
        self.ns = self.get_next_ns(0);
    }

    /// Start of the SI-wide search window centred on a minute index.
    fn window_start(&self, centre: u16) -> u16 {
        (centre % SLOTS_PER_MINUTE + SLOTS_PER_MINUTE - self.selection_interval / 2)
            % SLOTS_PER_MINUTE
    }

    /// Reserve a fresh NTS in the SI window around NS, preferring the
    /// channel opposite the previous NTS, retrying until a candidate
    /// appears.
    fn set_next_nts(&self) -> u16 {
        let map = Arc::clone(&self.slots_map);
        let start_si = self.window_start(self.slots_map.slot(self.ns).minute_index());
        let preferred = self
            .nts
            .map(|nts| map.slot(nts).channel().other());

        let mut rng = rand::thread_rng();
        loop {
            let available =
                map.scan_for_free_slots(self.selection_interval, Some(start_si), 1, preferred);
            if let Some(&next) = available.choose(&mut rng) {
                next.book(self.mmsi, Some(rng.gen_range(TMO_MIN..=TMO_MAX)), false);
                return next.number();
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// An already-owned slot in the SI window around the NS of `rank`
    /// frames ahead, if any.
    fn get_next_nts(&self, rank: u32) -> Option<u16> {
        let start_si = self.window_start(self.get_next_ns(rank));
        let owned =
            self.slots_map
                .scan_for_owned_slots(self.mmsi, self.selection_interval, Some(start_si));
        owned
            .choose(&mut rand::thread_rng())
            .map(|slot| slot.number())
    }

    /// RATDMA candidate selection on `chn`, used for network entry.
    ///
    /// Surveys the 150 slots after the current one, picks a free
    /// candidate uniformly and then refines the pick probabilistically.
    /// Blocks on the cooperative retry loop while the window has no
    /// free slot.
    fn ratdma_slot_selection(&self, chn: Channel, _lme_rtpri: u8) -> u16 {
        let map = &self.slots_map;
        let mut rng = rand::thread_rng();
        loop {
            let start = map.current_slot(chn);
            let end = map.compute_offset_slot(start, RATDMA_WINDOW);
            let range = map.compute_slots_range(chn, start.minute_index(), end.minute_index());
            let mut candidates = map.extract_available_slots(&range);
            if candidates.is_empty() {
                thread::sleep(POLL_INTERVAL);
                continue;
            }

            let mut pick = rng.gen_range(0..candidates.len());
            // `end` on slot 0 makes the base probability infinite, which
            // simply keeps the first pick
            let lme_rtps = 100.0 / end.number() as f64;
            let lme_rtp1: f64 = rng.gen_range(0.0..100.0);
            let mut lme_rtp2 = lme_rtps;
            let mut lme_rtcsc = candidates.len() as f64;
            let mut lme_rtpi = (100.0 - lme_rtp2) / lme_rtcsc;

            while lme_rtp1 > lme_rtp2 {
                lme_rtp2 += lme_rtpi;
                lme_rtcsc -= 1.0;
                lme_rtpi = (100.0 - lme_rtp2) / lme_rtcsc;
                let removed = candidates.remove(pick);
                if candidates.is_empty() {
                    return removed.number();
                }
                pick = rng.gen_range(0..candidates.len());
            }
            return candidates[pick].number();
        }
    }

    fn set_initial_nss_and_ns(&mut self) {
        let channel = if rand::thread_rng().gen_bool(0.5) {
            Channel::C87B
        } else {
            Channel::C88B
        };
        self.nss = self.ratdma_slot_selection(channel, 1);
        self.ns = self.nss;
    }

    /// Network entry: pick NSS/NS via RATDMA and reserve the first NTS,
    /// starting over while the NTS lands more than NI slots out. Blocks
    /// until the reserved NTS becomes current.
    fn net_entry(&mut self) {
        loop {
            self.set_initial_nss_and_ns();
            let nts = self.set_next_nts();
            self.nts = Some(nts);
            let offset = self
                .slots_map
                .compute_slot_offset(self.slots_map.slot(nts), None);
            if offset <= self.nominal_increment {
                break;
            }
        }
        if let Some(nts) = self.nts {
            info!("first NTS reserved: {}", self.slots_map.slot(nts));
        }
        self.wait_for_nts();
    }

    /// First-frame negotiation: provisional ITDMA (type 3) frames until
    /// the announced offset reaches zero.
    fn first_frame(&mut self) {
        let map = Arc::clone(&self.slots_map);
        self.t_counter += 1;
        let Some(ref_nts) = self.nts else { return };

        loop {
            self.set_next_ns();
            let next_nts = self.set_next_nts();
            let current = self.nts.unwrap_or(ref_nts);
            // only announce an offset when the candidate has drifted out
            // of the SI window around the reference slot
            let offset = if map
                .compute_absolute_slot_distance(map.slot(next_nts), Some(map.slot(ref_nts)))
                >= self.selection_interval
            {
                map.compute_slot_offset(map.slot(next_nts), Some(map.slot(current)))
            } else {
                0
            };
            self.itdma(current, 3, offset, 1, true);
            self.t_counter += 1;
            debug!("NTS reserved for the next type 3 frame: {}", map.slot(next_nts));
            if offset != 0 {
                self.nts = Some(next_nts);
            } else {
                map.slot(next_nts).release();
                self.nts = Some(ref_nts);
                self.t_counter -= 1;
                return;
            }
        }
    }

    /// One frame of continuous operation, transmitting `msg_type`.
    fn continuous(&mut self, msg_type: u8) {
        let map = Arc::clone(&self.slots_map);
        let Some(nts) = self.nts else { return };

        if self.get_next_nts(0).is_none() {
            // the SI window around NS holds nothing of ours any more:
            // reserve a replacement and announce it with an ITDMA frame
            self.t_counter += 1;
            self.set_next_ns();
            let next_nts = self.set_next_nts();
            let offset = map.compute_slot_offset(map.slot(next_nts), Some(map.slot(nts)));
            info!(
                "missing NTS detected, reserving {} to replace it",
                map.slot(next_nts)
            );
            self.wait_for_nts();
            self.itdma(nts, 3, offset, 1, true);
            self.nts = Some(next_nts);
        } else if NO_COM_STATE_MSG_TYPES.contains(&msg_type) {
            self.wait_for_nts();
            self.send(nts, msg_type, false, None, 1);
            map.slot(nts).use_slot();
            self.t_counter += 1;
            self.set_next_ns();
            self.nts = self.get_next_nts(0);
        } else if SOTDMA_COM_STATE_MSG_TYPES.contains(&msg_type) {
            self.wait_for_nts();
            if map.slot(nts).timeout() == Some(0) {
                // the reservation dies with this transmission: pick a
                // replacement on the same channel and announce its offset
                let start_si = self.window_start(self.slots_map.slot(self.ns).minute_index());
                let mut rng = rand::thread_rng();
                let new_nts = loop {
                    let available = map.scan_for_free_slots(
                        self.selection_interval,
                        Some(start_si),
                        1,
                        Some(map.slot(nts).channel()),
                    );
                    if let Some(&slot) = available.choose(&mut rng) {
                        break slot;
                    }
                    thread::sleep(POLL_INTERVAL);
                };
                info!(
                    "NTS {} expired: replaced by {} after the next frame",
                    map.slot(nts),
                    new_nts
                );
                let offset = map.compute_slot_offset(new_nts, None);
                self.send(nts, msg_type, false, Some(offset), 1);
                map.slot(nts).use_slot();
                self.t_counter += 1;
                self.set_next_ns();
                self.nts = self.get_next_nts(0);
                new_nts.book(self.mmsi, Some(rng.gen_range(TMO_MIN..=TMO_MAX)), false);
            } else {
                self.send(nts, msg_type, false, None, 1);
                map.slot(nts).use_slot();
                self.t_counter += 1;
                self.set_next_ns();
                self.nts = self.get_next_nts(0);
            }
        }
    }

    /// Change the reporting rate and renegotiate the transmission slot
    /// chain, preferring slots we already own near the new NS values.
    ///
    /// Extension point: the continuous loop never calls this.
    pub fn change_reporting_interval(&mut self, new_rate: u16) {
        let map = Arc::clone(&self.slots_map);
        self.wait_for_nts();
        info!(
            "reporting rate change: {} to {} transmissions per minute",
            self.reporting_rate, new_rate
        );
        self.nss = self.ns;
        self.set_reporting_rate(new_rate);

        let Some(ref_nts) = self.nts else { return };
        self.t_counter += 1;
        loop {
            self.set_next_ns();
            let start_si = self.window_start(self.get_next_ns(0));
            let owned =
                map.scan_for_owned_slots(self.mmsi, self.selection_interval, Some(start_si));
            let next_nts = match owned.choose(&mut rand::thread_rng()) {
                Some(slot) => slot.number(),
                None => self.set_next_nts(),
            };
            let current = self.nts.unwrap_or(ref_nts);
            let offset = if map
                .compute_absolute_slot_distance(map.slot(next_nts), Some(map.slot(ref_nts)))
                >= self.selection_interval
            {
                map.compute_slot_offset(map.slot(next_nts), Some(map.slot(current)))
            } else {
                0
            };
            self.itdma(current, 3, offset, 1, true);
            self.t_counter += 1;
            if offset != 0 {
                self.nts = Some(next_nts);
            } else {
                map.slot(next_nts).release();
                self.nts = Some(ref_nts);
                self.t_counter -= 1;
                return;
            }
        }
    }

    /// Wait for `slot`, transmit `msg_type` on it and consume one usage
    /// cycle of the reservation.
    fn itdma(&self, slot: u16, msg_type: u8, slot_increment: u16, number_of_slots: u8, keep: bool) {
        let slot = self.slots_map.slot(slot);
        if ITDMA_COM_STATE_MSG_TYPES.contains(&msg_type) {
            self.wait_for_slot(slot);
            self.send(slot.number(), msg_type, keep, Some(slot_increment), number_of_slots);
            slot.use_slot();
        } else if NO_COM_STATE_MSG_TYPES.contains(&msg_type) {
            self.wait_for_slot(slot);
            self.send(slot.number(), msg_type, false, None, 1);
            slot.use_slot();
        }
    }

    /// Build and transmit one frame on `slot`'s channel.
    ///
    /// Encoding failures are logged and drop the frame; the state
    /// machine never stops for a bad payload.
    fn send(&self, slot: u16, msg_type: u8, keep_flag: bool, offset: Option<u16>, slots_nbr: u8) {
        let slot = self.slots_map.slot(slot);
        let comm_state = match msg_type {
            1 | 2 => {
                let slot_timeout = slot.timeout().unwrap_or(0);
                Some(CommState::Sotdma(SotdmaState {
                    sync_state: self.sync_state,
                    slot_timeout,
                    sub_message: SubMessage::for_timeout(
                        slot_timeout,
                        self.received_stations.load(Ordering::Relaxed),
                        slot.number(),
                        offset.unwrap_or(0),
                    ),
                }))
            }
            3 => Some(CommState::Itdma(ItdmaState {
                sync_state: self.sync_state,
                slot_increment: offset.unwrap_or(0),
                number_of_slots: slots_nbr,
                keep_flag,
            })),
            _ => None,
        };

        let boat = self.boat_snapshot();
        let frame = match messages::build_frame(msg_type, &boat, comm_state.as_ref()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("could not build message {}: {}", msg_type, e);
                return;
            }
        };

        let port = &self.ports[slot.channel().index()];
        match port.send(&protocol::encode(&frame)) {
            Ok(()) => info!("message {} sent on slot {}", msg_type, slot),
            Err(e) => warn!("transmission failed on {}: {}", slot.channel(), e),
        }
        thread::sleep(POLL_INTERVAL);
    }

    /// The station state machine, run on its own thread by
    /// [`Station::spawn`].
    fn run(mut self) {
        info!("SOTDMA initialisation complete");
        if self.reporting_rate > 120 {
            return;
        }

        info!("entering the SOTDMA network");
        self.net_entry();
        info!("network entry complete, negotiating the first frame");
        self.first_frame();
        info!("continuous SOTDMA phase started");
        loop {
            let due_msg5 = self
                .last_msg5
                .map_or(true, |t| timing::timestamp() - t >= MSG5_INTERVAL_SECS);
            if due_msg5 {
                self.last_msg5 = Some(timing::timestamp());
                self.continuous(5);
            } else {
                self.continuous(1);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Reception half of a station: everything the listener threads need to
/// fold an observed transmission into the shared state.
#[derive(Clone)]
pub struct Receiver {
    mmsi: u32,
    slots_map: Arc<SlotsMap>,
    registry: Arc<BoatsRegistry>,
    received_stations: Arc<AtomicU16>,
}

impl Receiver {
    /// Handle one received datagram on `channel`.
    ///
    /// Decode and parse errors are logged and dropped; own
    /// transmissions echoed back by the channel server are ignored.
    pub fn handle_transmission(&self, datagram: &[u8], channel: Channel) {
        let slot = self.slots_map.current_slot(channel);

        let bits = match protocol::decode(datagram) {
            Ok(bits) => bits,
            Err(_) => {
                warn!("undecodable datagram received on {} and ignored", channel);
                return;
            }
        };
        let parsed = match messages::parse_frame(bits) {
            Ok(message) => message,
            Err(MessageError::UnknownType(t)) => {
                warn!("message of unknown type {} received and ignored", t);
                return;
            }
            Err(MessageError::Corrupted) => {
                warn!("corrupted message received and ignored");
                return;
            }
        };
        if parsed.mmsi() == self.mmsi {
            return;
        }

        match &parsed {
            AisMessage::Position(report) => self.registry.record_position(report),
            AisMessage::StaticVoyage(report) => self.registry.record_static(report),
        }
        self.received_stations
            .store(self.registry.len() as u16, Ordering::Relaxed);

        if slot.owner().map_or(true, |owner| owner == parsed.mmsi()) {
            if slot.timeout().is_some() {
                slot.use_slot();
            } else {
                slot.mark_as_used();
            }
            if let AisMessage::Position(report) = &parsed {
                match &report.comm_state {
                    CommState::Sotdma(state) => self.apply_sotdma(slot, report.mmsi, state),
                    CommState::Itdma(state) => self.apply_itdma(slot, report.mmsi, state),
                }
            }
        }
        debug!(
            "message {} received from vessel {}",
            parsed.message_id(),
            parsed.mmsi()
        );
    }

    /// Slot bookkeeping for a SOTDMA communication state (types 1/2).
    fn apply_sotdma(&self, slot: &Slot, mmsi: u32, state: &SotdmaState) {
        if slot.owner().is_none() && state.slot_timeout > 0 {
            slot.book(mmsi, Some(state.slot_timeout), false);
        } else if slot.timeout().is_none() && state.slot_timeout > 0 {
            // an indefinite reservation becomes a counted one
            slot.set_timeout(Some(state.slot_timeout));
        } else if slot.timeout().is_none() && state.slot_timeout == 0 {
            slot.release();
        }

        if state.slot_timeout == 0 {
            // the sender is moving: its offset names the replacement slot
            if let SubMessage::SlotOffset(offset) = state.sub_message {
                let reserved = self.slots_map.compute_offset_slot(slot, offset);
                reserved.book(mmsi, Some(0), false);
                slot.release();
            }
        }
    }

    /// Slot bookkeeping for an ITDMA communication state (type 3).
    fn apply_itdma(&self, slot: &Slot, mmsi: u32, state: &ItdmaState) {
        if !state.keep_flag {
            slot.release();
        } else if slot.owner().is_none() {
            slot.book(mmsi, None, false);
        }

        if state.slot_increment > 0 {
            // increments announced on 87B reserve on the 88B half and
            // vice versa, per the simulator's channel convention
            let mut reserved =
                (slot.minute_index() + state.slot_increment % SLOTS_PER_MINUTE) % SLOTS_PER_MINUTE;
            if slot.channel() == Channel::C87B {
                reserved += SLOTS_PER_MINUTE;
            }
            self.slots_map.slot(reserved).book(mmsi, None, false);
        }
    }
}

/// Run a listener thread for one channel, feeding every received
/// datagram into the reception handler. Transport errors are logged and
/// swallowed so the loop survives them.
pub fn spawn_listener<P: RadioPort>(
    port: Arc<P>,
    receiver: Receiver,
    channel: Channel,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("listener-{}", channel))
        .spawn(move || {
            info!("antenna listening on channel {}", channel);
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                match port.recv(&mut buf) {
                    Ok(len) => receiver.handle_transmission(&buf[..len], channel),
                    Err(e) => {
                        warn!("receive failed on {}: {}", channel, e);
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        })
}
