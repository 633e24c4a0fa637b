//! Building and parsing of the supported message types.
//!
//! Four message types are carried: 1/2/3 (position reports, 168-bit
//! payload) and 5 (static and voyage data, 424-bit payload). Payload
//! field layouts are declarative tables consumed against the typed
//! [`BoatData`] accessor on the way out, and parsed field by field with
//! nom on the way in.

use chrono::Timelike;
use nom::bytes::complete::take;
use nom::combinator::{all_consuming, map_res};
use nom::IResult;

use crate::boat::{BoatData, Field, FieldValue};
use crate::protocol::bits::{bits_to_int, bits_to_str, int_to_bits, pad_left, str_to_bits, EncodeError};
use crate::protocol::{crc, BUFFER_BITS, END_FLAG, RAMP_UP_BITS, START_FLAG, SYNC_SEQUENCE};
use crate::timing;

/// Repeat indicator transmitted on every frame.
const REPEAT_INDICATOR: u64 = 3;

/// Payload layout of message types 1, 2 and 3, after the 6-bit type and
/// 2-bit repeat indicator.
pub const MSG123_CONTENT: &[(Field, usize)] = &[
    (Field::Mmsi, 30),
    (Field::NavigationalStatus, 4),
    (Field::RateOfTurn, 8),
    (Field::SpeedOverGround, 10),
    (Field::PositionAccuracy, 1),
    (Field::Longitude, 28),
    (Field::Latitude, 27),
    (Field::CourseOverGround, 12),
    (Field::TrueHeading, 9),
    (Field::TimeStamp, 6),
    (Field::SpecialManeuvreIndicator, 2),
    (Field::Spare, 3),
    (Field::RaimFlag, 1),
];

/// Payload layout of message type 5.
pub const MSG5_CONTENT: &[(Field, usize)] = &[
    (Field::Mmsi, 30),
    (Field::AisVersion, 2),
    (Field::ImoNumber, 30),
    (Field::CallSign, 42),
    (Field::Name, 120),
    (Field::TypeOfShipAndCargoType, 8),
    (Field::DimensionA, 9),
    (Field::DimensionB, 9),
    (Field::DimensionC, 6),
    (Field::DimensionD, 6),
    (Field::TypeOfEpfDevice, 4),
    (Field::EtaMinute, 6),
    (Field::EtaHour, 5),
    (Field::EtaDay, 5),
    (Field::EtaMonth, 4),
    (Field::MaximumPresentStaticDraught, 8),
    (Field::Destination, 120),
    (Field::Dte, 1),
    (Field::Spare, 1),
];

/// Why a received frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    /// The 6-bit type field names a message we do not carry.
    UnknownType(u8),
    /// CRC mismatch, truncation, or otherwise unparseable bits.
    Corrupted,
}

impl std::error::Error for MessageError {}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MessageError::UnknownType(t) => write!(f, "unknown message type {}", t),
            MessageError::Corrupted => write!(f, "corrupted message"),
        }
    }
}

/// The 14-bit SOTDMA sub-message, selected by the slot timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubMessage {
    /// Timeout 3, 5 or 7: stations received so far.
    ReceivedStations(u16),
    /// Timeout 2, 4 or 6: the slot this frame went out on.
    SlotNumber(u16),
    /// Timeout 1: current UTC hour and minute, zero-padded to 14 bits.
    UtcHourMinute { hour: u8, minute: u8 },
    /// Timeout 0: offset to the slot that replaces this reservation.
    SlotOffset(u16),
}

impl SubMessage {
    /// Pick the sub-message matching `slot_timeout`, drawing the hour
    /// and minute from the wall clock when needed.
    pub fn for_timeout(
        slot_timeout: u8,
        received_stations: u16,
        slot_number: u16,
        slot_offset: u16,
    ) -> SubMessage {
        match slot_timeout {
            3 | 5 | 7 => SubMessage::ReceivedStations(received_stations),
            2 | 4 | 6 => SubMessage::SlotNumber(slot_number),
            1 => {
                let now = timing::current_datetime();
                SubMessage::UtcHourMinute {
                    hour: now.hour() as u8,
                    minute: now.minute() as u8,
                }
            }
            _ => SubMessage::SlotOffset(slot_offset),
        }
    }

    fn encode(&self) -> Result<String, EncodeError> {
        match *self {
            SubMessage::ReceivedStations(n) => int_to_bits(n as u64, 14),
            SubMessage::SlotNumber(n) => int_to_bits(n as u64, 14),
            SubMessage::UtcHourMinute { hour, minute } => {
                let mut bits = int_to_bits(hour as u64, 5)?;
                bits.push_str(&int_to_bits(minute as u64, 6)?);
                Ok(pad_left(&bits, 14))
            }
            SubMessage::SlotOffset(n) => int_to_bits(n as u64, 14),
        }
    }
}

/// SOTDMA communication state carried by message types 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SotdmaState {
    pub sync_state: u8,
    pub slot_timeout: u8,
    pub sub_message: SubMessage,
}

/// ITDMA communication state carried by message type 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItdmaState {
    pub sync_state: u8,
    pub slot_increment: u16,
    pub number_of_slots: u8,
    pub keep_flag: bool,
}

/// Communication state, 19 bits at the tail of a position report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommState {
    Sotdma(SotdmaState),
    Itdma(ItdmaState),
}

impl CommState {
    fn encode(&self) -> Result<String, EncodeError> {
        match self {
            CommState::Sotdma(state) => {
                let mut bits = int_to_bits(state.sync_state as u64, 2)?;
                bits.push_str(&int_to_bits(state.slot_timeout as u64, 3)?);
                bits.push_str(&state.sub_message.encode()?);
                Ok(bits)
            }
            CommState::Itdma(state) => {
                let mut bits = int_to_bits(state.sync_state as u64, 2)?;
                bits.push_str(&int_to_bits(state.slot_increment as u64, 13)?);
                bits.push_str(&int_to_bits(state.number_of_slots as u64, 3)?);
                bits.push_str(&int_to_bits(state.keep_flag as u64, 1)?);
                Ok(bits)
            }
        }
    }
}

/// A parsed position report, message types 1, 2 and 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionReport {
    pub message_id: u8,
    pub repeat_indicator: u8,
    pub mmsi: u32,
    pub navigational_status: u8,
    /// Raw encoded rate of turn.
    pub rate_of_turn: u8,
    pub speed_over_ground: u16,
    pub position_accuracy: u8,
    pub longitude: u32,
    pub latitude: u32,
    pub course_over_ground: u16,
    pub true_heading: u16,
    pub time_stamp: u8,
    pub special_maneuvre_indicator: u8,
    pub spare: u8,
    pub raim_flag: u8,
    pub comm_state: CommState,
}

/// A parsed static-and-voyage report, message type 5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticVoyage {
    pub message_id: u8,
    pub repeat_indicator: u8,
    pub mmsi: u32,
    pub ais_version: u8,
    pub imo_number: u32,
    pub call_sign: String,
    pub name: String,
    pub type_of_ship_and_cargo_type: u8,
    pub dimension_a: u16,
    pub dimension_b: u16,
    pub dimension_c: u8,
    pub dimension_d: u8,
    pub type_of_epf_device: u8,
    pub eta_minute: u8,
    pub eta_hour: u8,
    pub eta_day: u8,
    pub eta_month: u8,
    pub maximum_present_static_draught: u8,
    pub destination: String,
    pub dte: u8,
    pub spare: u8,
}

/// Any message this station can parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AisMessage {
    Position(PositionReport),
    StaticVoyage(StaticVoyage),
}

impl AisMessage {
    pub fn message_id(&self) -> u8 {
        match self {
            AisMessage::Position(m) => m.message_id,
            AisMessage::StaticVoyage(m) => m.message_id,
        }
    }

    pub fn mmsi(&self) -> u32 {
        match self {
            AisMessage::Position(m) => m.mmsi,
            AisMessage::StaticVoyage(m) => m.mmsi,
        }
    }
}

/// Build the full frame for `msg_id` from the vessel snapshot.
///
/// Types 1/2/3 must come with their communication state; type 5 carries
/// none. The result is the complete on-air bitstring: ramp, sync and
/// start flag, payload, payload CRC, end flag and buffer bits.
pub fn build_frame(
    msg_id: u8,
    boat: &BoatData,
    comm_state: Option<&CommState>,
) -> Result<String, EncodeError> {
    let payload = build_payload(msg_id, boat, comm_state)?;
    let mut frame = String::with_capacity(payload.len() + 79);
    frame.push_str(RAMP_UP_BITS);
    frame.push_str(SYNC_SEQUENCE);
    frame.push_str(START_FLAG);
    frame.push_str(&payload);
    frame.push_str(&crc::compute_crc(&payload));
    frame.push_str(END_FLAG);
    frame.push_str(BUFFER_BITS);
    Ok(frame)
}

fn build_payload(
    msg_id: u8,
    boat: &BoatData,
    comm_state: Option<&CommState>,
) -> Result<String, EncodeError> {
    let mut payload = int_to_bits(msg_id as u64, 6)?;
    payload.push_str(&int_to_bits(REPEAT_INDICATOR, 2)?);

    let content = if matches!(msg_id, 1 | 2 | 3) {
        MSG123_CONTENT
    } else {
        MSG5_CONTENT
    };
    for &(field, width) in content {
        match boat.field(field) {
            FieldValue::Uint(v) => payload.push_str(&int_to_bits(v, width)?),
            FieldValue::Text(s) => payload.push_str(&str_to_bits(s, Some(width))?),
        }
    }

    if matches!(msg_id, 1 | 2 | 3) {
        if let Some(state) = comm_state {
            payload.push_str(&state.encode()?);
        }
    }
    Ok(payload)
}

/// Message type of a raw frame, bits 40..46.
pub fn frame_message_type(frame: &str) -> Result<u8, MessageError> {
    let bits = frame.get(40..46).ok_or(MessageError::Corrupted)?;
    bits_to_int(bits)
        .map(|v| v as u8)
        .map_err(|_| MessageError::Corrupted)
}

/// Parse a full received frame, verifying its CRC.
pub fn parse_frame(frame: &str) -> Result<AisMessage, MessageError> {
    match frame_message_type(frame)? {
        1 | 2 | 3 => {
            let payload = frame.get(40..208).ok_or(MessageError::Corrupted)?;
            let provided = frame.get(208..224).ok_or(MessageError::Corrupted)?;
            if !crc::verify_crc(payload, provided) {
                return Err(MessageError::Corrupted);
            }
            let (_, report) =
                all_consuming(parse_position)(payload).map_err(|_| MessageError::Corrupted)?;
            Ok(AisMessage::Position(report))
        }
        5 => {
            let payload = frame.get(40..464).ok_or(MessageError::Corrupted)?;
            let provided = frame.get(464..480).ok_or(MessageError::Corrupted)?;
            if !crc::verify_crc(payload, provided) {
                return Err(MessageError::Corrupted);
            }
            let (_, report) =
                all_consuming(parse_static)(payload).map_err(|_| MessageError::Corrupted)?;
            Ok(AisMessage::StaticVoyage(report))
        }
        other => Err(MessageError::UnknownType(other)),
    }
}

/// Parser for a big-endian unsigned field of `width` bits.
fn uint(width: usize) -> impl Fn(&str) -> IResult<&str, u64> {
    move |input| map_res(take(width), bits_to_int)(input)
}

/// Parser for a six-bit text field of `width` bits.
fn text(width: usize) -> impl Fn(&str) -> IResult<&str, String> {
    move |input| map_res(take(width), bits_to_str)(input)
}

fn parse_position(payload: &str) -> IResult<&str, PositionReport> {
    let (rest, message_id) = uint(6)(payload)?;
    let (rest, repeat_indicator) = uint(2)(rest)?;
    let (rest, mmsi) = uint(30)(rest)?;
    let (rest, navigational_status) = uint(4)(rest)?;
    let (rest, rate_of_turn) = uint(8)(rest)?;
    let (rest, speed_over_ground) = uint(10)(rest)?;
    let (rest, position_accuracy) = uint(1)(rest)?;
    let (rest, longitude) = uint(28)(rest)?;
    let (rest, latitude) = uint(27)(rest)?;
    let (rest, course_over_ground) = uint(12)(rest)?;
    let (rest, true_heading) = uint(9)(rest)?;
    let (rest, time_stamp) = uint(6)(rest)?;
    let (rest, special_maneuvre_indicator) = uint(2)(rest)?;
    let (rest, spare) = uint(3)(rest)?;
    let (rest, raim_flag) = uint(1)(rest)?;
    let (rest, comm_state) = parse_comm_state(message_id as u8)(rest)?;

    Ok((
        rest,
        PositionReport {
            message_id: message_id as u8,
            repeat_indicator: repeat_indicator as u8,
            mmsi: mmsi as u32,
            navigational_status: navigational_status as u8,
            rate_of_turn: rate_of_turn as u8,
            speed_over_ground: speed_over_ground as u16,
            position_accuracy: position_accuracy as u8,
            longitude: longitude as u32,
            latitude: latitude as u32,
            course_over_ground: course_over_ground as u16,
            true_heading: true_heading as u16,
            time_stamp: time_stamp as u8,
            special_maneuvre_indicator: special_maneuvre_indicator as u8,
            spare: spare as u8,
            raim_flag: raim_flag as u8,
            comm_state,
        },
    ))
}

fn parse_comm_state(message_id: u8) -> impl Fn(&str) -> IResult<&str, CommState> {
    move |input| {
        let (rest, sync_state) = uint(2)(input)?;
        let sync_state = sync_state as u8;
        if message_id == 3 {
            let (rest, slot_increment) = uint(13)(rest)?;
            let (rest, number_of_slots) = uint(3)(rest)?;
            let (rest, keep_flag) = uint(1)(rest)?;
            Ok((
                rest,
                CommState::Itdma(ItdmaState {
                    sync_state,
                    slot_increment: slot_increment as u16,
                    number_of_slots: number_of_slots as u8,
                    keep_flag: keep_flag == 1,
                }),
            ))
        } else {
            let (rest, slot_timeout) = uint(3)(rest)?;
            let slot_timeout = slot_timeout as u8;
            let (rest, sub_message) = map_res(take(14usize), |bits: &str| {
                Ok::<_, std::num::ParseIntError>(match slot_timeout {
                    3 | 5 | 7 => SubMessage::ReceivedStations(bits_to_int(bits)? as u16),
                    2 | 4 | 6 => SubMessage::SlotNumber(bits_to_int(bits)? as u16),
                    // built as 3 pad bits, hour(5), minute(6): the first
                    // 8 bits still parse to the hour value
                    1 => SubMessage::UtcHourMinute {
                        hour: bits_to_int(&bits[..8])? as u8,
                        minute: bits_to_int(&bits[8..])? as u8,
                    },
                    _ => SubMessage::SlotOffset(bits_to_int(bits)? as u16),
                })
            })(rest)?;
            Ok((
                rest,
                CommState::Sotdma(SotdmaState {
                    sync_state,
                    slot_timeout,
                    sub_message,
                }),
            ))
        }
    }
}

fn parse_static(payload: &str) -> IResult<&str, StaticVoyage> {
    let (rest, message_id) = uint(6)(payload)?;
    let (rest, repeat_indicator) = uint(2)(rest)?;
    let (rest, mmsi) = uint(30)(rest)?;
    let (rest, ais_version) = uint(2)(rest)?;
    let (rest, imo_number) = uint(30)(rest)?;
    let (rest, call_sign) = text(42)(rest)?;
    let (rest, name) = text(120)(rest)?;
    let (rest, type_of_ship_and_cargo_type) = uint(8)(rest)?;
    let (rest, dimension_a) = uint(9)(rest)?;
    let (rest, dimension_b) = uint(9)(rest)?;
    let (rest, dimension_c) = uint(6)(rest)?;
    let (rest, dimension_d) = uint(6)(rest)?;
    let (rest, type_of_epf_device) = uint(4)(rest)?;
    let (rest, eta_minute) = uint(6)(rest)?;
    let (rest, eta_hour) = uint(5)(rest)?;
    let (rest, eta_day) = uint(5)(rest)?;
    let (rest, eta_month) = uint(4)(rest)?;
    let (rest, maximum_present_static_draught) = uint(8)(rest)?;
    let (rest, destination) = text(120)(rest)?;
    let (rest, dte) = uint(1)(rest)?;
    let (rest, spare) = uint(1)(rest)?;

    Ok((
        rest,
        StaticVoyage {
            message_id: message_id as u8,
            repeat_indicator: repeat_indicator as u8,
            mmsi: mmsi as u32,
            ais_version: ais_version as u8,
            imo_number: imo_number as u32,
            call_sign,
            name,
            type_of_ship_and_cargo_type: type_of_ship_and_cargo_type as u8,
            dimension_a: dimension_a as u16,
            dimension_b: dimension_b as u16,
            dimension_c: dimension_c as u8,
            dimension_d: dimension_d as u8,
            type_of_epf_device: type_of_epf_device as u8,
            eta_minute: eta_minute as u8,
            eta_hour: eta_hour as u8,
            eta_day: eta_day as u8,
            eta_month: eta_month as u8,
            maximum_present_static_draught: maximum_present_static_draught as u8,
            destination,
            dte: dte as u8,
            spare: spare as u8,
        },
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    fn sotdma(slot_timeout: u8, sub_message: SubMessage) -> CommState {
        CommState::Sotdma(SotdmaState {
            sync_state: 0,
            slot_timeout,
            sub_message,
        })
    }

    #[test]
    fn type1_frame_has_the_documented_layout() {
        let boat = BoatData::default();
        let comm = sotdma(3, SubMessage::ReceivedStations(42));
        let frame = build_frame(1, &boat, Some(&comm)).unwrap();
        // 40-bit preamble, 168-bit payload, 16-bit CRC, 8-bit end flag,
        // 23 buffer bits
        assert_eq!(frame.len(), 255);
        assert_eq!(&frame[..8], RAMP_UP_BITS);
        assert_eq!(&frame[8..32], SYNC_SEQUENCE);
        assert_eq!(&frame[32..40], START_FLAG);
        assert_eq!(&frame[40..46], "000001");
        assert_eq!(&frame[224..232], END_FLAG);
        assert_eq!(frame_message_type(&frame), Ok(1));
    }

    #[test]
    fn type5_frame_has_the_documented_layout() {
        let boat = BoatData::default();
        let frame = build_frame(5, &boat, None).unwrap();
        assert_eq!(frame.len(), 511);
        assert_eq!(&frame[40..46], "000101");
        assert_eq!(frame_message_type(&frame), Ok(5));
    }

    #[test]
    fn type1_roundtrip() {
        let boat = BoatData {
            mmsi: 227006760,
            navigational_status: 0,
            latitude: 0,
            longitude: 0,
            course_over_ground: 0,
            speed_over_ground: 0,
            true_heading: 511,
            time_stamp: 0,
            ..BoatData::default()
        };
        let comm = sotdma(3, SubMessage::ReceivedStations(42));
        let frame = build_frame(1, &boat, Some(&comm)).unwrap();
        let parsed = parse_frame(&frame).unwrap();
        let AisMessage::Position(report) = parsed else {
            panic!("expected a position report");
        };
        assert_eq!(report.message_id, 1);
        assert_eq!(report.mmsi, 227006760);
        assert_eq!(report.true_heading, 511);
        assert_eq!(
            report.comm_state,
            sotdma(3, SubMessage::ReceivedStations(42))
        );
    }

    #[test]
    fn type3_roundtrip() {
        let boat = BoatData::default();
        let comm = CommState::Itdma(ItdmaState {
            sync_state: 0,
            slot_increment: 10,
            number_of_slots: 1,
            keep_flag: true,
        });
        let frame = build_frame(3, &boat, Some(&comm)).unwrap();
        let AisMessage::Position(report) = parse_frame(&frame).unwrap() else {
            panic!("expected a position report");
        };
        assert_eq!(report.message_id, 3);
        assert_eq!(report.comm_state, comm);
    }

    #[test]
    fn type5_roundtrip() {
        let boat = BoatData {
            mmsi: 227006760,
            imo_number: 9074729,
            call_sign: "fnzzz12".to_owned(),
            name: "lehavre".to_owned(),
            destination: "marseille".to_owned(),
            maximum_present_static_draught: 98,
            ..BoatData::default()
        };
        let frame = build_frame(5, &boat, None).unwrap();
        let AisMessage::StaticVoyage(report) = parse_frame(&frame).unwrap() else {
            panic!("expected a static report");
        };
        assert_eq!(report.mmsi, 227006760);
        assert_eq!(report.imo_number, 9074729);
        assert_eq!(report.call_sign, "fnzzz12");
        assert_eq!(report.name, "lehavre");
        assert_eq!(report.destination, "marseille");
        assert_eq!(report.maximum_present_static_draught, 98);
        assert_eq!(report.dte, 1);
    }

    #[test]
    fn slot_offset_submessage_roundtrip() {
        let boat = BoatData::default();
        let comm = sotdma(0, SubMessage::SlotOffset(1234));
        let frame = build_frame(1, &boat, Some(&comm)).unwrap();
        let AisMessage::Position(report) = parse_frame(&frame).unwrap() else {
            panic!("expected a position report");
        };
        assert_eq!(report.comm_state, comm);
    }

    #[test]
    fn utc_submessage_roundtrip() {
        let boat = BoatData::default();
        let comm = sotdma(
            1,
            SubMessage::UtcHourMinute {
                hour: 23,
                minute: 59,
            },
        );
        let frame = build_frame(1, &boat, Some(&comm)).unwrap();
        let AisMessage::Position(report) = parse_frame(&frame).unwrap() else {
            panic!("expected a position report");
        };
        assert_eq!(report.comm_state, comm);
    }

    #[test]
    fn slot_number_submessage_roundtrip() {
        let boat = BoatData::default();
        let comm = sotdma(4, SubMessage::SlotNumber(4321));
        let frame = build_frame(2, &boat, Some(&comm)).unwrap();
        let AisMessage::Position(report) = parse_frame(&frame).unwrap() else {
            panic!("expected a position report");
        };
        assert_eq!(report.message_id, 2);
        assert_eq!(report.comm_state, comm);
    }

    #[test]
    fn corrupted_frame_is_rejected() {
        let boat = BoatData::default();
        let comm = sotdma(3, SubMessage::ReceivedStations(0));
        let frame = build_frame(1, &boat, Some(&comm)).unwrap();
        let mut damaged: Vec<u8> = frame.bytes().collect();
        damaged[100] ^= 1;
        let damaged = String::from_utf8(damaged).unwrap();
        assert_eq!(parse_frame(&damaged), Err(MessageError::Corrupted));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let boat = BoatData::default();
        // type 4 is a real AIS message but not one this station carries
        let frame = build_frame(4, &boat, None).unwrap();
        assert_eq!(parse_frame(&frame), Err(MessageError::UnknownType(4)));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert_eq!(parse_frame("0101"), Err(MessageError::Corrupted));
        let boat = BoatData::default();
        let comm = sotdma(3, SubMessage::ReceivedStations(0));
        let frame = build_frame(1, &boat, Some(&comm)).unwrap();
        assert_eq!(parse_frame(&frame[..200]), Err(MessageError::Corrupted));
    }

    #[test]
    fn value_too_wide_fails_the_build() {
        let boat = BoatData {
            true_heading: 512, // 9-bit field
            ..BoatData::default()
        };
        let comm = sotdma(3, SubMessage::ReceivedStations(0));
        assert!(matches!(
            build_frame(1, &boat, Some(&comm)),
            Err(EncodeError::ValueTooWide { value: 512, .. })
        ));
    }
}
