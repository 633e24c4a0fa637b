//! The vessel whose presence the station announces.
//!
//! [`BoatData`] is the typed source of every field the message builder
//! serialises. Fields are addressed through the [`Field`] enumeration so
//! the payload layout tables in the message codec stay declarative.

use crate::protocol::messages::{PositionReport, StaticVoyage};

/// Identity, voyage and dynamic state of one vessel.
///
/// Dynamic fields use the on-air units: position in 1/10000 minute of
/// arc, speed in 1/10 knot, course in 1/10 degree, rate of turn in the
/// encoded sensor form.
#[derive(Debug, Clone, PartialEq)]
pub struct BoatData {
    pub mmsi: u32,
    pub imo_number: u32,
    pub call_sign: String,
    pub name: String,
    pub type_of_ship_and_cargo_type: u8,
    pub position_accuracy: u8,
    pub ais_version: u8,
    pub type_of_epf_device: u8,
    pub dimension_a: u16,
    pub dimension_b: u16,
    pub dimension_c: u8,
    pub dimension_d: u8,
    pub destination: String,
    pub navigational_status: u8,
    pub time_stamp: u8,
    pub eta_month: u8,
    pub eta_day: u8,
    pub eta_hour: u8,
    pub eta_minute: u8,
    pub maximum_present_static_draught: u8,
    pub dte: u8,
    pub spare: u8,
    pub special_maneuvre_indicator: u8,
    pub raim_flag: u8,
    /// 0..54_000_000, 1/10000 minute of arc.
    pub latitude: u32,
    /// 0..108_000_000, 1/10000 minute of arc.
    pub longitude: u32,
    /// 0..3599, 1/10 degree.
    pub course_over_ground: u16,
    /// 0..1022, 1/10 knot.
    pub speed_over_ground: u16,
    /// Encoded rate of turn, `round(4.733 * sqrt(deg/min))`.
    pub rate_of_turn: i8,
    /// 0..359 degrees, 511 when not available.
    pub true_heading: u16,
}

impl Default for BoatData {
    fn default() -> BoatData {
        BoatData {
            mmsi: 123456789,
            imo_number: 0,
            call_sign: "default".to_owned(),
            name: "superbateau".to_owned(),
            type_of_ship_and_cargo_type: 255,
            position_accuracy: 0,
            ais_version: 0,
            type_of_epf_device: 3,
            dimension_a: 0,
            dimension_b: 0,
            dimension_c: 0,
            dimension_d: 0,
            destination: "default".to_owned(),
            navigational_status: 0,
            time_stamp: 0,
            eta_month: 12,
            eta_day: 31,
            eta_hour: 23,
            eta_minute: 59,
            maximum_present_static_draught: 255,
            dte: 1,
            spare: 0,
            special_maneuvre_indicator: 0,
            raim_flag: 1,
            latitude: 0,
            longitude: 0,
            course_over_ground: 0,
            speed_over_ground: 0,
            rate_of_turn: 0,
            true_heading: 0,
        }
    }
}

/// Identifier of one payload field, used by the layout tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Mmsi,
    ImoNumber,
    CallSign,
    Name,
    TypeOfShipAndCargoType,
    PositionAccuracy,
    AisVersion,
    TypeOfEpfDevice,
    DimensionA,
    DimensionB,
    DimensionC,
    DimensionD,
    Destination,
    NavigationalStatus,
    TimeStamp,
    EtaMonth,
    EtaDay,
    EtaHour,
    EtaMinute,
    MaximumPresentStaticDraught,
    Dte,
    Spare,
    SpecialManeuvreIndicator,
    RaimFlag,
    Latitude,
    Longitude,
    CourseOverGround,
    SpeedOverGround,
    RateOfTurn,
    TrueHeading,
}

/// A field value, either an unsigned integer or six-bit text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Uint(u64),
    Text(&'a str),
}

impl BoatData {
    /// Typed field accessor consumed by the message layout tables.
    pub fn field(&self, field: Field) -> FieldValue<'_> {
        use FieldValue::{Text, Uint};
        match field {
            Field::Mmsi => Uint(self.mmsi as u64),
            Field::ImoNumber => Uint(self.imo_number as u64),
            Field::CallSign => Text(&self.call_sign),
            Field::Name => Text(&self.name),
            Field::TypeOfShipAndCargoType => Uint(self.type_of_ship_and_cargo_type as u64),
            Field::PositionAccuracy => Uint(self.position_accuracy as u64),
            Field::AisVersion => Uint(self.ais_version as u64),
            Field::TypeOfEpfDevice => Uint(self.type_of_epf_device as u64),
            Field::DimensionA => Uint(self.dimension_a as u64),
            Field::DimensionB => Uint(self.dimension_b as u64),
            Field::DimensionC => Uint(self.dimension_c as u64),
            Field::DimensionD => Uint(self.dimension_d as u64),
            Field::Destination => Text(&self.destination),
            Field::NavigationalStatus => Uint(self.navigational_status as u64),
            Field::TimeStamp => Uint(self.time_stamp as u64),
            Field::EtaMonth => Uint(self.eta_month as u64),
            Field::EtaDay => Uint(self.eta_day as u64),
            Field::EtaHour => Uint(self.eta_hour as u64),
            Field::EtaMinute => Uint(self.eta_minute as u64),
            Field::MaximumPresentStaticDraught => {
                Uint(self.maximum_present_static_draught as u64)
            }
            Field::Dte => Uint(self.dte as u64),
            Field::Spare => Uint(self.spare as u64),
            Field::SpecialManeuvreIndicator => Uint(self.special_maneuvre_indicator as u64),
            Field::RaimFlag => Uint(self.raim_flag as u64),
            Field::Latitude => Uint(self.latitude as u64),
            Field::Longitude => Uint(self.longitude as u64),
            Field::CourseOverGround => Uint(self.course_over_ground as u64),
            Field::SpeedOverGround => Uint(self.speed_over_ground as u64),
            Field::RateOfTurn => Uint(self.rate_of_turn as u8 as u64),
            Field::TrueHeading => Uint(self.true_heading as u64),
        }
    }

    /// Fold a received position report into this snapshot.
    pub fn apply_position(&mut self, report: &PositionReport) {
        self.mmsi = report.mmsi;
        self.navigational_status = report.navigational_status;
        self.rate_of_turn = report.rate_of_turn as i8;
        self.speed_over_ground = report.speed_over_ground;
        self.position_accuracy = report.position_accuracy;
        self.longitude = report.longitude;
        self.latitude = report.latitude;
        self.course_over_ground = report.course_over_ground;
        self.true_heading = report.true_heading;
        self.time_stamp = report.time_stamp;
        self.special_maneuvre_indicator = report.special_maneuvre_indicator;
        self.spare = report.spare;
        self.raim_flag = report.raim_flag;
    }

    /// Fold a received static-and-voyage report into this snapshot.
    pub fn apply_static(&mut self, report: &StaticVoyage) {
        self.mmsi = report.mmsi;
        self.ais_version = report.ais_version;
        self.imo_number = report.imo_number;
        self.call_sign = report.call_sign.clone();
        self.name = report.name.clone();
        self.type_of_ship_and_cargo_type = report.type_of_ship_and_cargo_type;
        self.dimension_a = report.dimension_a;
        self.dimension_b = report.dimension_b;
        self.dimension_c = report.dimension_c;
        self.dimension_d = report.dimension_d;
        self.type_of_epf_device = report.type_of_epf_device;
        self.eta_minute = report.eta_minute;
        self.eta_hour = report.eta_hour;
        self.eta_day = report.eta_day;
        self.eta_month = report.eta_month;
        self.maximum_present_static_draught = report.maximum_present_static_draught;
        self.destination = report.destination.clone();
        self.dte = report.dte;
        self.spare = report.spare;
    }

    /// Dead-reckon the position forward by `elapsed` seconds from the
    /// current course, speed and rate of turn.
    pub fn advance_position(&mut self, elapsed: f64) {
        let turn = ais_to_rot_sensor(self.rate_of_turn) * elapsed / 60.0;
        let cog_deg = (self.course_over_ground as f64 / 10.0 + turn).rem_euclid(360.0);
        // 1/10 kt over ground to 1/10000 arc-minute per second
        let scale = self.speed_over_ground as f64 * (10.0 / 36.0);
        let northing = cog_deg.to_radians().cos() * scale;
        let easting = cog_deg.to_radians().sin() * scale;

        self.course_over_ground = (cog_deg * 10.0).round() as u16 % 3600;
        self.true_heading = self.course_over_ground / 10;
        self.latitude =
            ((self.latitude as f64 + elapsed * northing).rem_euclid(54_000_000.0)).round() as u32;
        self.longitude = ((self.longitude as f64 + elapsed * easting).rem_euclid(108_000_000.0))
            .round() as u32;
    }
}

/// Encode a sensor rate of turn (degrees per minute) for transmission.
pub fn rot_sensor_to_ais(deg_per_min: f64) -> i8 {
    (deg_per_min.signum() * 4.733 * deg_per_min.abs().sqrt()).round() as i8
}

/// Decode a transmitted rate of turn back to degrees per minute.
pub fn ais_to_rot_sensor(rot: i8) -> f64 {
    (rot as f64).signum() * (rot as f64 / 4.733).powi(2)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_fleet() {
        let boat = BoatData::default();
        assert_eq!(boat.mmsi, 123456789);
        assert_eq!(boat.name, "superbateau");
        assert_eq!(boat.type_of_epf_device, 3);
        assert_eq!(boat.eta_day, 31);
        assert_eq!(boat.dte, 1);
    }

    #[test]
    fn field_accessor_is_typed() {
        let boat = BoatData {
            speed_over_ground: 123,
            ..BoatData::default()
        };
        assert_eq!(
            boat.field(Field::SpeedOverGround),
            FieldValue::Uint(123)
        );
        assert_eq!(boat.field(Field::Name), FieldValue::Text("superbateau"));
    }

    #[test]
    fn negative_rot_encodes_as_twos_complement() {
        let boat = BoatData {
            rate_of_turn: -5,
            ..BoatData::default()
        };
        assert_eq!(boat.field(Field::RateOfTurn), FieldValue::Uint(0xfb));
    }

    #[test]
    fn rot_conversions_are_inverse_enough() {
        let encoded = rot_sensor_to_ais(10.0);
        assert_eq!(encoded, 15);
        assert!((ais_to_rot_sensor(encoded) - 10.0).abs() < 0.2);
        assert_eq!(rot_sensor_to_ais(-10.0), -15);
    }

    #[test]
    fn advance_position_holds_units() {
        let mut boat = BoatData {
            speed_over_ground: 100, // 10 kt
            course_over_ground: 0,  // due north
            ..BoatData::default()
        };
        boat.advance_position(36.0);
        // 10 kt due north for 36 s is 0.1 nm = 1000 units of latitude
        assert_eq!(boat.longitude, 0);
        assert!((boat.latitude as i64 - 1000).abs() <= 1);
    }
}
