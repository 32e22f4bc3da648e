//! Forza "Data Out" records and the decoded sample handed to listeners.
//!
//! Field order in [`SledData`] and [`CarDashData`] is the wire order. The
//! structs themselves carry no layout attributes; the byte layout lives in the
//! codec and is kept in lockstep with the size constants below.

use serde::{Deserialize, Serialize};

// Field counts per width. Sizes are derived from these so the detector and the
// decoder agree on one set of numbers.
const SLED_I32_FIELDS: usize = 1 + 4 + 5; // IsRaceOn, rumble strips, car identity
const SLED_U32_FIELDS: usize = 1; // TimestampMS
const SLED_F32_FIELDS: usize = 3 + 3 + 3 + 3 + 3 + 8 * 4;

const DASH_F32_FIELDS: usize = 17;
const DASH_U16_FIELDS: usize = 1; // LapNumber
const DASH_U8_FIELDS: usize = 1 + 5; // RacePosition, pedals and gear
const DASH_I8_FIELDS: usize = 3; // Steer, driving line, AI brake difference

/// Bytes in the base ("Sled") record.
pub const SLED_SIZE: usize = 4 * (SLED_I32_FIELDS + SLED_U32_FIELDS + SLED_F32_FIELDS);

/// Bytes in the dashboard ("CarDash") record.
pub const CAR_DASH_SIZE: usize =
    4 * DASH_F32_FIELDS + 2 * DASH_U16_FIELDS + DASH_U8_FIELDS + DASH_I8_FIELDS;

/// Payload after the Sled in Forza Horizon datagrams. Upstream never documented
/// it; it is the observed difference between Horizon and Motorsport packets.
pub const HORIZON_CAR_DASH_SIZE: usize = 92;

/// Unknown bytes between the Sled and the dashboard fields in Horizon datagrams.
pub const HORIZON_PADDING_SIZE: usize = 12;

/// Wire layout of a datagram, picked by its total length alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVariant {
    /// Sled only (FM7 "V1").
    Sled,
    /// Sled followed directly by CarDash (FM7 "V2").
    CarDash,
    /// Sled, 12 unknown bytes, CarDash, then unknown trailing bytes (FH4).
    HorizonCarDash,
    /// Length matched none of the above.
    Unknown,
}

impl ProtocolVariant {
    /// Datagram length this variant is recognised by.
    pub const fn expected_len(self) -> Option<usize> {
        match self {
            ProtocolVariant::Sled => Some(SLED_SIZE),
            ProtocolVariant::CarDash => Some(SLED_SIZE + CAR_DASH_SIZE),
            ProtocolVariant::HorizonCarDash => Some(SLED_SIZE + HORIZON_CAR_DASH_SIZE),
            ProtocolVariant::Unknown => None,
        }
    }

    pub const fn has_car_dash(self) -> bool {
        matches!(self, ProtocolVariant::CarDash | ProtocolVariant::HorizonCarDash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SledData {
    // 1 when the race is on, 0 in menus or when stopped
    pub is_race_on: i32,
    // wraps to 0 eventually
    pub timestamp_ms: u32,

    pub engine_max_rpm: f32,
    pub engine_idle_rpm: f32,
    pub current_engine_rpm: f32,

    // car-local space: X right, Y up, Z forward
    pub acceleration_x: f32,
    pub acceleration_y: f32,
    pub acceleration_z: f32,

    pub velocity_x: f32,
    pub velocity_y: f32,
    pub velocity_z: f32,

    // X pitch, Y yaw, Z roll
    pub angular_velocity_x: f32,
    pub angular_velocity_y: f32,
    pub angular_velocity_z: f32,

    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,

    // 0.0 max stretch, 1.0 max compression
    pub normalized_suspension_travel_front_left: f32,
    pub normalized_suspension_travel_front_right: f32,
    pub normalized_suspension_travel_rear_left: f32,
    pub normalized_suspension_travel_rear_right: f32,

    // 0 is full grip, |ratio| > 1.0 is loss of grip
    pub tire_slip_ratio_front_left: f32,
    pub tire_slip_ratio_front_right: f32,
    pub tire_slip_ratio_rear_left: f32,
    pub tire_slip_ratio_rear_right: f32,

    // rad/s
    pub wheel_rotation_speed_front_left: f32,
    pub wheel_rotation_speed_front_right: f32,
    pub wheel_rotation_speed_rear_left: f32,
    pub wheel_rotation_speed_rear_right: f32,

    pub wheel_on_rumble_strip_front_left: i32,
    pub wheel_on_rumble_strip_front_right: i32,
    pub wheel_on_rumble_strip_rear_left: i32,
    pub wheel_on_rumble_strip_rear_right: i32,

    // 0..1, 1 is the deepest puddle
    pub wheel_in_puddle_depth_front_left: f32,
    pub wheel_in_puddle_depth_front_right: f32,
    pub wheel_in_puddle_depth_rear_left: f32,
    pub wheel_in_puddle_depth_rear_right: f32,

    // force feedback rumble, non-dimensional
    pub surface_rumble_front_left: f32,
    pub surface_rumble_front_right: f32,
    pub surface_rumble_rear_left: f32,
    pub surface_rumble_rear_right: f32,

    pub tire_slip_angle_front_left: f32,
    pub tire_slip_angle_front_right: f32,
    pub tire_slip_angle_rear_left: f32,
    pub tire_slip_angle_rear_right: f32,

    pub tire_combined_slip_front_left: f32,
    pub tire_combined_slip_front_right: f32,
    pub tire_combined_slip_rear_left: f32,
    pub tire_combined_slip_rear_right: f32,

    // meters
    pub suspension_travel_meters_front_left: f32,
    pub suspension_travel_meters_front_right: f32,
    pub suspension_travel_meters_rear_left: f32,
    pub suspension_travel_meters_rear_right: f32,

    pub car_ordinal: i32,
    // 0 (D) ..= 7 (X), not validated
    pub car_class: i32,
    // 100 ..= 999, not validated
    pub car_performance_index: i32,
    // 0 FWD, 1 RWD, 2 AWD
    pub drivetrain_type: i32,
    pub num_cylinders: i32,
}

impl SledData {
    pub fn is_race_on(&self) -> bool {
        self.is_race_on == 1
    }

    /// Current rpm as a fraction of max rpm. Zero while the race is off or
    /// when the game reports no max rpm.
    pub fn rpm_fraction(&self) -> f32 {
        if !self.is_race_on() || self.engine_max_rpm <= 0.0 {
            return 0.0;
        }
        self.current_engine_rpm / self.engine_max_rpm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CarDashData {
    // world position, meters
    pub position_x: f32,
    pub position_y: f32,
    pub position_z: f32,

    pub speed: f32,  // m/s
    pub power: f32,  // watts
    pub torque: f32, // newton meter

    pub tire_temp_front_left: f32,
    pub tire_temp_front_right: f32,
    pub tire_temp_rear_left: f32,
    pub tire_temp_rear_right: f32,

    pub boost: f32,
    pub fuel: f32,
    pub distance_traveled: f32,
    pub best_lap: f32,
    pub last_lap: f32,
    pub current_lap: f32,
    pub current_race_time: f32,

    pub lap_number: u16,
    pub race_position: u8,

    pub accel: u8,
    pub brake: u8,
    pub clutch: u8,
    pub hand_brake: u8,
    pub gear: u8,
    pub steer: i8,

    pub normalized_driving_line: i8,
    pub normalized_ai_brake_difference: i8,
}

impl CarDashData {
    pub fn gear(&self) -> u8 {
        self.gear
    }
}

/// One decoded datagram.
///
/// `sled` is present for every known variant, `car_dash` only for variants
/// that carry a dashboard. Build through [`TelemetrySample::unknown`] or
/// [`TelemetrySample::decoded`] to keep that true.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub protocol: ProtocolVariant,
    pub sled: Option<SledData>,
    pub car_dash: Option<CarDashData>,
}

impl TelemetrySample {
    pub fn unknown() -> Self {
        Self { protocol: ProtocolVariant::Unknown, sled: None, car_dash: None }
    }

    /// Panics in debug builds if `car_dash` presence disagrees with `protocol`.
    pub fn decoded(protocol: ProtocolVariant, sled: SledData, car_dash: Option<CarDashData>) -> Self {
        debug_assert!(protocol != ProtocolVariant::Unknown);
        debug_assert_eq!(protocol.has_car_dash(), car_dash.is_some());
        Self { protocol, sled: Some(sled), car_dash }
    }

    pub fn is_unknown(&self) -> bool {
        self.protocol == ProtocolVariant::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_match_forza_data_out() {
        assert_eq!(SLED_SIZE, 232);
        assert_eq!(CAR_DASH_SIZE, 79);
        assert_eq!(ProtocolVariant::CarDash.expected_len(), Some(311));
        assert_eq!(ProtocolVariant::HorizonCarDash.expected_len(), Some(324));
        assert_eq!(ProtocolVariant::Unknown.expected_len(), None);
    }

    #[test]
    fn horizon_payload_covers_padding_and_dash() {
        assert!(HORIZON_PADDING_SIZE + CAR_DASH_SIZE <= HORIZON_CAR_DASH_SIZE);
    }

    #[test]
    fn rpm_fraction_is_zero_when_race_off() {
        let sled = SledData {
            is_race_on: 0,
            engine_max_rpm: 7000.0,
            current_engine_rpm: 6500.0,
            ..Default::default()
        };
        assert_eq!(sled.rpm_fraction(), 0.0);
    }

    #[test]
    fn rpm_fraction_guards_zero_max() {
        let sled = SledData { is_race_on: 1, current_engine_rpm: 900.0, ..Default::default() };
        assert_eq!(sled.rpm_fraction(), 0.0);
    }

    #[test]
    fn rpm_fraction_when_racing() {
        let sled = SledData {
            is_race_on: 1,
            engine_max_rpm: 8000.0,
            current_engine_rpm: 6000.0,
            ..Default::default()
        };
        assert!((sled.rpm_fraction() - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_sample_has_no_records() {
        let s = TelemetrySample::unknown();
        assert!(s.is_unknown());
        assert!(s.sled.is_none());
        assert!(s.car_dash.is_none());
    }

    #[test]
    fn sample_serializes_with_protocol_tag() {
        let s = TelemetrySample::decoded(ProtocolVariant::Sled, SledData::default(), None);
        let v = serde_json::to_value(s).unwrap();
        assert_eq!(v["protocol"], "Sled");
        assert!(v["car_dash"].is_null());
    }
}
