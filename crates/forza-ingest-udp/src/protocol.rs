//! Length-based protocol detection and record decoding for Forza "Data Out".
//!
//! | Variant          | Datagram length | Layout                                  |
//! |------------------|-----------------|-----------------------------------------|
//! | `Sled`           | 232             | Sled                                    |
//! | `CarDash`        | 311             | Sled, CarDash                           |
//! | `HorizonCarDash` | 324             | Sled, 12 unknown, CarDash, 1 unknown    |
//!
//! All fields are little-endian and packed.

use forza_ingest_core::{DecodeError, TelemetryDecoder};
use model::{
    CarDashData, ProtocolVariant, SledData, TelemetrySample, CAR_DASH_SIZE, HORIZON_CAR_DASH_SIZE,
    HORIZON_PADDING_SIZE,
};
use tracing::{debug, trace};

use crate::codec::{FieldReader, FieldWriter};

const _: () = assert!(HORIZON_PADDING_SIZE + CAR_DASH_SIZE <= HORIZON_CAR_DASH_SIZE);

/// Checked in this order; the first variant whose length matches wins.
const DETECTION_ORDER: [ProtocolVariant; 3] =
    [ProtocolVariant::Sled, ProtocolVariant::CarDash, ProtocolVariant::HorizonCarDash];

pub fn detect(len: usize) -> ProtocolVariant {
    DETECTION_ORDER
        .into_iter()
        .find(|v| v.expected_len() == Some(len))
        .unwrap_or(ProtocolVariant::Unknown)
}

// Lists a record's fields once, in wire order, and derives both directions
// from that list.
macro_rules! wire_record {
    ($record:ident, $decode:ident, $encode:ident { $($field:ident: $ty:ident),+ $(,)? }) => {
        pub fn $decode(r: &mut FieldReader<'_>) -> Result<$record, DecodeError> {
            Ok($record {
                $($field: r.$ty(stringify!($field))?,)+
            })
        }

        pub fn $encode(w: &mut FieldWriter, rec: &$record) {
            $(w.$ty(rec.$field);)+
        }
    };
}

wire_record!(SledData, decode_sled, encode_sled {
    is_race_on: i32,
    timestamp_ms: u32,
    engine_max_rpm: f32,
    engine_idle_rpm: f32,
    current_engine_rpm: f32,
    acceleration_x: f32,
    acceleration_y: f32,
    acceleration_z: f32,
    velocity_x: f32,
    velocity_y: f32,
    velocity_z: f32,
    angular_velocity_x: f32,
    angular_velocity_y: f32,
    angular_velocity_z: f32,
    yaw: f32,
    pitch: f32,
    roll: f32,
    normalized_suspension_travel_front_left: f32,
    normalized_suspension_travel_front_right: f32,
    normalized_suspension_travel_rear_left: f32,
    normalized_suspension_travel_rear_right: f32,
    tire_slip_ratio_front_left: f32,
    tire_slip_ratio_front_right: f32,
    tire_slip_ratio_rear_left: f32,
    tire_slip_ratio_rear_right: f32,
    wheel_rotation_speed_front_left: f32,
    wheel_rotation_speed_front_right: f32,
    wheel_rotation_speed_rear_left: f32,
    wheel_rotation_speed_rear_right: f32,
    wheel_on_rumble_strip_front_left: i32,
    wheel_on_rumble_strip_front_right: i32,
    wheel_on_rumble_strip_rear_left: i32,
    wheel_on_rumble_strip_rear_right: i32,
    wheel_in_puddle_depth_front_left: f32,
    wheel_in_puddle_depth_front_right: f32,
    wheel_in_puddle_depth_rear_left: f32,
    wheel_in_puddle_depth_rear_right: f32,
    surface_rumble_front_left: f32,
    surface_rumble_front_right: f32,
    surface_rumble_rear_left: f32,
    surface_rumble_rear_right: f32,
    tire_slip_angle_front_left: f32,
    tire_slip_angle_front_right: f32,
    tire_slip_angle_rear_left: f32,
    tire_slip_angle_rear_right: f32,
    tire_combined_slip_front_left: f32,
    tire_combined_slip_front_right: f32,
    tire_combined_slip_rear_left: f32,
    tire_combined_slip_rear_right: f32,
    suspension_travel_meters_front_left: f32,
    suspension_travel_meters_front_right: f32,
    suspension_travel_meters_rear_left: f32,
    suspension_travel_meters_rear_right: f32,
    car_ordinal: i32,
    car_class: i32,
    car_performance_index: i32,
    drivetrain_type: i32,
    num_cylinders: i32,
});

wire_record!(CarDashData, decode_car_dash, encode_car_dash {
    position_x: f32,
    position_y: f32,
    position_z: f32,
    speed: f32,
    power: f32,
    torque: f32,
    tire_temp_front_left: f32,
    tire_temp_front_right: f32,
    tire_temp_rear_left: f32,
    tire_temp_rear_right: f32,
    boost: f32,
    fuel: f32,
    distance_traveled: f32,
    best_lap: f32,
    last_lap: f32,
    current_lap: f32,
    current_race_time: f32,
    lap_number: u16,
    race_position: u8,
    accel: u8,
    brake: u8,
    clutch: u8,
    hand_brake: u8,
    gear: u8,
    steer: i8,
    normalized_driving_line: i8,
    normalized_ai_brake_difference: i8,
});

pub fn skip_padding(r: &mut FieldReader<'_>, n: usize) -> Result<(), DecodeError> {
    r.skip("horizon padding", n)
}

/// Detects the variant from `datagram.len()` and decodes it.
///
/// Unknown lengths produce a sample with no records. Bytes after the
/// dashboard fields of a Horizon datagram are left unread.
pub fn convert(datagram: &[u8]) -> Result<TelemetrySample, DecodeError> {
    let protocol = detect(datagram.len());
    let mut r = FieldReader::new(datagram);
    match protocol {
        ProtocolVariant::Unknown => {
            debug!(len = datagram.len(), "datagram length matches no known protocol");
            Ok(TelemetrySample::unknown())
        }
        ProtocolVariant::Sled => {
            let sled = decode_sled(&mut r)?;
            Ok(TelemetrySample::decoded(protocol, sled, None))
        }
        ProtocolVariant::CarDash => {
            let sled = decode_sled(&mut r)?;
            let dash = decode_car_dash(&mut r)?;
            Ok(TelemetrySample::decoded(protocol, sled, Some(dash)))
        }
        ProtocolVariant::HorizonCarDash => {
            let sled = decode_sled(&mut r)?;
            skip_padding(&mut r, HORIZON_PADDING_SIZE)?;
            let dash = decode_car_dash(&mut r)?;
            trace!(trailing = r.remaining(), "ignoring unknown horizon trailer");
            Ok(TelemetrySample::decoded(protocol, sled, Some(dash)))
        }
    }
}

/// Inverse of [`convert`] for the known variants. Horizon padding and
/// trailer are written as `fill`. Returns `None` for unknown samples or when
/// a record the variant needs is missing.
pub fn encode_datagram(sample: &TelemetrySample, fill: u8) -> Option<Vec<u8>> {
    let len = sample.protocol.expected_len()?;
    let sled = sample.sled.as_ref()?;
    let mut w = FieldWriter::with_capacity(len);
    encode_sled(&mut w, sled);
    match sample.protocol {
        ProtocolVariant::Sled | ProtocolVariant::Unknown => {}
        ProtocolVariant::CarDash => encode_car_dash(&mut w, sample.car_dash.as_ref()?),
        ProtocolVariant::HorizonCarDash => {
            w.fill(fill, HORIZON_PADDING_SIZE);
            encode_car_dash(&mut w, sample.car_dash.as_ref()?);
            let trailer = len - w.len();
            w.fill(fill, trailer);
        }
    }
    Some(w.into_inner())
}

/// The stock decoder for Forza Motorsport 7 and Forza Horizon 4 datagrams.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForzaDecoder;

impl TelemetryDecoder for ForzaDecoder {
    fn convert(&self, datagram: &[u8]) -> Result<TelemetrySample, DecodeError> {
        convert(datagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::SLED_SIZE;
    use proptest::prelude::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    // Distinct value per field so a shifted offset shows up as a wrong field.
    fn sentinel_sled() -> SledData {
        let mut w = FieldWriter::default();
        w.i32(1).u32(1_000_002);
        for i in 0..15 {
            w.f32(100.0 + i as f32);
        }
        for i in 0..12 {
            w.f32(200.0 + i as f32);
        }
        for i in 0..4 {
            w.i32(300 + i);
        }
        for i in 0..20 {
            w.f32(400.0 + i as f32);
        }
        w.i32(2_345).i32(7).i32(999).i32(2).i32(12);
        let bytes = w.into_inner();
        let mut r = FieldReader::new(&bytes);
        decode_sled(&mut r).expect("sentinel sled decodes")
    }

    fn sentinel_dash() -> CarDashData {
        let mut w = FieldWriter::default();
        for i in 0..17 {
            w.f32(500.0 + i as f32);
        }
        w.u16(0xA1B2).u8(3).u8(250).u8(128).u8(64).u8(255).u8(5).i8(-127).i8(-5).i8(42);
        let bytes = w.into_inner();
        let mut r = FieldReader::new(&bytes);
        decode_car_dash(&mut r).expect("sentinel dash decodes")
    }

    #[test]
    fn detect_known_lengths() {
        assert_eq!(detect(232), ProtocolVariant::Sled);
        assert_eq!(detect(311), ProtocolVariant::CarDash);
        assert_eq!(detect(324), ProtocolVariant::HorizonCarDash);
        assert_eq!(detect(0), ProtocolVariant::Unknown);
        assert_eq!(detect(SLED_SIZE - 1), ProtocolVariant::Unknown);
        assert_eq!(detect(SLED_SIZE + 1), ProtocolVariant::Unknown);
    }

    #[test]
    fn records_consume_exactly_their_size() -> TestResult {
        let bytes = vec![0u8; SLED_SIZE + CAR_DASH_SIZE];
        let mut r = FieldReader::new(&bytes);
        decode_sled(&mut r)?;
        assert_eq!(r.position(), SLED_SIZE);
        decode_car_dash(&mut r)?;
        assert_eq!(r.position(), SLED_SIZE + CAR_DASH_SIZE);
        assert_eq!(r.remaining(), 0);
        Ok(())
    }

    #[test]
    fn sled_round_trip_every_field() -> TestResult {
        let sled = sentinel_sled();
        let mut w = FieldWriter::default();
        encode_sled(&mut w, &sled);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), SLED_SIZE);

        let sample = convert(&bytes)?;
        assert_eq!(sample.protocol, ProtocolVariant::Sled);
        assert_eq!(sample.sled, Some(sled));
        assert!(sample.car_dash.is_none());
        Ok(())
    }

    #[test]
    fn sled_sentinels_land_on_named_fields() {
        let sled = sentinel_sled();
        assert_eq!(sled.is_race_on, 1);
        assert_eq!(sled.timestamp_ms, 1_000_002);
        assert_eq!(sled.engine_max_rpm, 100.0);
        assert_eq!(sled.current_engine_rpm, 102.0);
        assert_eq!(sled.roll, 114.0);
        assert_eq!(sled.normalized_suspension_travel_front_left, 200.0);
        assert_eq!(sled.wheel_rotation_speed_rear_right, 211.0);
        assert_eq!(sled.wheel_on_rumble_strip_front_left, 300);
        assert_eq!(sled.wheel_on_rumble_strip_rear_right, 303);
        assert_eq!(sled.wheel_in_puddle_depth_front_left, 400.0);
        assert_eq!(sled.suspension_travel_meters_rear_right, 419.0);
        assert_eq!(sled.car_ordinal, 2_345);
        assert_eq!(sled.car_class, 7);
        assert_eq!(sled.car_performance_index, 999);
        assert_eq!(sled.drivetrain_type, 2);
        assert_eq!(sled.num_cylinders, 12);
    }

    #[test]
    fn timestamp_and_race_flag_boundaries() -> TestResult {
        for (race_on, ts) in [(0, 0u32), (1, 0), (0, u32::MAX), (1, u32::MAX)] {
            let sled = SledData { is_race_on: race_on, timestamp_ms: ts, ..Default::default() };
            let sample = TelemetrySample::decoded(ProtocolVariant::Sled, sled, None);
            let bytes = encode_datagram(&sample, 0).ok_or("encode failed")?;
            let decoded = convert(&bytes)?.sled.ok_or("no sled")?;
            assert_eq!(decoded.is_race_on, race_on);
            assert_eq!(decoded.timestamp_ms, ts);
        }
        Ok(())
    }

    #[test]
    fn out_of_range_values_pass_through() -> TestResult {
        let sled = SledData { car_class: 42, car_performance_index: -1, drivetrain_type: 9, ..Default::default() };
        let sample = TelemetrySample::decoded(ProtocolVariant::Sled, sled, None);
        let bytes = encode_datagram(&sample, 0).ok_or("encode failed")?;
        let decoded = convert(&bytes)?.sled.ok_or("no sled")?;
        assert_eq!(decoded.car_class, 42);
        assert_eq!(decoded.car_performance_index, -1);
        assert_eq!(decoded.drivetrain_type, 9);
        Ok(())
    }

    #[test]
    fn car_dash_sentinels_decode_exactly() -> TestResult {
        let sled = sentinel_sled();
        let dash = sentinel_dash();
        let mut w = FieldWriter::default();
        encode_sled(&mut w, &sled);
        encode_car_dash(&mut w, &dash);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), SLED_SIZE + CAR_DASH_SIZE);

        let sample = convert(&bytes)?;
        assert_eq!(sample.protocol, ProtocolVariant::CarDash);
        assert_eq!(sample.sled, Some(sled));
        let got = sample.car_dash.ok_or("dash missing")?;
        assert_eq!(got, dash);
        assert_eq!(got.position_x, 500.0);
        assert_eq!(got.current_race_time, 516.0);
        assert_eq!(got.lap_number, 0xA1B2);
        assert_eq!(got.race_position, 3);
        assert_eq!(got.accel, 250);
        assert_eq!(got.brake, 128);
        assert_eq!(got.clutch, 64);
        assert_eq!(got.hand_brake, 255);
        assert_eq!(got.gear, 5);
        assert_eq!(got.steer, -127);
        assert_eq!(got.normalized_driving_line, -5);
        assert_eq!(got.normalized_ai_brake_difference, 42);
        Ok(())
    }

    #[test]
    fn horizon_gap_bytes_never_leak_into_fields() -> TestResult {
        let sled = sentinel_sled();
        let dash = sentinel_dash();
        let sample = TelemetrySample::decoded(ProtocolVariant::HorizonCarDash, sled, Some(dash));
        for fill in [0x00, 0xFF, 0x7F, 0xA5] {
            let bytes = encode_datagram(&sample, fill).ok_or("encode failed")?;
            assert_eq!(bytes.len(), SLED_SIZE + HORIZON_CAR_DASH_SIZE);
            let decoded = convert(&bytes)?;
            assert_eq!(decoded, sample);
        }
        Ok(())
    }

    #[test]
    fn unknown_length_yields_empty_sample() -> TestResult {
        let sample = convert(&[0u8; SLED_SIZE - 1])?;
        assert_eq!(sample, TelemetrySample::unknown());
        let sample = convert(&[])?;
        assert!(sample.is_unknown());
        Ok(())
    }

    #[test]
    fn encode_rejects_unknown_and_missing_dash() {
        assert!(encode_datagram(&TelemetrySample::unknown(), 0).is_none());
        let missing = TelemetrySample {
            protocol: ProtocolVariant::CarDash,
            sled: Some(SledData::default()),
            car_dash: None,
        };
        assert!(encode_datagram(&missing, 0).is_none());
    }

    #[test]
    fn truncated_sled_is_an_error_not_zero_fill() {
        let bytes = [0u8; 100];
        let mut r = FieldReader::new(&bytes);
        let err = decode_sled(&mut r).unwrap_err();
        let DecodeError::TruncatedInput { field, offset, .. } = err;
        assert_eq!(offset, 100);
        assert_eq!(field, "wheel_rotation_speed_front_left");
    }

    #[test]
    fn decoder_trait_matches_free_function() -> TestResult {
        let bytes = vec![0u8; SLED_SIZE];
        assert_eq!(ForzaDecoder.convert(&bytes)?, convert(&bytes)?);
        Ok(())
    }

    proptest! {
        #[test]
        fn detect_depends_only_on_length(len in 0usize..2048) {
            let v = detect(len);
            prop_assert_eq!(v, detect(len));
            prop_assert!(v.expected_len().map_or(true, |l| l == len));
        }

        #[test]
        fn convert_never_fails_on_arbitrary_bytes(
            data in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let sample = convert(&data);
            prop_assert!(sample.is_ok());
            let sample = sample.unwrap();
            prop_assert_eq!(sample.protocol, detect(data.len()));
            prop_assert_eq!(sample.car_dash.is_some(), sample.protocol.has_car_dash());
            prop_assert_eq!(sample.sled.is_some(), !sample.is_unknown());
        }
    }
}
