use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Calibration,
    ParameterUnavailable,
    StageEntered,
    ModeRequested,
    ModeTimeout,
    OverrideApplied,
    OverridesCleared,
    AxisDone,
    AxisFailed,
    TeleopTick,
    Interrupted,
    Imu,
    Gps,
    Status,
}

/// One row of the control/telemetry archive. Flat so it maps 1:1 onto a CSV record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEvent {
    pub ts_unix_ms: i64,
    pub kind: EventKind,
    pub axis: Option<String>,
    pub stage: Option<String>,
    pub mode: Option<String>,
    // RC override state, None = released
    pub roll_pwm: Option<u16>,
    pub pitch_pwm: Option<u16>,
    pub throttle_pwm: Option<u16>,
    pub yaw_pwm: Option<u16>,
    pub value: Option<f64>,
    pub msg: String,
}

impl ControlEvent {
    pub fn new(kind: EventKind, msg: impl Into<String>) -> Self {
        Self {
            ts_unix_ms: now_unix_ms(),
            kind,
            axis: None,
            stage: None,
            mode: None,
            roll_pwm: None,
            pitch_pwm: None,
            throttle_pwm: None,
            yaw_pwm: None,
            value: None,
            msg: msg.into(),
        }
    }

    pub fn axis(mut self, axis: impl Into<String>) -> Self {
        self.axis = Some(axis.into());
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// RC1..RC4 as roll, pitch, throttle, yaw.
    pub fn pwm(mut self, rc: [Option<u16>; 4]) -> Self {
        self.roll_pwm = rc[0];
        self.pitch_pwm = rc[1];
        self.throttle_pwm = rc[2];
        self.yaw_pwm = rc[3];
        self
    }
}

fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Raw IMU sample as reported by RAW_IMU (autopilot units).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImuSample {
    pub xacc: i16,
    pub yacc: i16,
    pub zacc: i16,
    pub xgyro: i16,
    pub ygyro: i16,
    pub zgyro: i16,
    pub xmag: i16,
    pub ymag: i16,
    pub zmag: i16,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GpsSample {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub satellites: u8,
    pub fix_type: u8,
}

impl GpsSample {
    /// GPS_RAW_INT carries degE7 and millimetres.
    pub fn from_raw(lat_e7: i32, lon_e7: i32, alt_mm: i32, satellites: u8, fix_type: u8) -> Self {
        Self {
            lat: lat_e7 as f64 / 1e7,
            lon: lon_e7 as f64 / 1e7,
            alt_m: alt_mm as f64 / 1e3,
            satellites,
            fix_type,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Telemetry {
    Imu(ImuSample),
    Gps(GpsSample),
}

impl Telemetry {
    pub fn to_event(&self) -> ControlEvent {
        match self {
            Telemetry::Imu(s) => ControlEvent::new(
                EventKind::Imu,
                format!(
                    "acc=({},{},{}) gyro=({},{},{}) mag=({},{},{})",
                    s.xacc, s.yacc, s.zacc, s.xgyro, s.ygyro, s.zgyro, s.xmag, s.ymag, s.zmag
                ),
            ),
            Telemetry::Gps(g) => ControlEvent::new(
                EventKind::Gps,
                format!(
                    "lat={:.7} lon={:.7} alt={:.2}m sats={} fix={}",
                    g.lat, g.lon, g.alt_m, g.satellites, g.fix_type
                ),
            )
            .value(g.alt_m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gps_raw_units_convert_to_degrees_and_metres() {
        let g = GpsSample::from_raw(-353_613_540, 1_491_652_180, 584_090, 10, 3);
        assert!((g.lat - -35.361354).abs() < 1e-9);
        assert!((g.lon - 149.165218).abs() < 1e-9);
        assert!((g.alt_m - 584.09).abs() < 1e-9);
    }

    #[test]
    fn pwm_builder_maps_rc_order() {
        let ev = ControlEvent::new(EventKind::OverrideApplied, "x").pwm([Some(1300), None, Some(1800), None]);
        assert_eq!(ev.roll_pwm, Some(1300));
        assert_eq!(ev.pitch_pwm, None);
        assert_eq!(ev.throttle_pwm, Some(1800));
        assert_eq!(ev.yaw_pwm, None);
    }
}
