use plane_proto::telemetry::{GpsSample, ImuSample};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What the reader thread has learned about the autopilot. Only ever written from
/// incoming messages.
#[derive(Debug, Clone, Default)]
pub struct FcStatus {
    pub connected: bool,
    pub endpoint: Option<String>,
    pub last_heartbeat: Option<Instant>,
    pub custom_mode: Option<u32>,
    pub mode: Option<String>,
    pub armed: bool,
    /// Autopilot reported a state past boot/calibration.
    pub system_ready: bool,
    pub gps: Option<GpsSample>,
    pub imu: Option<ImuSample>,
    pub params: HashMap<String, f32>,
    pub last_msg: Option<String>,
}

impl FcStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    /// Pre-arm view from the companion side: heartbeat seen, autopilot initialised and,
    /// when required, a GPS fix of at least 2D.
    pub fn is_armable(&self, require_gps: bool) -> bool {
        if self.last_heartbeat.is_none() || !self.system_ready {
            return false;
        }
        if self.mode.as_deref() == Some("INITIALISING") {
            return false;
        }
        !require_gps || self.gps.map(|g| g.fix_type >= 2).unwrap_or(false)
    }
}
