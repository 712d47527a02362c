use plane_proto::sink::EventSink;
use plane_proto::telemetry::{ControlEvent, EventKind};
use tracing::{info, warn};

use crate::channel::Axis;
use crate::error::ControlError;
use crate::vehicle::Vehicle;
use crate::CalibrationConfig;

/// Full stick deflection in PWM units either side of neutral.
pub const FULL_DEFLECTION_PWM: f64 = 500.0;

/// deg/s -> PWM offset scale per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factors {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Factors {
    pub fn for_axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Roll => self.roll,
            Axis::Pitch => self.pitch,
            Axis::Yaw => self.yaw,
        }
    }
}

/// `500 / rate` for a usable rate, `None` otherwise.
pub fn factor_from_rate(rate: Option<f64>) -> Option<f64> {
    match rate {
        Some(r) if r.is_finite() && r > 0.0 => Some(FULL_DEFLECTION_PWM / r),
        _ => None,
    }
}

/// Read the three rate parameters once and derive the factors.
///
/// Never fails: an unusable parameter falls back to `cfg.fallback_factor` and is reported
/// as a warning plus a `ParameterUnavailable` event.
pub async fn resolve_factors<V: Vehicle>(
    vehicle: &mut V,
    cfg: &CalibrationConfig,
    sink: &mut dyn EventSink,
) -> Factors {
    let fallback = cfg.fallback_factor.max(0.0);
    let mut out = [fallback; 3];

    for (slot, axis) in Axis::ALL.into_iter().enumerate() {
        let (name, fixed) = match axis {
            Axis::Roll => (&cfg.roll_param, cfg.roll_factor),
            Axis::Pitch => (&cfg.pitch_param, cfg.pitch_factor),
            Axis::Yaw => (&cfg.yaw_param, cfg.yaw_factor),
        };

        if let Some(f) = fixed {
            out[slot] = f.max(0.0);
            info!("calibration: {} factor fixed at {:.3}", axis.name(), out[slot]);
            continue;
        }

        let rate = match vehicle.parameter(name).await {
            Ok(v) => v.map(f64::from),
            Err(e) => {
                warn!("calibration: reading {} failed: {:#}", name, e);
                None
            }
        };

        match factor_from_rate(rate) {
            Some(f) => {
                out[slot] = f;
                info!("calibration: {}={:?} -> {} factor {:.3}", name, rate, axis.name(), f);
                let ev = ControlEvent::new(EventKind::Calibration, format!("{}={:?}", name, rate))
                    .axis(axis.name())
                    .value(f);
                sink.emit(ev);
            }
            None => {
                let err = ControlError::ParameterUnavailable { name: name.clone() };
                warn!("calibration: {} (value {:?}), using factor {}", err, rate, fallback);
                let ev = ControlEvent::new(EventKind::ParameterUnavailable, err.to_string())
                    .axis(axis.name())
                    .value(fallback);
                sink.emit(ev);
            }
        }
    }

    Factors { roll: out[0], pitch: out[1], yaw: out[2] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockVehicle};
    use crate::pwm::{pwm_offsets, Pwm};
    use plane_proto::sink::MemorySink;

    #[tokio::test]
    async fn roll_rate_50_gives_factor_10_and_expected_offsets() {
        let mut v = MockVehicle::new("STABILIZE")
            .with_param("ACRO_ROLL_RATE", 50.0)
            .with_param("ACRO_PITCH_RATE", 100.0)
            .with_param("ACRO_YAW_RATE", 250.0);
        let mut sink = MemorySink::default();

        let f = resolve_factors(&mut v, &CalibrationConfig::default(), &mut sink).await;
        assert_eq!(f.roll, 10.0);
        assert_eq!(f.pitch, 5.0);
        assert_eq!(f.yaw, 2.0);
        assert_eq!(pwm_offsets(20.0, f.roll), (Pwm::clamp(1300), Pwm::clamp(1700)));
    }

    #[tokio::test]
    async fn missing_or_zero_rate_uses_fallback() {
        let mut v = MockVehicle::new("STABILIZE").with_param("ACRO_ROLL_RATE", 180.0).with_param("ACRO_YAW_RATE", 0.0);
        let mut sink = MemorySink::default();
        let cfg = CalibrationConfig { fallback_factor: 1.5, ..Default::default() };

        let f = resolve_factors(&mut v, &cfg, &mut sink).await;
        assert!((f.roll - 500.0 / 180.0).abs() < 1e-12);
        assert_eq!(f.pitch, 1.5);
        assert_eq!(f.yaw, 1.5);
        let unavailable = sink.kinds().into_iter().filter(|k| *k == EventKind::ParameterUnavailable).count();
        assert_eq!(unavailable, 2);
    }

    #[tokio::test]
    async fn link_error_is_not_fatal() {
        let mut v = MockVehicle::new("STABILIZE");
        v.param_error = true;
        let mut sink = MemorySink::default();
        let f = resolve_factors(&mut v, &CalibrationConfig::default(), &mut sink).await;
        assert_eq!(f, Factors { roll: 1.0, pitch: 1.0, yaw: 1.0 });
    }

    #[tokio::test]
    async fn fixed_factor_skips_parameter_read() {
        let mut v = MockVehicle::new("STABILIZE").with_param("ACRO_PITCH_RATE", 50.0);
        let cfg = CalibrationConfig { roll_factor: Some(4.0), ..Default::default() };
        let mut sink = MemorySink::default();

        let f = resolve_factors(&mut v, &cfg, &mut sink).await;
        assert_eq!(f.roll, 4.0);
        assert_eq!(f.pitch, 10.0);
        assert_eq!(v.count(|c| matches!(c, Call::Param(n) if n == "ACRO_ROLL_RATE")), 0);
    }

    #[test]
    fn factor_rejects_unusable_rates() {
        assert_eq!(factor_from_rate(Some(50.0)), Some(10.0));
        assert_eq!(factor_from_rate(Some(0.0)), None);
        assert_eq!(factor_from_rate(Some(-20.0)), None);
        assert_eq!(factor_from_rate(Some(f64::NAN)), None);
        assert_eq!(factor_from_rate(None), None);
    }
}
