pub mod arming;
pub mod calibration;
pub mod channel;
pub mod doctor;
pub mod error;
pub mod gate;
pub mod input;
pub mod interrupt;
pub mod pwm;
pub mod sequencer;
pub mod session;
pub mod teleop;
pub mod vehicle;

#[cfg(test)]
pub(crate) mod mock;

use serde::Deserialize;
use std::time::Duration;

use crate::channel::Axis;
use crate::gate::ModeGate;
use crate::input::Key;

pub use crate::error::ControlError;
pub use crate::vehicle::Vehicle;

/// Everything the control core can be told from outside. Every field has a default, so an
/// empty `[control]` table is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub modes: ModeNames,
    pub gate: GateConfig,
    pub test: TestConfig,
    pub teleop: TeleopConfig,
    pub calibration: CalibrationConfig,
    pub arming: ArmingConfig,

    /// Sent as DO_CHANGE_SPEED after arming, if set (m/s).
    pub target_airspeed: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModeNames {
    /// Known-safe mode each axis test starts from.
    pub baseline: String,
    /// Manual-rate mode in which overrides are applied.
    pub manual_rate: String,
    /// Mode requested before arming; the autopilot handles takeoff in it.
    pub arm: String,
    /// Requested when a run ends, on every exit path. An empty name disables it.
    pub finish: Option<String>,
}

impl ModeNames {
    pub fn finish_mode(&self) -> Option<&str> {
        self.finish.as_deref().filter(|m| !m.trim().is_empty())
    }
}

impl Default for ModeNames {
    fn default() -> Self {
        Self {
            baseline: "STABILIZE".into(),
            manual_rate: "ACRO".into(),
            arm: "AUTO".into(),
            finish: Some("RTL".into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub poll_ms: u64,
    pub timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { poll_ms: 200, timeout_ms: 15_000 }
    }
}

impl GateConfig {
    pub fn gate(&self) -> ModeGate {
        ModeGate::new(Duration::from_millis(self.poll_ms), Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extreme {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Clean up and go on with the next axis.
    Continue,
    /// Clean up and stop the whole sequence.
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AxisTestConfig {
    /// Commanded rate, deg/s.
    pub rate_dps: f64,
    /// Hold time per extreme.
    pub hold_ms: u64,
}

impl Default for AxisTestConfig {
    fn default() -> Self {
        Self { rate_dps: 20.0, hold_ms: 5_000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub axes: Vec<Axis>,
    pub roll: AxisTestConfig,
    pub pitch: AxisTestConfig,
    pub yaw: AxisTestConfig,
    /// Extremes driven per axis, in order.
    pub phases: Vec<Extreme>,
    pub settle_ms: u64,
    pub inter_axis_dwell_ms: u64,
    /// Throttle held during a stage to keep control authority. None leaves it alone.
    pub throttle_pin: Option<u16>,
    /// Wait for the manual-rate mode to be reported before the first override.
    pub confirm_acro: bool,
    pub on_axis_failure: FailurePolicy,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            axes: Axis::ALL.to_vec(),
            roll: AxisTestConfig::default(),
            pitch: AxisTestConfig::default(),
            yaw: AxisTestConfig::default(),
            phases: vec![Extreme::Low, Extreme::High],
            settle_ms: 3_000,
            inter_axis_dwell_ms: 5_000,
            throttle_pin: Some(1800),
            confirm_acro: true,
            on_axis_failure: FailurePolicy::Continue,
        }
    }
}

impl TestConfig {
    pub fn axis(&self, axis: Axis) -> &AxisTestConfig {
        match axis {
            Axis::Roll => &self.roll,
            Axis::Pitch => &self.pitch,
            Axis::Yaw => &self.yaw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KeyPair {
    pub increase: Key,
    pub decrease: Key,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeKey {
    pub key: Key,
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    pub tick_ms: u64,
    /// PWM step for roll, pitch and yaw while a key is held.
    pub increment: u16,
    pub throttle_increment: u16,
    pub roll: KeyPair,
    pub pitch: KeyPair,
    pub yaw: KeyPair,
    pub throttle: KeyPair,
    pub mode_keys: Vec<ModeKey>,
    /// How long a key counts as held after its last terminal event.
    pub key_hold_ms: u64,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            increment: 200,
            throttle_increment: 200,
            roll: KeyPair { increase: Key::Char('d'), decrease: Key::Char('a') },
            pitch: KeyPair { increase: Key::Char('w'), decrease: Key::Char('s') },
            yaw: KeyPair { increase: Key::Char('e'), decrease: Key::Char('q') },
            throttle: KeyPair { increase: Key::Up, decrease: Key::Down },
            mode_keys: vec![
                ModeKey { key: Key::Char('1'), mode: "ACRO".into() },
                ModeKey { key: Key::Char('2'), mode: "STABILIZE".into() },
                ModeKey { key: Key::Char('3'), mode: "FBWA".into() },
                ModeKey { key: Key::Char('r'), mode: "RTL".into() },
            ],
            key_hold_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub roll_param: String,
    pub pitch_param: String,
    pub yaw_param: String,
    /// Factor used when a rate parameter is missing, zero or unreadable.
    pub fallback_factor: f64,
    /// Fixed factors that skip the parameter read for that axis.
    pub roll_factor: Option<f64>,
    pub pitch_factor: Option<f64>,
    pub yaw_factor: Option<f64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            roll_param: "ACRO_ROLL_RATE".into(),
            pitch_param: "ACRO_PITCH_RATE".into(),
            yaw_param: "ACRO_YAW_RATE".into(),
            fallback_factor: 1.0,
            roll_factor: None,
            pitch_factor: None,
            yaw_factor: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArmingConfig {
    pub poll_ms: u64,
    pub armable_timeout_ms: u64,
    pub arm_timeout_ms: u64,
}

impl Default for ArmingConfig {
    fn default() -> Self {
        Self { poll_ms: 1_000, armable_timeout_ms: 120_000, arm_timeout_ms: 30_000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_gives_documented_defaults() {
        let cfg: ControlConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.modes.baseline, "STABILIZE");
        assert_eq!(cfg.modes.manual_rate, "ACRO");
        assert_eq!(cfg.teleop.tick_ms, 100);
        assert_eq!(cfg.test.phases, vec![Extreme::Low, Extreme::High]);
        assert_eq!(cfg.test.on_axis_failure, FailurePolicy::Continue);
        assert_eq!(cfg.calibration.fallback_factor, 1.0);
    }

    #[test]
    fn empty_finish_mode_disables_it() {
        let cfg: ControlConfig = toml::from_str("[modes]\nfinish = \"\"\n").unwrap();
        assert_eq!(cfg.modes.finish_mode(), None);
        assert_eq!(ControlConfig::default().modes.finish_mode(), Some("RTL"));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let cfg: ControlConfig = toml::from_str(
            r#"
            [test]
            axes = ["yaw"]
            on_axis_failure = "abort"
            throttle_pin = 1650

            [test.yaw]
            rate_dps = 35.0

            [teleop]
            roll = { increase = "right", decrease = "left" }
            mode_keys = [{ key = "m", mode = "MANUAL" }]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.test.axes, vec![Axis::Yaw]);
        assert_eq!(cfg.test.on_axis_failure, FailurePolicy::Abort);
        assert_eq!(cfg.test.yaw.rate_dps, 35.0);
        assert_eq!(cfg.test.yaw.hold_ms, 5_000);
        assert_eq!(cfg.test.throttle_pin, Some(1650));
        assert_eq!(cfg.teleop.roll.increase, Key::Right);
        assert_eq!(cfg.teleop.pitch.increase, Key::Char('w'));
        assert_eq!(cfg.teleop.mode_keys.len(), 1);
    }
}
