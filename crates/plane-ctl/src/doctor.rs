use anyhow::Result;
use std::collections::HashSet;

use crate::pwm::{MAX_PWM, MIN_PWM};
use crate::{ArmingConfig, CalibrationConfig, ControlConfig, GateConfig, ModeNames, TeleopConfig, TestConfig};

/// Full check of a control configuration. `known_mode` decides whether a mode name exists
/// on the target autopilot.
pub fn check_control(cfg: &ControlConfig, known_mode: impl Fn(&str) -> bool) -> Result<()> {
    check_modes(&cfg.modes, &cfg.teleop, &known_mode)?;
    check_gate(&cfg.gate)?;
    check_test(&cfg.test)?;
    check_teleop(&cfg.teleop)?;
    check_calibration(&cfg.calibration)?;
    check_arming(&cfg.arming)?;
    if let Some(a) = cfg.target_airspeed {
        anyhow::ensure!(a.is_finite() && a > 0.0, "control.target_airspeed must be > 0");
    }
    Ok(())
}

pub fn check_modes(modes: &ModeNames, teleop: &TeleopConfig, known_mode: &impl Fn(&str) -> bool) -> Result<()> {
    let mut names = vec![modes.baseline.as_str(), modes.manual_rate.as_str(), modes.arm.as_str()];
    names.extend(modes.finish_mode());
    names.extend(teleop.mode_keys.iter().map(|mk| mk.mode.as_str()));
    for name in names {
        anyhow::ensure!(known_mode(name), "unknown flight mode: {}", name);
    }
    anyhow::ensure!(
        !modes.baseline.eq_ignore_ascii_case(&modes.manual_rate),
        "modes.baseline and modes.manual_rate must differ"
    );
    Ok(())
}

pub fn check_gate(gate: &GateConfig) -> Result<()> {
    anyhow::ensure!(gate.poll_ms > 0, "gate.poll_ms must be > 0");
    anyhow::ensure!(gate.timeout_ms >= gate.poll_ms, "gate.timeout_ms must be >= gate.poll_ms");
    Ok(())
}

pub fn check_test(test: &TestConfig) -> Result<()> {
    anyhow::ensure!(!test.axes.is_empty(), "test.axes is empty");
    anyhow::ensure!(!test.phases.is_empty(), "test.phases is empty");
    anyhow::ensure!(test.settle_ms > 0, "test.settle_ms must be > 0");
    anyhow::ensure!(test.inter_axis_dwell_ms > 0, "test.inter_axis_dwell_ms must be > 0");
    for axis in &test.axes {
        let a = test.axis(*axis);
        anyhow::ensure!(a.rate_dps.is_finite() && a.rate_dps >= 0.0, "test.{}.rate_dps must be >= 0", axis.name());
        anyhow::ensure!(a.hold_ms > 0, "test.{}.hold_ms must be > 0", axis.name());
    }
    if let Some(pin) = test.throttle_pin {
        anyhow::ensure!((MIN_PWM..=MAX_PWM).contains(&pin), "test.throttle_pin out of {}..{}", MIN_PWM, MAX_PWM);
    }
    Ok(())
}

pub fn check_teleop(teleop: &TeleopConfig) -> Result<()> {
    anyhow::ensure!(teleop.tick_ms > 0, "teleop.tick_ms must be > 0");
    anyhow::ensure!(teleop.key_hold_ms > 0, "teleop.key_hold_ms must be > 0");

    let mut seen = HashSet::new();
    let pairs = [teleop.roll, teleop.pitch, teleop.yaw, teleop.throttle];
    let keys = pairs
        .iter()
        .flat_map(|p| [p.increase, p.decrease])
        .chain(teleop.mode_keys.iter().map(|mk| mk.key));
    for key in keys {
        anyhow::ensure!(seen.insert(key), "teleop key {} bound twice", key);
    }
    Ok(())
}

pub fn check_calibration(cal: &CalibrationConfig) -> Result<()> {
    anyhow::ensure!(
        cal.fallback_factor.is_finite() && cal.fallback_factor >= 0.0,
        "calibration.fallback_factor must be >= 0"
    );
    for f in [cal.roll_factor, cal.pitch_factor, cal.yaw_factor].into_iter().flatten() {
        anyhow::ensure!(f.is_finite() && f >= 0.0, "calibration factors must be >= 0");
    }
    Ok(())
}

pub fn check_arming(arming: &ArmingConfig) -> Result<()> {
    anyhow::ensure!(arming.poll_ms > 0, "arming.poll_ms must be > 0");
    anyhow::ensure!(arming.armable_timeout_ms > 0 && arming.arm_timeout_ms > 0, "arming timeouts must be > 0");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Key;
    use crate::ModeKey;

    fn plane_modes(name: &str) -> bool {
        ["MANUAL", "STABILIZE", "ACRO", "FBWA", "AUTO", "RTL"].iter().any(|m| m.eq_ignore_ascii_case(name))
    }

    #[test]
    fn defaults_pass() {
        check_control(&ControlConfig::default(), plane_modes).unwrap();
    }

    #[test]
    fn duplicate_key_binding_is_rejected() {
        let mut cfg = ControlConfig::default();
        cfg.teleop.mode_keys.push(ModeKey { key: Key::Char('w'), mode: "MANUAL".into() });
        let err = check_control(&cfg, plane_modes).unwrap_err();
        assert!(err.to_string().contains("bound twice"));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut cfg = ControlConfig::default();
        cfg.modes.finish = Some("POSHOLD".into());
        assert!(check_control(&cfg, plane_modes).is_err());
        cfg.modes.finish = None;
        check_control(&cfg, plane_modes).unwrap();
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut cfg = ControlConfig::default();
        cfg.test.throttle_pin = Some(2100);
        assert!(check_control(&cfg, plane_modes).is_err());

        let mut cfg = ControlConfig::default();
        cfg.gate.timeout_ms = 0;
        assert!(check_control(&cfg, plane_modes).is_err());

        let mut cfg = ControlConfig::default();
        cfg.test.yaw.hold_ms = 0;
        assert!(check_control(&cfg, plane_modes).is_err());

        let mut cfg = ControlConfig::default();
        cfg.test.settle_ms = 0;
        let err = check_control(&cfg, plane_modes).unwrap_err();
        assert!(err.to_string().contains("settle_ms"));

        let mut cfg = ControlConfig::default();
        cfg.test.inter_axis_dwell_ms = 0;
        let err = check_control(&cfg, plane_modes).unwrap_err();
        assert!(err.to_string().contains("inter_axis_dwell_ms"));
    }
}
