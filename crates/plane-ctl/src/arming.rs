use plane_proto::sink::EventSink;
use plane_proto::telemetry::{ControlEvent, EventKind};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::error::ControlError;
use crate::gate::ModeGate;
use crate::interrupt::Interrupt;
use crate::vehicle::Vehicle;
use crate::ArmingConfig;

/// Bring the vehicle from "connected" to "armed in `arm_mode`".
///
/// Waits for pre-arm checks, requests the arm mode and confirms it through `gate`, then arms
/// and waits for the armed flag. Every wait is bounded.
pub async fn arm_and_wait<V: Vehicle>(
    vehicle: &mut V,
    cfg: &ArmingConfig,
    arm_mode: &str,
    gate: ModeGate,
    sink: &mut dyn EventSink,
    interrupt: &mut Interrupt,
) -> Result<(), ControlError> {
    let poll = Duration::from_millis(cfg.poll_ms.max(1));

    info!("arming: waiting for vehicle to become armable");
    sink.emit(ControlEvent::new(EventKind::Status, "waiting for armable"));
    let waited = wait_for(|| vehicle.is_armable(), poll, Duration::from_millis(cfg.armable_timeout_ms), interrupt)
        .await?
        .ok_or_else(|| ControlError::NotArmable { waited: Duration::from_millis(cfg.armable_timeout_ms) })?;
    info!("arming: armable after {:?}", waited);

    vehicle.request_mode(arm_mode)?;
    sink.emit(ControlEvent::new(EventKind::ModeRequested, "arm mode").mode(arm_mode));
    gate.wait(vehicle, arm_mode, interrupt).await?;

    vehicle.arm()?;
    info!("arming: arm command sent");
    let waited = wait_for(|| vehicle.armed(), poll, Duration::from_millis(cfg.arm_timeout_ms), interrupt)
        .await?
        .ok_or_else(|| ControlError::ArmTimeout { waited: Duration::from_millis(cfg.arm_timeout_ms) })?;

    info!("arming: armed in {} after {:?}", arm_mode, waited);
    sink.emit(ControlEvent::new(EventKind::Status, "armed").mode(arm_mode));
    Ok(())
}

/// Poll `cond` until true. `Ok(None)` on timeout.
async fn wait_for(
    mut cond: impl FnMut() -> bool,
    poll: Duration,
    timeout: Duration,
    interrupt: &mut Interrupt,
) -> Result<Option<Duration>, ControlError> {
    let start = Instant::now();
    let deadline = start + timeout;
    loop {
        interrupt.check()?;
        if cond() {
            return Ok(Some(start.elapsed()));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        interrupt.sleep_until(deadline.min(now + poll)).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::interrupt_pair;
    use crate::mock::{Call, MockVehicle};
    use plane_proto::sink::MemorySink;

    fn gate() -> ModeGate {
        ModeGate::new(Duration::from_millis(100), Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn arms_in_requested_mode() {
        let mut v = MockVehicle::new("MANUAL");
        let mut sink = MemorySink::default();
        let (_t, mut intr) = interrupt_pair();

        arm_and_wait(&mut v, &ArmingConfig::default(), "AUTO", gate(), &mut sink, &mut intr).await.unwrap();

        assert!(v.armed);
        assert_eq!(v.mode.as_deref(), Some("AUTO"));
        let mode_at = v.first_at(|c| matches!(c, Call::RequestMode(m) if m == "AUTO")).unwrap();
        let arm_at = v.first_at(|c| matches!(c, Call::Arm)).unwrap();
        assert!(mode_at <= arm_at);
    }

    #[tokio::test(start_paused = true)]
    async fn never_armable_times_out_without_arming() {
        let mut v = MockVehicle::new("MANUAL");
        v.armable = false;
        let cfg = ArmingConfig { poll_ms: 500, armable_timeout_ms: 3_000, arm_timeout_ms: 1_000 };
        let mut sink = MemorySink::default();
        let (_t, mut intr) = interrupt_pair();

        let t0 = Instant::now();
        let err = arm_and_wait(&mut v, &cfg, "AUTO", gate(), &mut sink, &mut intr).await.unwrap_err();
        assert!(matches!(err, ControlError::NotArmable { .. }));
        assert!(t0.elapsed() >= Duration::from_secs(3) && t0.elapsed() <= Duration::from_millis(3_500));
        assert_eq!(v.count(|c| matches!(c, Call::Arm)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn arm_refused_is_bounded() {
        let mut v = MockVehicle::new("MANUAL");
        v.arm_on_request = false;
        let cfg = ArmingConfig { poll_ms: 200, armable_timeout_ms: 1_000, arm_timeout_ms: 2_000 };
        let mut sink = MemorySink::default();
        let (_t, mut intr) = interrupt_pair();

        let err = arm_and_wait(&mut v, &cfg, "AUTO", gate(), &mut sink, &mut intr).await.unwrap_err();
        assert!(matches!(err, ControlError::ArmTimeout { .. }));
    }
}
