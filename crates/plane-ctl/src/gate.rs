use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ControlError;
use crate::interrupt::Interrupt;
use crate::vehicle::{mode_matches, Vehicle};

/// Bounded wait for a flight mode.
#[derive(Debug, Clone, Copy)]
pub struct ModeGate {
    pub poll: Duration,
    pub timeout: Duration,
}

impl ModeGate {
    pub fn new(poll: Duration, timeout: Duration) -> Self {
        Self { poll: poll.max(Duration::from_millis(1)), timeout }
    }

    pub async fn wait<V: Vehicle>(
        &self,
        vehicle: &V,
        target: &str,
        interrupt: &mut Interrupt,
    ) -> Result<(), ControlError> {
        await_mode(vehicle, target, self.poll, self.timeout, interrupt).await
    }
}

/// Poll the vehicle's mode until it equals `target`.
///
/// Succeeds on the first poll that matches. Gives up with `ModeTimeout` once `timeout` has
/// elapsed; the last poll happens exactly at the deadline.
pub async fn await_mode<V: Vehicle>(
    vehicle: &V,
    target: &str,
    poll: Duration,
    timeout: Duration,
    interrupt: &mut Interrupt,
) -> Result<(), ControlError> {
    let start = Instant::now();
    let deadline = start + timeout;

    loop {
        interrupt.check()?;
        let current = vehicle.mode();
        if mode_matches(current.as_deref(), target) {
            debug!("mode gate: {} reached after {:?}", target, start.elapsed());
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ControlError::ModeTimeout { mode: target.to_string(), waited: now - start });
        }
        interrupt.sleep_until(deadline.min(now + poll)).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::interrupt_pair;
    use crate::mock::MockVehicle;

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_already_in_mode() {
        let v = MockVehicle::new("STABILIZE");
        let (_t, mut intr) = interrupt_pair();
        let t0 = Instant::now();
        await_mode(&v, "stabilize", Duration::from_millis(200), Duration::from_secs(5), &mut intr)
            .await
            .unwrap();
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_within_one_poll_of_budget() {
        let v = MockVehicle::stuck("MANUAL");
        let (_t, mut intr) = interrupt_pair();
        let poll = Duration::from_millis(300);
        let timeout = Duration::from_secs(2);

        let t0 = Instant::now();
        let err = await_mode(&v, "STABILIZE", poll, timeout, &mut intr).await.unwrap_err();
        let took = t0.elapsed();

        assert!(matches!(err, ControlError::ModeTimeout { ref mode, .. } if mode == "STABILIZE"));
        assert!(took >= timeout && took <= timeout + poll, "took {:?}", took);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_cuts_wait_short() {
        let v = MockVehicle::stuck("MANUAL");
        let (trigger, mut intr) = interrupt_pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(450)).await;
            trigger.raise();
        });

        let gate = ModeGate::new(Duration::from_millis(200), Duration::from_secs(30));
        let t0 = Instant::now();
        let err = gate.wait(&v, "ACRO", &mut intr).await.unwrap_err();
        assert!(matches!(err, ControlError::ExternalInterrupt));
        assert!(t0.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_mode_counts_as_not_reached() {
        let mut v = MockVehicle::stuck("MANUAL");
        v.mode = None;
        let (_t, mut intr) = interrupt_pair();
        let res = await_mode(&v, "ACRO", Duration::from_millis(100), Duration::from_millis(500), &mut intr).await;
        assert!(matches!(res, Err(ControlError::ModeTimeout { .. })));
    }
}
