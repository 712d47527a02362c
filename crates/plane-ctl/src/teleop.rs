use plane_proto::sink::EventSink;
use plane_proto::telemetry::{ControlEvent, EventKind};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::channel::{Channel, OverrideVector};
use crate::error::ControlError;
use crate::input::{InputSource, KeySet};
use crate::interrupt::Interrupt;
use crate::pwm::Pwm;
use crate::session::{begin_overrides, OverrideSession};
use crate::vehicle::{mode_matches, Vehicle};
use crate::{KeyPair, TeleopConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Vector computed from the keys this tick.
    pub commanded: OverrideVector,
    /// What the vehicle was left with: `commanded` in the manual-rate mode, released otherwise.
    pub applied: OverrideVector,
    pub in_manual: bool,
    pub requested: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TeleopSummary {
    pub ticks: u64,
    pub applied_ticks: u64,
}

/// Level control: every tick starts from neutral, so releasing a key recentres the
/// channel on the next tick.
pub fn compute_vector(cfg: &TeleopConfig, keys: &KeySet) -> OverrideVector {
    let mut v = OverrideVector::neutral();
    let axes = [
        (Channel::Roll, cfg.roll, cfg.increment),
        (Channel::Pitch, cfg.pitch, cfg.increment),
        (Channel::Yaw, cfg.yaw, cfg.increment),
        (Channel::Throttle, cfg.throttle, cfg.throttle_increment),
    ];
    for (ch, pair, step) in axes {
        v.set(ch, Some(Pwm::NEUTRAL.offset(key_delta(keys, pair, step))));
    }
    v
}

// both keys held cancel out
fn key_delta(keys: &KeySet, pair: KeyPair, step: u16) -> i64 {
    match (keys.is_down(pair.increase), keys.is_down(pair.decrease)) {
        (true, false) => step as i64,
        (false, true) => -(step as i64),
        _ => 0,
    }
}

pub struct TeleopLoop<'c> {
    cfg: &'c TeleopConfig,
    manual_mode: &'c str,
}

impl<'c> TeleopLoop<'c> {
    pub fn new(cfg: &'c TeleopConfig, manual_mode: &'c str) -> Self {
        Self { cfg, manual_mode }
    }

    /// One control tick against an open session.
    pub fn tick<V: Vehicle>(
        &mut self,
        session: &mut OverrideSession<'_, V>,
        keys: &KeySet,
    ) -> Result<TickReport, ControlError> {
        let commanded = compute_vector(self.cfg, keys);

        let mut requested = Vec::new();
        for mk in &self.cfg.mode_keys {
            if keys.is_down(mk.key) {
                session.vehicle_mut().request_mode(&mk.mode)?;
                requested.push(mk.mode.clone());
            }
        }

        let in_manual = mode_matches(session.vehicle().mode().as_deref(), self.manual_mode);
        if in_manual {
            session.apply(&commanded)?;
        } else {
            session.clear_all()?;
        }

        Ok(TickReport { commanded, applied: *session.vector(), in_manual, requested })
    }

    /// Tick until the operator interrupt is raised, then release every channel.
    pub async fn run<V: Vehicle, I: InputSource>(
        &mut self,
        vehicle: &mut V,
        input: &mut I,
        sink: &mut dyn EventSink,
        interrupt: &mut Interrupt,
    ) -> Result<TeleopSummary, ControlError> {
        let period = Duration::from_millis(self.cfg.tick_ms.max(1));
        let mut session = begin_overrides(vehicle)?;
        let mut summary = TeleopSummary::default();
        let mut last: Option<TickReport> = None;
        let mut next = Instant::now();

        info!("teleop: running, tick {:?}, manual mode {}", period, self.manual_mode);

        loop {
            if interrupt.is_raised() {
                break;
            }

            let keys = input.sample()?;
            let report = self.tick(&mut session, &keys)?;
            summary.ticks += 1;
            if report.in_manual {
                summary.applied_ticks += 1;
            }

            let changed = last
                .as_ref()
                .map(|l| l.applied != report.applied || l.in_manual != report.in_manual || l.requested != report.requested)
                .unwrap_or(true);
            if changed {
                for m in &report.requested {
                    sink.emit(ControlEvent::new(EventKind::ModeRequested, "mode key").mode(m.clone()));
                }
                let mode = session.vehicle().mode().unwrap_or_default();
                let msg = if report.in_manual { "applied" } else { "released" };
                sink.emit(ControlEvent::new(EventKind::TeleopTick, msg).mode(mode).pwm(report.applied.as_raw()));
                debug!("teleop: {} {:?}", msg, report.applied.as_raw());
            }
            last = Some(report);

            next += period;
            let now = Instant::now();
            if next <= now {
                // overran: skip the missed ticks instead of bursting
                next = now + period;
            }
            match interrupt.sleep_until(next).await {
                Ok(()) => {}
                Err(ControlError::ExternalInterrupt) => break,
                Err(e) => return Err(e),
            }
        }

        session.close()?;
        sink.emit(ControlEvent::new(EventKind::Interrupted, "teleop stopped, overrides cleared"));
        info!("teleop: stopped after {} ticks", summary.ticks);
        Ok(summary)
    }
}
