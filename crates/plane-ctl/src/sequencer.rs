use plane_proto::sink::EventSink;
use plane_proto::telemetry::{ControlEvent, EventKind};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::calibration::Factors;
use crate::channel::{Axis, Channel};
use crate::error::ControlError;
use crate::gate::ModeGate;
use crate::interrupt::Interrupt;
use crate::pwm::{pwm_offsets, Pwm};
use crate::session::begin_overrides;
use crate::vehicle::Vehicle;
use crate::{Extreme, FailurePolicy, ModeNames, TestConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisState {
    WaitStabilize,
    SettleDelay,
    SetAcroMode,
    DriveLow,
    DriveHigh,
    ReleaseOverrides,
    Done,
}

impl AxisState {
    pub fn name(self) -> &'static str {
        match self {
            AxisState::WaitStabilize => "wait_stabilize",
            AxisState::SettleDelay => "settle_delay",
            AxisState::SetAcroMode => "set_acro_mode",
            AxisState::DriveLow => "drive_low",
            AxisState::DriveHigh => "drive_high",
            AxisState::ReleaseOverrides => "release_overrides",
            AxisState::Done => "done",
        }
    }
}

/// One timed drive step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestStage {
    pub axis: Axis,
    pub extreme: Extreme,
    pub duration: Duration,
}

/// Ordered drive stages for one axis, as configured.
pub fn stages_for(cfg: &TestConfig, axis: Axis) -> Vec<TestStage> {
    let duration = Duration::from_millis(cfg.axis(axis).hold_ms);
    cfg.phases.iter().map(|&extreme| TestStage { axis, extreme, duration }).collect()
}

#[derive(Debug, Clone)]
pub struct AxisReport {
    pub axis: Axis,
    /// Values actually put on the axis channel, in stage order.
    pub applied: Vec<(Extreme, Pwm)>,
    pub error: Option<String>,
}

impl AxisReport {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    pub axes: Vec<AxisReport>,
    /// Remaining axes were skipped after a failure.
    pub aborted: bool,
}

/// Runs the per-axis actuation script against one vehicle.
pub struct AxisTestSequencer<'a, V: Vehicle> {
    vehicle: &'a mut V,
    cfg: &'a TestConfig,
    modes: &'a ModeNames,
    gate: ModeGate,
    factors: Factors,
    sink: &'a mut dyn EventSink,
    interrupt: Interrupt,
    state: AxisState,
}

impl<'a, V: Vehicle> AxisTestSequencer<'a, V> {
    pub fn new(
        vehicle: &'a mut V,
        cfg: &'a TestConfig,
        modes: &'a ModeNames,
        gate: ModeGate,
        factors: Factors,
        sink: &'a mut dyn EventSink,
        interrupt: Interrupt,
    ) -> Self {
        Self { vehicle, cfg, modes, gate, factors, sink, interrupt, state: AxisState::Done }
    }

    pub fn state(&self) -> AxisState {
        self.state
    }

    /// Run every configured axis in order. Axes never overlap: each one starts after the
    /// previous one released its overrides and the vehicle was sent back to the baseline
    /// mode for the inter-axis dwell. Every axis requests the baseline itself, so the first
    /// one also starts from whatever mode the vehicle was left in (AUTO after arming).
    pub async fn run(&mut self) -> Result<SequenceReport, ControlError> {
        let mut report = SequenceReport::default();
        let cfg = self.cfg;

        for (i, &axis) in cfg.axes.iter().enumerate() {
            self.interrupt.check()?;
            if i > 0 {
                self.return_to_baseline().await?;
            }

            let mut applied = Vec::new();
            match self.run_axis(axis, &mut applied).await {
                Ok(()) => {
                    self.sink.emit(ControlEvent::new(EventKind::AxisDone, "axis test complete").axis(axis.name()));
                    report.axes.push(AxisReport { axis, applied, error: None });
                }
                Err(e) => {
                    self.recover(axis, &e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                    report.axes.push(AxisReport { axis, applied, error: Some(e.to_string()) });
                    if cfg.on_axis_failure == FailurePolicy::Abort {
                        warn!("sequence: aborting remaining axes after {} failure", axis.name());
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    /// One axis, `WaitStabilize` through `Done`. Every value put on the axis channel is
    /// pushed to `applied` as it happens, so a failed axis still reports what it drove.
    pub async fn run_axis(&mut self, axis: Axis, applied: &mut Vec<(Extreme, Pwm)>) -> Result<(), ControlError> {
        self.enter(axis, AxisState::WaitStabilize);
        self.vehicle.request_mode(&self.modes.baseline)?;
        self.sink.emit(
            ControlEvent::new(EventKind::ModeRequested, "baseline mode requested")
                .axis(axis.name())
                .mode(self.modes.baseline.clone()),
        );
        self.gate.wait(&*self.vehicle, &self.modes.baseline, &mut self.interrupt).await?;

        self.enter(axis, AxisState::SettleDelay);
        self.interrupt.sleep(Duration::from_millis(self.cfg.settle_ms)).await?;

        self.enter(axis, AxisState::SetAcroMode);
        self.vehicle.request_mode(&self.modes.manual_rate)?;
        self.sink.emit(
            ControlEvent::new(EventKind::ModeRequested, "manual-rate mode requested")
                .axis(axis.name())
                .mode(self.modes.manual_rate.clone()),
        );
        if self.cfg.confirm_acro {
            self.gate.wait(&*self.vehicle, &self.modes.manual_rate, &mut self.interrupt).await?;
        }

        let (low, high) = pwm_offsets(self.cfg.axis(axis).rate_dps, self.factors.for_axis(axis));
        let throttle = self.cfg.throttle_pin.map(|t| Pwm::clamp(t as i64));

        // field-level borrows from here on: the session holds the vehicle
        let mut session = begin_overrides(&mut *self.vehicle)?;
        for stage in stages_for(self.cfg, axis) {
            let (state, value) = match stage.extreme {
                Extreme::Low => (AxisState::DriveLow, low),
                Extreme::High => (AxisState::DriveHigh, high),
            };
            self.state = state;
            self.sink.emit(ControlEvent::new(EventKind::StageEntered, "").axis(axis.name()).stage(state.name()));

            if let Some(t) = throttle {
                session.set(Channel::Throttle, Some(t))?;
            }
            session.set(axis.channel(), Some(value))?;
            let applied_at = Instant::now();

            info!("{}: {} -> {} for {:?}", axis.name(), state.name(), value, stage.duration);
            self.sink.emit(
                ControlEvent::new(EventKind::OverrideApplied, format!("{} {}", state.name(), value))
                    .axis(axis.name())
                    .stage(state.name())
                    .pwm(session.vector().as_raw()),
            );
            applied.push((stage.extreme, value));

            // hold is measured from the override, not from stage entry
            self.interrupt.sleep_until(applied_at + stage.duration).await?;
        }

        self.state = AxisState::ReleaseOverrides;
        self.sink.emit(ControlEvent::new(EventKind::StageEntered, "").axis(axis.name()).stage(self.state.name()));
        session.set(axis.channel(), None)?;
        session.set(Channel::Throttle, None)?;
        session.close()?;
        self.sink.emit(ControlEvent::new(EventKind::OverridesCleared, "released").axis(axis.name()));

        self.enter(axis, AxisState::Done);
        Ok(())
    }

    async fn return_to_baseline(&mut self) -> Result<(), ControlError> {
        self.vehicle.request_mode(&self.modes.baseline)?;
        self.sink.emit(ControlEvent::new(EventKind::ModeRequested, "inter-axis return").mode(self.modes.baseline.clone()));
        self.interrupt.sleep(Duration::from_millis(self.cfg.inter_axis_dwell_ms)).await
    }

    /// Last-resort cleanup after a failed axis. The session, if one was open, has already
    /// cleared on drop; this covers failures outside it too.
    fn recover(&mut self, axis: Axis, err: &ControlError) {
        warn!("{}: failed in {}: {}", axis.name(), self.state.name(), err);
        if let ControlError::ModeTimeout { mode, .. } = err {
            self.sink.emit(ControlEvent::new(EventKind::ModeTimeout, err.to_string()).axis(axis.name()).mode(mode.clone()));
        }
        if matches!(err, ControlError::ExternalInterrupt) {
            self.sink.emit(ControlEvent::new(EventKind::Interrupted, "operator abort").axis(axis.name()));
        }
        if let Err(e) = self.vehicle.clear_all_overrides() {
            warn!("{}: clearing overrides failed: {:#}", axis.name(), e);
        }
        self.sink.emit(ControlEvent::new(EventKind::OverridesCleared, "cleanup").axis(axis.name()));
        self.sink.emit(
            ControlEvent::new(EventKind::AxisFailed, err.to_string()).axis(axis.name()).stage(self.state.name()),
        );
    }

    fn enter(&mut self, axis: Axis, state: AxisState) {
        self.state = state;
        self.sink.emit(ControlEvent::new(EventKind::StageEntered, "").axis(axis.name()).stage(state.name()));
    }
}
