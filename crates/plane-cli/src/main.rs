mod keyboard;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::{info, warn};

use plane_ctl::arming::arm_and_wait;
use plane_ctl::calibration::resolve_factors;
use plane_ctl::channel::Axis;
use plane_ctl::interrupt::{interrupt_pair, Interrupt, InterruptTrigger};
use plane_ctl::pwm::pwm_offsets;
use plane_ctl::sequencer::AxisTestSequencer;
use plane_ctl::teleop::TeleopLoop;
use plane_ctl::{ControlConfig, ControlError, Vehicle};

use plane_fc::autodetect::{autodetect_fc, default_candidate_bauds, default_candidate_devs};
use plane_fc::mav::FcLink;
use plane_fc::{modes, FcConfig};

use plane_proto::sink::{CsvSink, EventSink, FanoutSink, TracingSink};
use plane_proto::telemetry::{ControlEvent, EventKind, Telemetry};

use crate::keyboard::TerminalKeyboard;

#[derive(Debug, Parser)]
#[command(name = "planectl", version, about = "planectl - fixed-wing actuation test and keyboard teleop over MAVLink")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration file.
    Doctor,
    /// Read the ACRO rate parameters and print the derived calibration.
    Params,
    /// Drive each configured axis to its extremes in the manual-rate mode.
    Test {
        /// Wait for armable, switch to the arm mode and arm first.
        #[arg(long)]
        arm: bool,
        /// Only these axes (repeatable); defaults to control.test.axes.
        #[arg(long)]
        axis: Vec<Axis>,
    },
    /// Keyboard teleop; overrides are only applied in the manual-rate mode.
    Acro {
        #[arg(long)]
        arm: bool,
    },
    /// Log IMU, GPS and flight mode once per second until Ctrl-C.
    Monitor {
        /// Requested RAW_SENSORS/POSITION stream rate.
        #[arg(long, default_value_t = 10)]
        rate_hz: u16,
    },
    Fc {
        #[command(subcommand)]
        cmd: FcCmd,
    },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
    /// Connect and print the autopilot link status.
    Status,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    fc: FcConfig,
    control: ControlConfig,
    log: LogCfg,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LogCfg {
    /// Append every control/telemetry event to this CSV file.
    csv_path: Option<String>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    let (trigger, interrupt) = interrupt_pair();
    {
        let trigger = trigger.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("ctrl-c: stopping");
                trigger.raise();
            }
        });
    }

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Params => params(&cfg).await?,
        Command::Test { arm, axis } => test(&cfg, arm, axis, interrupt).await?,
        Command::Acro { arm } => acro(&cfg, arm, trigger, interrupt).await?,
        Command::Monitor { rate_hz } => monitor(&cfg, rate_hz, interrupt).await?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    cfg.fc.validate()?;
    if cfg.fc.autodetect {
        info!("doctor: fc autodetect enabled (OK)");
    }
    plane_ctl::doctor::check_control(&cfg.control, modes::is_known)?;
    if let Some(p) = &cfg.log.csv_path {
        anyhow::ensure!(!p.is_empty(), "log.csv_path is empty");
    }
    info!("doctor: OK");
    Ok(())
}

fn event_sink(cfg: &Config) -> Result<FanoutSink> {
    let mut sink = FanoutSink::new().with(TracingSink);
    if let Some(path) = &cfg.log.csv_path {
        sink = sink.with(CsvSink::open(path)?);
    }
    Ok(sink)
}

async fn connect(fc: &FcConfig) -> Result<FcLink> {
    let link = FcLink::connect(fc).context("FC open")?;
    link.wait_heartbeat(Duration::from_millis(fc.connect_timeout_ms)).await?;
    info!("fc: connected, mode {:?}", link.mode());
    Ok(link)
}

async fn params(cfg: &Config) -> Result<()> {
    let mut sink = event_sink(cfg)?;
    let mut link = connect(&cfg.fc).await?;
    let factors = resolve_factors(&mut link, &cfg.control.calibration, &mut sink).await;

    println!("{:<6} {:>9} {:>9} {:>6} {:>6}", "axis", "factor", "rate_dps", "low", "high");
    for axis in Axis::ALL {
        let rate = cfg.control.test.axis(axis).rate_dps;
        let factor = factors.for_axis(axis);
        let (low, high) = pwm_offsets(rate, factor);
        println!("{:<6} {:>9.3} {:>9.1} {:>6} {:>6}", axis.name(), factor, rate, low, high);
    }
    Ok(())
}

async fn test(cfg: &Config, arm: bool, axes: Vec<Axis>, mut interrupt: Interrupt) -> Result<()> {
    let mut control = cfg.control.clone();
    if !axes.is_empty() {
        control.test.axes = axes;
    }
    plane_ctl::doctor::check_control(&control, modes::is_known)?;

    let mut sink = event_sink(cfg)?;
    let mut link = connect(&cfg.fc).await?;

    let res = run_test(&mut link, &control, arm, &mut sink, &mut interrupt).await;
    finish(&mut link, &control, &mut sink);
    conclude(res)
}

async fn run_test(
    link: &mut FcLink,
    control: &ControlConfig,
    arm: bool,
    sink: &mut FanoutSink,
    interrupt: &mut Interrupt,
) -> Result<(), ControlError> {
    if arm {
        prepare(link, control, sink, interrupt).await?;
    }
    let factors = resolve_factors(link, &control.calibration, sink).await;

    let report = AxisTestSequencer::new(
        link,
        &control.test,
        &control.modes,
        control.gate.gate(),
        factors,
        sink,
        interrupt.clone(),
    )
    .run()
    .await?;

    for axis in &report.axes {
        match &axis.error {
            None => {
                let applied: Vec<String> = axis.applied.iter().map(|(x, p)| format!("{:?}={}", x, p)).collect();
                println!("{:<6} OK    {}", axis.axis.name(), applied.join(" "));
            }
            Some(e) => println!("{:<6} FAIL  {}", axis.axis.name(), e),
        }
    }
    if report.aborted {
        println!("sequence aborted after first failure");
    }
    Ok(())
}

async fn acro(cfg: &Config, arm: bool, trigger: InterruptTrigger, mut interrupt: Interrupt) -> Result<()> {
    plane_ctl::doctor::check_control(&cfg.control, modes::is_known)?;
    let control = &cfg.control;

    let mut sink = event_sink(cfg)?;
    let mut link = connect(&cfg.fc).await?;

    let res = run_acro(&mut link, control, arm, &mut sink, trigger, &mut interrupt).await;
    finish(&mut link, control, &mut sink);
    conclude(res)
}

async fn run_acro(
    link: &mut FcLink,
    control: &ControlConfig,
    arm: bool,
    sink: &mut FanoutSink,
    trigger: InterruptTrigger,
    interrupt: &mut Interrupt,
) -> Result<(), ControlError> {
    if arm {
        prepare(link, control, sink, interrupt).await?;
    }
    let _ = resolve_factors(link, &control.calibration, sink).await;

    let t = &control.teleop;
    println!(
        "teleop: roll {}/{} pitch {}/{} yaw {}/{} throttle {}/{}; Esc or Ctrl-C to stop",
        t.roll.decrease, t.roll.increase, t.pitch.decrease, t.pitch.increase,
        t.yaw.decrease, t.yaw.increase, t.throttle.decrease, t.throttle.increase,
    );
    for mk in &t.mode_keys {
        println!("  {} -> {}", mk.key, mk.mode);
    }

    let mut keyboard = TerminalKeyboard::open(Duration::from_millis(t.key_hold_ms), trigger)?;
    let summary = TeleopLoop::new(t, &control.modes.manual_rate)
        .run(link, &mut keyboard, sink, interrupt)
        .await;
    drop(keyboard);

    let summary = summary?;
    info!("teleop: {} ticks, {} with overrides applied", summary.ticks, summary.applied_ticks);
    Ok(())
}

/// Arm in the arm mode, then set the target airspeed if one is configured.
async fn prepare(
    link: &mut FcLink,
    control: &ControlConfig,
    sink: &mut FanoutSink,
    interrupt: &mut Interrupt,
) -> Result<(), ControlError> {
    arm_and_wait(link, &control.arming, &control.modes.arm, control.gate.gate(), sink, interrupt).await?;
    if let Some(airspeed) = control.target_airspeed {
        link.change_speed(airspeed)?;
    }
    Ok(())
}

/// Runs on every exit path once the link is up.
fn finish(link: &mut FcLink, control: &ControlConfig, sink: &mut FanoutSink) {
    if let Err(e) = link.clear_all_overrides() {
        warn!("final override clear failed: {:#}", e);
    }
    if let Some(mode) = control.modes.finish_mode() {
        match link.request_mode(mode) {
            Ok(()) => {
                sink.emit(ControlEvent::new(EventKind::ModeRequested, "finish mode").mode(mode));
            }
            Err(e) => warn!("requesting finish mode {} failed: {:#}", mode, e),
        }
    }
}

fn conclude(res: Result<(), ControlError>) -> Result<()> {
    match res {
        Ok(()) => Ok(()),
        Err(ControlError::ExternalInterrupt) => {
            info!("stopped by operator");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn monitor(cfg: &Config, rate_hz: u16, mut interrupt: Interrupt) -> Result<()> {
    let mut sink = event_sink(cfg)?;
    let mut link = connect(&cfg.fc).await?;
    link.request_telemetry_streams(rate_hz)?;

    loop {
        let st = link.status();
        if let Some(imu) = st.imu {
            sink.record(&Telemetry::Imu(imu).to_event())?;
        }
        if let Some(gps) = st.gps {
            sink.record(&Telemetry::Gps(gps).to_event())?;
        }
        let mode = st.mode.unwrap_or_else(|| "?".into());
        sink.record(&ControlEvent::new(EventKind::Status, format!("armed={}", st.armed)).mode(mode))?;

        match interrupt.sleep(Duration::from_secs(1)).await {
            Ok(()) => {}
            Err(ControlError::ExternalInterrupt) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let fc = &cfg.fc;
            let res = autodetect_fc(
                fc.candidate_devs.clone().unwrap_or_else(default_candidate_devs),
                fc.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds),
                Duration::from_millis(fc.heartbeat_timeout_ms),
                fc,
            )?;
            if let Some((dev, baud)) = res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            for p in res.probes {
                println!("probe dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
        FcCmd::Status => {
            let link = connect(&cfg.fc).await?;
            let st = link.status();
            println!("endpoint={:?}", st.endpoint);
            println!("connected={}", st.connected);
            println!("last_heartbeat_age={:?}", st.hb_age());
            println!("mode={:?} (custom_mode={:?})", st.mode, st.custom_mode);
            println!("armed={} ready={} armable={}", st.armed, st.system_ready, link.is_armable());
            println!("gps={:?}", st.gps);
            println!("last_text={:?}", st.last_msg);
            Ok(())
        }
    }
}
