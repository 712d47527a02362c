use anyhow::{Context, Result};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavDataStream, MavMessage, MavModeFlag, MavState, MavType, COMMAND_LONG_DATA,
        HEARTBEAT_DATA, PARAM_REQUEST_READ_DATA, RC_CHANNELS_OVERRIDE_DATA, REQUEST_DATA_STREAM_DATA,
    },
    MavConnection, MavHeader,
};
use plane_ctl::channel::{Channel, OverrideVector};
use plane_ctl::pwm::Pwm;
use plane_ctl::session::OverrideLease;
use plane_ctl::Vehicle;
use plane_proto::telemetry::{GpsSample, ImuSample};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::modes;
use crate::safety::CommandRateLimit;
use crate::state::FcStatus;
use crate::FcConfig;

const PARAM_RETRY: Duration = Duration::from_millis(1_000);

type Conn = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

/// State shared with the background threads.
struct Shared {
    conn: Conn,
    hdr: Mutex<MavHeader>,
    status: Mutex<FcStatus>,
    /// Last RC override frame sent, re-sent by the keeper while any channel is overridden.
    rc_frame: Mutex<Option<[u16; 8]>>,
    stop: AtomicBool,
    target_sys: u8,
    target_comp: u8,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn send(&self, msg: &MavMessage) -> Result<()> {
        let hdr = {
            let mut h = lock(&self.hdr);
            h.sequence = h.sequence.wrapping_add(1);
            h.clone()
        };
        self.conn.send(&hdr, msg).context("mavlink send")?;
        Ok(())
    }

    fn rc_override(&self, frame: [u16; 8]) -> MavMessage {
        MavMessage::RC_CHANNELS_OVERRIDE(RC_CHANNELS_OVERRIDE_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            chan1_raw: frame[0],
            chan2_raw: frame[1],
            chan3_raw: frame[2],
            chan4_raw: frame[3],
            chan5_raw: frame[4],
            chan6_raw: frame[5],
            chan7_raw: frame[6],
            chan8_raw: frame[7],
            ..Default::default()
        })
    }
}

/// MAVLink link to an ArduPlane autopilot.
///
/// A reader thread keeps `FcStatus` current from incoming traffic; a keeper thread sends the
/// companion heartbeat and refreshes the active RC override frame. Everything that commands
/// the vehicle goes through `&mut self`.
pub struct FcLink {
    shared: Arc<Shared>,
    overrides: OverrideVector,
    limiter: CommandRateLimit,
    lease: OverrideLease,
    param_timeout: Duration,
    require_gps: bool,
}

impl FcLink {
    /// Resolve the configured endpoint (address, fixed serial or autodetect) and open it.
    pub fn connect(cfg: &FcConfig) -> Result<Self> {
        let address = cfg.resolve_address()?;
        Self::open(&address, cfg)
    }

    pub fn open(address: &str, cfg: &FcConfig) -> Result<Self> {
        if let Some((dev, baud)) = address.strip_prefix("serial:").and_then(|s| s.rsplit_once(':')) {
            // quick validate device
            let baud: u32 = baud.parse().with_context(|| format!("bad baud in {}", address))?;
            let _ = tokio_serial::new(dev, baud)
                .open_native_async()
                .with_context(|| format!("open fc serial device {}", dev))?;
        }

        let conn: Conn = Arc::from(
            mavlink::connect::<MavMessage>(address).with_context(|| format!("mavlink connect {}", address))?,
        );

        let status = FcStatus { endpoint: Some(address.to_string()), ..Default::default() };
        let shared = Arc::new(Shared {
            conn,
            hdr: Mutex::new(MavHeader { system_id: cfg.sys_id, component_id: cfg.comp_id, sequence: 0 }),
            status: Mutex::new(status),
            rc_frame: Mutex::new(None),
            stop: AtomicBool::new(false),
            target_sys: cfg.target_sys,
            target_comp: cfg.target_comp,
        });

        // mavlink recv blocks, so these are plain threads rather than runtime tasks
        let reader = shared.clone();
        std::thread::Builder::new()
            .name("mav-reader".into())
            .spawn(move || reader_loop(reader))
            .context("spawn mavlink reader")?;

        let keeper = shared.clone();
        let hb_interval = cfg.heartbeat_interval();
        let refresh = Duration::from_millis(cfg.override_refresh_ms.max(50));
        std::thread::Builder::new()
            .name("mav-keeper".into())
            .spawn(move || keeper_loop(keeper, hb_interval, refresh))
            .context("spawn mavlink keeper")?;

        info!("fc: link open on {}", address);
        Ok(Self {
            shared,
            overrides: OverrideVector::released(),
            limiter: CommandRateLimit::new(Duration::from_millis(cfg.mode_request_interval_ms)),
            lease: OverrideLease::new(),
            param_timeout: Duration::from_millis(cfg.param_timeout_ms),
            require_gps: cfg.require_gps,
        })
    }

    pub fn status(&self) -> FcStatus {
        lock(&self.shared.status).clone()
    }

    pub async fn wait_heartbeat(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if lock(&self.shared.status).last_heartbeat.is_some() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("no autopilot heartbeat within {:?}", timeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// MAV_CMD_DO_CHANGE_SPEED with airspeed as the speed type.
    pub fn change_speed(&mut self, airspeed: f32) -> Result<()> {
        info!("FC: target airspeed {:.1} m/s", airspeed);
        self.command_long(MavCmd::MAV_CMD_DO_CHANGE_SPEED, [0.0, airspeed, -1.0, 0.0, 0.0, 0.0, 0.0])
    }

    pub fn request_data_stream(&mut self, stream: MavDataStream, rate_hz: u16) -> Result<()> {
        debug!("FC: request stream {:?} at {} Hz", stream, rate_hz);
        let msg = MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
            req_message_rate: rate_hz,
            target_system: self.shared.target_sys,
            target_component: self.shared.target_comp,
            req_stream_id: stream as u8,
            start_stop: 1,
        });
        self.shared.send(&msg)
    }

    /// RAW_SENSORS (RAW_IMU) and POSITION (GPS_RAW_INT) at `rate_hz`.
    pub fn request_telemetry_streams(&mut self, rate_hz: u16) -> Result<()> {
        self.request_data_stream(MavDataStream::MAV_DATA_STREAM_RAW_SENSORS, rate_hz)?;
        self.request_data_stream(MavDataStream::MAV_DATA_STREAM_POSITION, rate_hz)
    }

    fn command_long(&self, command: MavCmd, p: [f32; 7]) -> Result<()> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.shared.target_sys,
            target_component: self.shared.target_comp,
            command,
            confirmation: 0,
            param1: p[0],
            param2: p[1],
            param3: p[2],
            param4: p[3],
            param5: p[4],
            param6: p[5],
            param7: p[6],
        };
        self.shared.send(&MavMessage::COMMAND_LONG(cmd))
    }

    fn send_overrides(&self) -> Result<()> {
        let frame = rc_frame(&self.overrides);
        *lock(&self.shared.rc_frame) = if self.overrides.is_released() { None } else { Some(frame) };
        self.shared.send(&self.shared.rc_override(frame))
    }
}

impl Vehicle for FcLink {
    fn mode(&self) -> Option<String> {
        lock(&self.shared.status).mode.clone()
    }

    fn request_mode(&mut self, mode: &str) -> Result<()> {
        let number = modes::mode_number(mode).with_context(|| format!("unknown ArduPlane mode {}", mode))?;
        if !self.limiter.allow(&mode.to_ascii_uppercase()) {
            debug!("FC: mode request {} rate-limited", mode);
            return Ok(());
        }
        info!("FC: requesting mode {}", mode);
        let base = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
        self.command_long(MavCmd::MAV_CMD_DO_SET_MODE, [base, number as f32, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn set_channel_override(&mut self, channel: Channel, value: Option<Pwm>) -> Result<()> {
        self.overrides.set(channel, value);
        self.send_overrides()
    }

    fn clear_all_overrides(&mut self) -> Result<()> {
        self.overrides.clear();
        self.send_overrides()
    }

    fn apply_overrides(&mut self, vector: &OverrideVector) -> Result<()> {
        self.overrides = *vector;
        self.send_overrides()
    }

    async fn parameter(&mut self, name: &str) -> Result<Option<f32>> {
        lock(&self.shared.status).params.remove(name);
        let req = MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
            param_index: -1,
            target_system: self.shared.target_sys,
            target_component: self.shared.target_comp,
            param_id: param_id(name),
        });

        let start = tokio::time::Instant::now();
        let deadline = start + self.param_timeout;
        let mut next_request = start;
        loop {
            let now = tokio::time::Instant::now();
            if now >= next_request {
                self.shared.send(&req)?;
                next_request = now + PARAM_RETRY;
            }
            let got = lock(&self.shared.status).params.get(name).copied();
            if let Some(v) = got {
                debug!("FC: param {}={} after {:?}", name, v, start.elapsed());
                return Ok(Some(v));
            }
            if now >= deadline {
                warn!("FC: no PARAM_VALUE for {} within {:?}", name, self.param_timeout);
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn is_armable(&self) -> bool {
        lock(&self.shared.status).is_armable(self.require_gps)
    }

    fn arm(&mut self) -> Result<()> {
        info!("FC: sending ARM");
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn armed(&self) -> bool {
        lock(&self.shared.status).armed
    }

    fn override_lease(&self) -> &OverrideLease {
        &self.lease
    }
}

impl Drop for FcLink {
    fn drop(&mut self) {
        if !self.overrides.is_released() {
            self.overrides.clear();
            if let Err(e) = self.send_overrides() {
                warn!("FC: clearing overrides on close failed: {:#}", e);
            }
        }
        self.shared.stop.store(true, Ordering::Relaxed);
    }
}

fn reader_loop(shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::Relaxed) {
        match shared.conn.recv() {
            Ok((hdr, msg)) => {
                if hdr.system_id != shared.target_sys {
                    continue;
                }
                apply_message(&mut lock(&shared.status), &msg);
            }
            Err(e) => {
                debug!("mavlink recv: {:?}", e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

fn keeper_loop(shared: Arc<Shared>, hb_interval: Duration, refresh: Duration) {
    let mut last_hb: Option<Instant> = None;
    let mut last_rc = Instant::now();

    while !shared.stop.load(Ordering::Relaxed) {
        if last_hb.map(|t| t.elapsed() >= hb_interval).unwrap_or(true) {
            if let Err(e) = shared.send(&companion_heartbeat()) {
                debug!("heartbeat send failed: {:#}", e);
            }
            last_hb = Some(Instant::now());
        }

        if last_rc.elapsed() >= refresh {
            let frame = *lock(&shared.rc_frame);
            if let Some(frame) = frame {
                if let Err(e) = shared.send(&shared.rc_override(frame)) {
                    warn!("RC override refresh failed: {:#}", e);
                }
            }
            last_rc = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(20));
    }
}

fn companion_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

/// Fold one autopilot message into the cached status.
pub(crate) fn apply_message(st: &mut FcStatus, msg: &MavMessage) {
    match msg {
        MavMessage::HEARTBEAT(hb) => {
            // other GCS / companion heartbeats on a shared link
            if hb.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID {
                return;
            }
            let mode = modes::display_name(hb.custom_mode);
            if st.mode.as_deref() != Some(mode.as_str()) {
                info!("fc: mode {} (was {:?})", mode, st.mode);
            }
            st.connected = true;
            st.last_heartbeat = Some(Instant::now());
            st.custom_mode = Some(hb.custom_mode);
            st.mode = Some(mode);
            st.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
            st.system_ready = matches!(
                hb.system_status,
                MavState::MAV_STATE_STANDBY
                    | MavState::MAV_STATE_ACTIVE
                    | MavState::MAV_STATE_CRITICAL
                    | MavState::MAV_STATE_EMERGENCY
            );
        }
        MavMessage::PARAM_VALUE(p) => {
            st.params.insert(param_name(&p.param_id), p.param_value);
        }
        MavMessage::GPS_RAW_INT(g) => {
            st.gps = Some(GpsSample::from_raw(g.lat, g.lon, g.alt, g.satellites_visible, g.fix_type.clone() as u8));
        }
        MavMessage::RAW_IMU(r) => {
            st.imu = Some(ImuSample {
                xacc: r.xacc,
                yacc: r.yacc,
                zacc: r.zacc,
                xgyro: r.xgyro,
                ygyro: r.ygyro,
                zgyro: r.zgyro,
                xmag: r.xmag,
                ymag: r.ymag,
                zmag: r.zmag,
            });
        }
        MavMessage::STATUSTEXT(t) => {
            let text = param_name(&t.text);
            info!("fc: {}", text);
            st.last_msg = Some(text);
        }
        _ => {}
    }
}

/// RC1..RC8 frame for RC_CHANNELS_OVERRIDE; 0 hands the channel back to the radio.
pub fn rc_frame(v: &OverrideVector) -> [u16; 8] {
    let mut frame = [0u16; 8];
    for (ch, value) in v.iter() {
        frame[ch.rc_number() as usize - 1] = value.map(Pwm::get).unwrap_or(0);
    }
    frame
}

pub fn param_id(name: &str) -> [u8; 16] {
    let mut id = [0u8; 16];
    let bytes = name.as_bytes();
    let n = bytes.len().min(id.len());
    id[..n].copy_from_slice(&bytes[..n]);
    id
}

/// NUL-padded MAVLink char array to string.
pub fn param_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{GpsFixType, MavParamType, GPS_RAW_INT_DATA, PARAM_VALUE_DATA};

    fn heartbeat(custom_mode: u32, armed: bool, status: MavState) -> MavMessage {
        let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
        if armed {
            base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
        }
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode,
            mavtype: MavType::MAV_TYPE_FIXED_WING,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode,
            system_status: status,
            mavlink_version: 3,
        })
    }

    #[test]
    fn heartbeat_sets_mode_and_armed() {
        let mut st = FcStatus::default();
        apply_message(&mut st, &heartbeat(4, true, MavState::MAV_STATE_ACTIVE));
        assert_eq!(st.mode.as_deref(), Some("ACRO"));
        assert!(st.armed);
        assert!(st.system_ready);
        assert!(st.last_heartbeat.is_some());

        apply_message(&mut st, &heartbeat(2, false, MavState::MAV_STATE_BOOT));
        assert_eq!(st.mode.as_deref(), Some("STABILIZE"));
        assert!(!st.armed);
        assert!(!st.system_ready);
    }

    #[test]
    fn gcs_heartbeat_is_ignored() {
        let mut st = FcStatus::default();
        apply_message(&mut st, &companion_heartbeat());
        assert!(st.mode.is_none());
        assert!(st.last_heartbeat.is_none());
    }

    #[test]
    fn param_value_is_cached_by_name() {
        let mut st = FcStatus::default();
        apply_message(
            &mut st,
            &MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
                param_value: 180.0,
                param_count: 1200,
                param_index: 17,
                param_id: param_id("ACRO_ROLL_RATE"),
                param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
            }),
        );
        assert_eq!(st.params.get("ACRO_ROLL_RATE"), Some(&180.0));
    }

    #[test]
    fn gps_raw_int_is_scaled() {
        let mut st = FcStatus::default();
        apply_message(
            &mut st,
            &MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
                lat: 473_977_420,
                lon: 85_455_940,
                alt: 488_120,
                fix_type: GpsFixType::GPS_FIX_TYPE_3D_FIX,
                satellites_visible: 11,
                ..Default::default()
            }),
        );
        let gps = st.gps.unwrap();
        assert!((gps.lat - 47.397742).abs() < 1e-9);
        assert!((gps.alt_m - 488.12).abs() < 1e-9);
        assert_eq!(gps.fix_type, 3);
        assert_eq!(gps.satellites, 11);
    }

    #[test]
    fn rc_frame_maps_channels_and_releases_with_zero() {
        let mut v = OverrideVector::released();
        v.set(Channel::Roll, Some(Pwm::clamp(1300)));
        v.set(Channel::Throttle, Some(Pwm::clamp(1800)));
        assert_eq!(rc_frame(&v), [1300, 0, 1800, 0, 0, 0, 0, 0]);
        assert_eq!(rc_frame(&OverrideVector::released()), [0; 8]);
    }

    #[test]
    fn param_id_round_trip_and_truncation() {
        assert_eq!(param_name(&param_id("ACRO_YAW_RATE")), "ACRO_YAW_RATE");
        let long = param_id("ABCDEFGHIJKLMNOPQRS");
        assert_eq!(param_name(&long), "ABCDEFGHIJKLMNOP");
    }
}
