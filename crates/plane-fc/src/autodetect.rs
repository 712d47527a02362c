use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::mav::FcLink;
use crate::{serial_address, FcConfig};

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 230400, 921600]
}

/// Try every device/baud pair until one yields an autopilot heartbeat.
pub fn autodetect_fc(
    candidate_devs: Vec<String>,
    candidate_bauds: Vec<u32>,
    heartbeat_timeout: Duration,
    cfg: &FcConfig,
) -> Result<AutodetectResult> {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        for baud in &candidate_bauds {
            let start = Instant::now();
            let (hb_seen, note) = match FcLink::open(&serial_address(&dev, *baud), cfg) {
                Ok(link) => {
                    let mut seen = false;
                    while start.elapsed() < heartbeat_timeout {
                        if link.status().last_heartbeat.is_some() {
                            seen = true;
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(25));
                    }
                    let note = if seen { "heartbeat".to_string() } else { "no heartbeat".to_string() };
                    (seen, note)
                }
                Err(e) => {
                    warn!("fc autodetect probe failed dev={} baud={} err={:#}", dev, baud, e);
                    (false, format!("open/connect failed: {:#}", e))
                }
            };

            probes.push(ProbeResult {
                dev: dev.clone(),
                baud: *baud,
                hb_seen,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });

            if hb_seen {
                info!("fc autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev, *baud)), probes });
            }
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_devices_are_reported_not_chosen() {
        let res = autodetect_fc(
            vec!["/dev/planectl-does-not-exist".into()],
            vec![57600, 115200],
            Duration::from_millis(50),
            &FcConfig::default(),
        )
        .unwrap();
        assert!(res.chosen.is_none());
        assert_eq!(res.probes.len(), 2);
        assert!(res.probes.iter().all(|p| !p.hb_seen && p.note.starts_with("open/connect failed")));
    }
}
