pub mod autodetect;
pub mod mav;
pub mod modes;
pub mod safety;
pub mod state;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::autodetect::{autodetect_fc, default_candidate_bauds, default_candidate_devs};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FcConfig {
    /// Full MAVLink connection string, e.g. "udpin:0.0.0.0:14550" or "tcpout:127.0.0.1:5760"
    /// for SITL. Takes precedence over the serial settings.
    pub address: Option<String>,

    /// Probe candidate serial ports/bauds and pick the first that yields a HEARTBEAT.
    pub autodetect: bool,

    /// When autodetect=false and no address: fixed port config
    pub serial_dev: Option<String>,
    pub baud: Option<u32>,

    /// Autodetect candidates (paths). Example:
    /// ["/dev/serial0","/dev/ttyAMA0","/dev/ttyS0","/dev/ttyUSB0","/dev/ttyACM0"]
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per autodetect probe
    pub heartbeat_timeout_ms: u64,
    /// Wait for the first autopilot heartbeat after connecting
    pub connect_timeout_ms: u64,

    /// MAVLink ids we use (companion/GCS side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (FC side). 1/1 is common for ArduPilot.
    pub target_sys: u8,
    pub target_comp: u8,

    /// Companion heartbeat rate
    pub send_heartbeat_hz: f32,

    pub param_timeout_ms: u64,
    /// RC override frame re-send period while any channel is overridden
    pub override_refresh_ms: u64,
    /// Minimum spacing of identical mode requests
    pub mode_request_interval_ms: u64,

    /// Armable only with a 2D+ GPS fix
    pub require_gps: bool,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            address: None,
            autodetect: false,
            serial_dev: None,
            baud: None,
            candidate_devs: None,
            candidate_bauds: None,
            heartbeat_timeout_ms: 1_500,
            connect_timeout_ms: 10_000,
            sys_id: 255,
            comp_id: 190,
            target_sys: 1,
            target_comp: 1,
            send_heartbeat_hz: 1.0,
            param_timeout_ms: 3_000,
            override_refresh_ms: 500,
            mode_request_interval_ms: 500,
            require_gps: true,
        }
    }
}

impl FcConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.send_heartbeat_hz.max(0.2))
    }

    /// Connection string for `mavlink::connect`, running serial autodetect if configured.
    pub fn resolve_address(&self) -> Result<String> {
        if let Some(addr) = self.address.as_ref().filter(|a| !a.is_empty()) {
            return Ok(addr.clone());
        }
        if self.autodetect {
            let res = autodetect_fc(
                self.candidate_devs.clone().unwrap_or_else(default_candidate_devs),
                self.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds),
                Duration::from_millis(self.heartbeat_timeout_ms),
                self,
            )?;
            let (dev, baud) = res.chosen.context("fc autodetect failed: no heartbeat found")?;
            return Ok(serial_address(&dev, baud));
        }
        let dev = self.serial_dev.as_ref().context("fc.serial_dev missing (no address, autodetect=false)")?;
        let baud = self.baud.context("fc.baud missing (no address, autodetect=false)")?;
        Ok(serial_address(dev, baud))
    }

    /// Static checks for `doctor`.
    pub fn validate(&self) -> Result<()> {
        let has_addr = self.address.as_ref().map(|a| !a.is_empty()).unwrap_or(false);
        if !has_addr && !self.autodetect {
            anyhow::ensure!(
                self.serial_dev.as_ref().map(|s| !s.is_empty()).unwrap_or(false),
                "fc.serial_dev missing"
            );
            anyhow::ensure!(self.baud.unwrap_or(0) > 0, "fc.baud invalid");
        }
        anyhow::ensure!(self.send_heartbeat_hz > 0.0, "fc.send_heartbeat_hz must be > 0");
        anyhow::ensure!(self.param_timeout_ms > 0, "fc.param_timeout_ms must be > 0");
        anyhow::ensure!(self.override_refresh_ms > 0, "fc.override_refresh_ms must be > 0");
        anyhow::ensure!(self.connect_timeout_ms > 0, "fc.connect_timeout_ms must be > 0");
        Ok(())
    }
}

pub fn serial_address(dev: &str, baud: u32) -> String {
    format!("serial:{}:{}", dev, baud)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_wins_over_serial() {
        let cfg = FcConfig {
            address: Some("udpin:0.0.0.0:14550".into()),
            serial_dev: Some("/dev/ttyACM0".into()),
            baud: Some(115_200),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_address().unwrap(), "udpin:0.0.0.0:14550");
    }

    #[test]
    fn fixed_serial_port() {
        let cfg: FcConfig = toml::from_str("serial_dev = \"/dev/ttyAMA0\"\nbaud = 57600").unwrap();
        assert_eq!(cfg.resolve_address().unwrap(), "serial:/dev/ttyAMA0:57600");
        assert_eq!(cfg.target_sys, 1);
        cfg.validate().unwrap();
    }

    #[test]
    fn missing_port_is_rejected() {
        let cfg = FcConfig::default();
        assert!(cfg.resolve_address().is_err());
        assert!(cfg.validate().is_err());
    }
}
