use anyhow::Result;

use crate::channel::{Channel, OverrideVector};
use crate::pwm::Pwm;
use crate::session::OverrideLease;

/// What the control core needs from an autopilot link.
///
/// Mode reads are served from cached state (heartbeats), so they never block. Mode
/// requests are fire-and-forget; use `gate::ModeGate` to wait for arrival.
#[allow(async_fn_in_trait)]
pub trait Vehicle {
    /// Current flight mode name, `None` until the autopilot has reported one.
    fn mode(&self) -> Option<String>;

    fn request_mode(&mut self, mode: &str) -> Result<()>;

    fn set_channel_override(&mut self, channel: Channel, value: Option<Pwm>) -> Result<()>;

    fn clear_all_overrides(&mut self) -> Result<()>;

    /// Push a whole vector. Links that can send all channels in one frame should override
    /// this.
    fn apply_overrides(&mut self, vector: &OverrideVector) -> Result<()> {
        for (ch, value) in vector.iter() {
            self.set_channel_override(ch, value)?;
        }
        Ok(())
    }

    /// Read a named autopilot parameter. `Ok(None)` when the autopilot does not answer
    /// within the link's read budget or does not know the name.
    async fn parameter(&mut self, name: &str) -> Result<Option<f32>>;

    fn is_armable(&self) -> bool;

    fn arm(&mut self) -> Result<()>;

    fn armed(&self) -> bool;

    /// Claim shared by every handle on this vehicle; guards against two override sessions.
    fn override_lease(&self) -> &OverrideLease;
}

pub(crate) fn mode_matches(current: Option<&str>, target: &str) -> bool {
    current.map(|m| m.eq_ignore_ascii_case(target)).unwrap_or(false)
}
