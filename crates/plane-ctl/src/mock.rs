//! Scripted in-memory vehicle for tests.

use anyhow::Result;
use std::collections::HashMap;
use tokio::time::Instant;

use crate::channel::{Channel, OverrideVector};
use crate::pwm::Pwm;
use crate::session::OverrideLease;
use crate::vehicle::Vehicle;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    RequestMode(String),
    Set(Channel, Option<u16>),
    Apply([Option<u16>; 4]),
    ClearAll,
    Param(String),
    Arm,
}

pub struct MockVehicle {
    pub mode: Option<String>,
    /// `request_mode` switches `mode` immediately.
    pub follow_requests: bool,
    pub overrides: OverrideVector,
    pub params: HashMap<String, f32>,
    pub param_error: bool,
    pub armable: bool,
    pub armed: bool,
    pub arm_on_request: bool,
    /// The next matching mode request or channel set fails once with a link error.
    pub fail_on: Option<Call>,
    pub calls: Vec<(Instant, Call)>,
    lease: OverrideLease,
}

impl MockVehicle {
    pub fn new(mode: &str) -> Self {
        Self {
            mode: Some(mode.to_string()),
            follow_requests: true,
            overrides: OverrideVector::released(),
            params: HashMap::new(),
            param_error: false,
            armable: true,
            armed: false,
            arm_on_request: true,
            fail_on: None,
            calls: Vec::new(),
            lease: OverrideLease::new(),
        }
    }

    /// A mode that never changes, whatever is requested.
    pub fn stuck(mode: &str) -> Self {
        Self { follow_requests: false, ..Self::new(mode) }
    }

    pub fn with_param(mut self, name: &str, value: f32) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    /// Second handle on the same vehicle: shares the override lease only.
    pub fn handle(&self) -> Self {
        Self { lease: self.lease.clone(), ..Self::new("MANUAL") }
    }

    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|(_, c)| f(c)).count()
    }

    pub fn first_at(&self, f: impl Fn(&Call) -> bool) -> Option<Instant> {
        self.calls.iter().find(|(_, c)| f(c)).map(|(t, _)| *t)
    }

    fn log(&mut self, call: Call) {
        self.calls.push((Instant::now(), call));
    }

    fn injected_failure(&mut self, call: &Call) -> Result<()> {
        if self.fail_on.as_ref() == Some(call) {
            self.fail_on = None;
            anyhow::bail!("link down during {:?}", call);
        }
        Ok(())
    }
}

impl Vehicle for MockVehicle {
    fn mode(&self) -> Option<String> {
        self.mode.clone()
    }

    fn request_mode(&mut self, mode: &str) -> Result<()> {
        let call = Call::RequestMode(mode.to_string());
        self.log(call.clone());
        self.injected_failure(&call)?;
        if self.follow_requests {
            self.mode = Some(mode.to_string());
        }
        Ok(())
    }

    fn set_channel_override(&mut self, channel: Channel, value: Option<Pwm>) -> Result<()> {
        let call = Call::Set(channel, value.map(Pwm::get));
        self.log(call.clone());
        self.injected_failure(&call)?;
        self.overrides.set(channel, value);
        Ok(())
    }

    fn clear_all_overrides(&mut self) -> Result<()> {
        self.log(Call::ClearAll);
        self.overrides.clear();
        Ok(())
    }

    fn apply_overrides(&mut self, vector: &OverrideVector) -> Result<()> {
        self.log(Call::Apply(vector.as_raw()));
        self.overrides = *vector;
        Ok(())
    }

    async fn parameter(&mut self, name: &str) -> Result<Option<f32>> {
        self.log(Call::Param(name.to_string()));
        if self.param_error {
            anyhow::bail!("param read: link down");
        }
        Ok(self.params.get(name).copied())
    }

    fn is_armable(&self) -> bool {
        self.armable
    }

    fn arm(&mut self) -> Result<()> {
        self.log(Call::Arm);
        if self.arm_on_request {
            self.armed = true;
        }
        Ok(())
    }

    fn armed(&self) -> bool {
        self.armed
    }

    fn override_lease(&self) -> &OverrideLease {
        &self.lease
    }
}
