use serde::{Deserialize, Serialize};

use crate::pwm::Pwm;

/// RC input channels we override. Discriminant order matches RC1..RC4 on ArduPlane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Roll,
    Pitch,
    Throttle,
    Yaw,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Roll, Channel::Pitch, Channel::Throttle, Channel::Yaw];

    /// Zero-based slot, RC1 = 0.
    pub fn index(self) -> usize {
        match self {
            Channel::Roll => 0,
            Channel::Pitch => 1,
            Channel::Throttle => 2,
            Channel::Yaw => 3,
        }
    }

    pub fn rc_number(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Roll => "roll",
            Channel::Pitch => "pitch",
            Channel::Throttle => "throttle",
            Channel::Yaw => "yaw",
        }
    }
}

/// A rotational control axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Roll,
    Pitch,
    Yaw,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Roll, Axis::Pitch, Axis::Yaw];

    pub fn channel(self) -> Channel {
        match self {
            Axis::Roll => Channel::Roll,
            Axis::Pitch => Channel::Pitch,
            Axis::Yaw => Channel::Yaw,
        }
    }

    pub fn name(self) -> &'static str {
        self.channel().name()
    }
}

impl std::str::FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "roll" => Ok(Axis::Roll),
            "pitch" => Ok(Axis::Pitch),
            "yaw" => Ok(Axis::Yaw),
            other => Err(format!("unknown axis: {}", other)),
        }
    }
}

/// Per-channel override state. `None` leaves the channel to the flight controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverrideVector {
    slots: [Option<Pwm>; 4],
}

impl OverrideVector {
    /// No channel overridden.
    pub fn released() -> Self {
        Self::default()
    }

    /// Every channel overridden at neutral.
    pub fn neutral() -> Self {
        Self { slots: [Some(Pwm::NEUTRAL); 4] }
    }

    pub fn get(&self, ch: Channel) -> Option<Pwm> {
        self.slots[ch.index()]
    }

    pub fn set(&mut self, ch: Channel, value: Option<Pwm>) {
        self.slots[ch.index()] = value;
    }

    pub fn clear(&mut self) {
        self.slots = [None; 4];
    }

    pub fn is_released(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, Option<Pwm>)> + '_ {
        Channel::ALL.iter().map(move |&ch| (ch, self.get(ch)))
    }

    /// Raw RC1..RC4 values for logging.
    pub fn as_raw(&self) -> [Option<u16>; 4] {
        self.slots.map(|s| s.map(Pwm::get))
    }
}
