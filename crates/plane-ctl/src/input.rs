use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Operator key, as named in config: a single character or one of
/// `up`, `down`, `left`, `right`, `space`, `pageup`, `pagedown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Key {
    Char(char),
    Up,
    Down,
    Left,
    Right,
    Space,
    PageUp,
    PageDown,
}

impl std::str::FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let key = match lower.as_str() {
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "space" => Key::Space,
            "pageup" => Key::PageUp,
            "pagedown" => Key::PageDown,
            _ => {
                let mut chars = lower.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    _ => return Err(format!("unknown key name: {:?}", s)),
                }
            }
        };
        Ok(key)
    }
}

impl TryFrom<String> for Key {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Key> for String {
    fn from(k: Key) -> Self {
        k.to_string()
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{}", c),
            Key::Up => write!(f, "up"),
            Key::Down => write!(f, "down"),
            Key::Left => write!(f, "left"),
            Key::Right => write!(f, "right"),
            Key::Space => write!(f, "space"),
            Key::PageUp => write!(f, "pageup"),
            Key::PageDown => write!(f, "pagedown"),
        }
    }
}

/// Keys held down at the moment of sampling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet(HashSet<Key>);

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_down(&self, key: Key) -> bool {
        self.0.contains(&key)
    }

    pub fn insert(&mut self, key: Key) {
        self.0.insert(key);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Key> for KeySet {
    fn from_iter<T: IntoIterator<Item = Key>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Anything that can report which keys are down, sampled once per teleop tick.
pub trait InputSource {
    fn sample(&mut self) -> Result<KeySet>;
}

/// Turns press/repeat/release events into a held-key set.
///
/// Terminals report presses and auto-repeats but usually no releases, so a key stays held
/// for `hold` after its last event unless a release arrives first.
#[derive(Debug, Clone)]
pub struct HeldKeys {
    hold: Duration,
    last_seen: HashMap<Key, Instant>,
}

impl HeldKeys {
    pub fn new(hold: Duration) -> Self {
        Self { hold, last_seen: HashMap::new() }
    }

    pub fn press(&mut self, key: Key, at: Instant) {
        self.last_seen.insert(key, at);
    }

    pub fn release(&mut self, key: Key) {
        self.last_seen.remove(&key);
    }

    pub fn held_at(&mut self, now: Instant) -> KeySet {
        let hold = self.hold;
        self.last_seen.retain(|_, t| now.saturating_duration_since(*t) <= hold);
        self.last_seen.keys().copied().collect()
    }
}
