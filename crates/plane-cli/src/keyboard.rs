use anyhow::{Context, Result};
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use crossterm::tty::IsTty;
use std::io::{stdin, stdout};
use std::time::Duration;
use tokio::time::Instant;

use plane_ctl::input::{HeldKeys, InputSource, Key, KeySet};
use plane_ctl::interrupt::InterruptTrigger;

/// Raw-mode terminal keyboard. Esc and Ctrl-C raise the operator interrupt; the terminal is
/// restored on drop.
pub struct TerminalKeyboard {
    held: HeldKeys,
    trigger: InterruptTrigger,
    enhanced: bool,
}

impl TerminalKeyboard {
    pub fn open(hold: Duration, trigger: InterruptTrigger) -> Result<Self> {
        anyhow::ensure!(stdin().is_tty(), "teleop needs an interactive terminal");
        enable_raw_mode().context("enable raw mode")?;

        // release events only arrive with the kitty protocol
        let enhanced = matches!(terminal::supports_keyboard_enhancement(), Ok(true))
            && execute!(stdout(), PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)).is_ok();

        Ok(Self { held: HeldKeys::new(hold), trigger, enhanced })
    }

    fn handle(&mut self, k: KeyEvent, now: Instant) {
        let ctrl_c = k.modifiers.contains(KeyModifiers::CONTROL) && matches!(k.code, KeyCode::Char('c' | 'C'));
        if ctrl_c || k.code == KeyCode::Esc {
            if k.kind != KeyEventKind::Release {
                self.trigger.raise();
            }
            return;
        }

        let Some(key) = map_key(k.code) else { return };
        match k.kind {
            KeyEventKind::Release => self.held.release(key),
            KeyEventKind::Press | KeyEventKind::Repeat => self.held.press(key, now),
        }
    }
}

impl InputSource for TerminalKeyboard {
    fn sample(&mut self) -> Result<KeySet> {
        let now = Instant::now();
        while event::poll(Duration::ZERO).context("poll terminal")? {
            if let Event::Key(k) = event::read().context("read terminal")? {
                self.handle(k, now);
            }
        }
        Ok(self.held.held_at(now))
    }
}

impl Drop for TerminalKeyboard {
    fn drop(&mut self) {
        if self.enhanced {
            let _ = execute!(stdout(), PopKeyboardEnhancementFlags);
        }
        let _ = disable_raw_mode();
    }
}

pub fn map_key(code: KeyCode) -> Option<Key> {
    let key = match code {
        KeyCode::Char(' ') => Key::Space,
        KeyCode::Char(c) => Key::Char(c.to_ascii_lowercase()),
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_codes_map_to_config_keys() {
        assert_eq!(map_key(KeyCode::Char('W')), Some(Key::Char('w')));
        assert_eq!(map_key(KeyCode::Char(' ')), Some(Key::Space));
        assert_eq!(map_key(KeyCode::PageUp), Some(Key::PageUp));
        assert_eq!(map_key(KeyCode::F(1)), None);
        assert_eq!(map_key(KeyCode::Tab), None);
    }
}
