// Physical input simulation for the local backend.
use crate::errors::{DeskAgentError, DeskAgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Super,
}

/// A key press with optional held modifiers, e.g. `ctrl+shift+t`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chord {
    pub modifiers: Vec<Modifier>,
    /// Lower-cased key name, or the single character as given.
    pub key: String,
}

/// Splits an xdotool-style key spec into modifiers and the final key.
pub fn parse_chord(spec: &str) -> DeskAgentResult<Chord> {
    let spec = spec.trim();
    // "+" alone, or a chord ending in "+", means the plus key itself.
    let (head, key) = match spec.strip_suffix("++") {
        Some(head) => (head, "+"),
        None if spec == "+" => ("", "+"),
        None => match spec.rsplit_once('+') {
            Some((head, key)) => (head, key),
            None => ("", spec),
        },
    };
    if key.is_empty() {
        return Err(DeskAgentError::Validation(format!("Empty key in '{spec}'")));
    }

    let mut modifiers = Vec::new();
    for part in head.split('+').filter(|p| !p.is_empty()) {
        let modifier = match part.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Modifier::Ctrl,
            "alt" | "option" => Modifier::Alt,
            "shift" => Modifier::Shift,
            "super" | "meta" | "cmd" | "win" => Modifier::Super,
            other => {
                return Err(DeskAgentError::Validation(format!(
                    "Unknown modifier '{other}' in '{spec}'"
                )))
            }
        };
        modifiers.push(modifier);
    }

    let key = if key.chars().count() == 1 {
        key.to_string()
    } else {
        key.to_ascii_lowercase()
    };
    Ok(Chord { modifiers, key })
}

#[cfg(feature = "local")]
mod enigo_backend {
    use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

    use super::{parse_chord, Modifier};
    use crate::errors::{DeskAgentError, DeskAgentResult};
    use crate::executor::handle::ScrollDirection;

    fn input_err(e: impl std::fmt::Display) -> DeskAgentError {
        DeskAgentError::Desktop(e.to_string())
    }

    /// Runs `f` against a fresh enigo connection on the blocking pool.
    async fn with_enigo<F>(f: F) -> DeskAgentResult<()>
    where
        F: FnOnce(&mut Enigo) -> DeskAgentResult<()> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut enigo = Enigo::new(&Settings::default()).map_err(input_err)?;
            f(&mut enigo)
        })
        .await
        .map_err(|e| DeskAgentError::Desktop(format!("input task: {e}")))?
    }

    fn named_key(name: &str) -> DeskAgentResult<Key> {
        let key = match name {
            "enter" | "return" => Key::Return,
            "tab" => Key::Tab,
            "escape" | "esc" => Key::Escape,
            "backspace" => Key::Backspace,
            "delete" | "del" => Key::Delete,
            "space" => Key::Space,
            "up" => Key::UpArrow,
            "down" => Key::DownArrow,
            "left" => Key::LeftArrow,
            "right" => Key::RightArrow,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" | "page_up" => Key::PageUp,
            "pagedown" | "page_down" => Key::PageDown,
            "f1" => Key::F1,
            "f2" => Key::F2,
            "f3" => Key::F3,
            "f4" => Key::F4,
            "f5" => Key::F5,
            "f6" => Key::F6,
            "f7" => Key::F7,
            "f8" => Key::F8,
            "f9" => Key::F9,
            "f10" => Key::F10,
            "f11" => Key::F11,
            "f12" => Key::F12,
            single if single.chars().count() == 1 => {
                Key::Unicode(single.chars().next().unwrap_or(' '))
            }
            other => return Err(DeskAgentError::Desktop(format!("unknown key '{other}'"))),
        };
        Ok(key)
    }

    fn modifier_key(m: Modifier) -> Key {
        match m {
            Modifier::Ctrl => Key::Control,
            Modifier::Alt => Key::Alt,
            Modifier::Shift => Key::Shift,
            Modifier::Super => Key::Meta,
        }
    }

    pub async fn move_mouse(x: i32, y: i32) -> DeskAgentResult<()> {
        with_enigo(move |e| e.move_mouse(x, y, Coordinate::Abs).map_err(input_err)).await
    }

    pub async fn click(button: Button, count: u32) -> DeskAgentResult<()> {
        with_enigo(move |e| {
            for _ in 0..count {
                e.button(button, Direction::Click).map_err(input_err)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn type_text(text: String) -> DeskAgentResult<()> {
        with_enigo(move |e| e.text(&text).map_err(input_err)).await
    }

    pub async fn press_key(spec: String) -> DeskAgentResult<()> {
        let chord = parse_chord(&spec)?;
        let key = named_key(&chord.key)?;
        with_enigo(move |e| {
            for m in &chord.modifiers {
                e.key(modifier_key(*m), Direction::Press).map_err(input_err)?;
            }
            let pressed = e.key(key, Direction::Click).map_err(input_err);
            for m in chord.modifiers.iter().rev() {
                e.key(modifier_key(*m), Direction::Release).map_err(input_err)?;
            }
            pressed
        })
        .await
    }

    pub async fn scroll(direction: ScrollDirection, amount: u32) -> DeskAgentResult<()> {
        let amount = i32::try_from(amount).unwrap_or(i32::MAX);
        let length = match direction {
            ScrollDirection::Up => -amount,
            ScrollDirection::Down => amount,
        };
        with_enigo(move |e| e.scroll(length, Axis::Vertical).map_err(input_err)).await
    }

    pub async fn drag(from: (i32, i32), to: (i32, i32)) -> DeskAgentResult<()> {
        with_enigo(move |e| {
            e.move_mouse(from.0, from.1, Coordinate::Abs).map_err(input_err)?;
            e.button(Button::Left, Direction::Press).map_err(input_err)?;
            let moved = e.move_mouse(to.0, to.1, Coordinate::Abs).map_err(input_err);
            e.button(Button::Left, Direction::Release).map_err(input_err)?;
            moved
        })
        .await
    }
}

#[cfg(feature = "local")]
pub use enigo_backend::{click, drag, move_mouse, press_key, scroll, type_text};
