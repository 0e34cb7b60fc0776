//! Key names accepted by `browser_press_key` and their DOM event fields.

use chromiumoxide::cdp::browser_protocol::input::DispatchKeyEventType;

use crate::error::{Error, Result};

/// DOM key event fields for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDefinition {
    /// `KeyboardEvent.key`.
    pub key: String,
    /// `KeyboardEvent.code`, empty when the key has no physical code.
    pub code: String,
    /// Windows virtual key code, 0 when unknown.
    pub key_code: i64,
    /// Text the key inserts, if any.
    pub text: Option<String>,
}

impl KeyDefinition {
    /// Definition for a named key (`Enter`, `ArrowLeft`, ...) or a single
    /// character. `None` for anything else.
    pub fn lookup(key: &str) -> Option<Self> {
        let named = |key: &str, code: &str, key_code: i64, text: Option<&str>| Self {
            key: key.into(),
            code: code.into(),
            key_code,
            text: text.map(str::to_string),
        };
        let definition = match key {
            "Enter" => named("Enter", "Enter", 13, Some("\r")),
            "Tab" => named("Tab", "Tab", 9, None),
            "Escape" => named("Escape", "Escape", 27, None),
            "Backspace" => named("Backspace", "Backspace", 8, None),
            "Delete" => named("Delete", "Delete", 46, None),
            "Space" | " " => named(" ", "Space", 32, Some(" ")),
            "ArrowUp" => named("ArrowUp", "ArrowUp", 38, None),
            "ArrowDown" => named("ArrowDown", "ArrowDown", 40, None),
            "ArrowLeft" => named("ArrowLeft", "ArrowLeft", 37, None),
            "ArrowRight" => named("ArrowRight", "ArrowRight", 39, None),
            "Home" => named("Home", "Home", 36, None),
            "End" => named("End", "End", 35, None),
            "PageUp" => named("PageUp", "PageUp", 33, None),
            "PageDown" => named("PageDown", "PageDown", 34, None),
            _ => {
                let mut chars = key.chars();
                let c = chars.next()?;
                if chars.next().is_some() {
                    return None;
                }
                let upper = c.to_ascii_uppercase();
                let (code, key_code) = if c.is_ascii_alphabetic() {
                    (format!("Key{}", upper), upper as i64)
                } else if c.is_ascii_digit() {
                    (format!("Digit{}", c), c as i64)
                } else {
                    (String::new(), 0)
                };
                Self {
                    key: c.to_string(),
                    code,
                    key_code,
                    text: Some(c.to_string()),
                }
            }
        };
        Some(definition)
    }

    /// Like [`KeyDefinition::lookup`], failing with `Unknown key` instead.
    pub fn resolve(key: &str) -> Result<Self> {
        Self::lookup(key).ok_or_else(|| Error::ActionFailed(format!("Unknown key: \"{}\"", key)))
    }

    /// Event type of the press. Keys that insert text send `keyDown` so the
    /// page receives input; the rest send `rawKeyDown`.
    pub fn down_event(&self) -> DispatchKeyEventType {
        if self.text.is_some() {
            DispatchKeyEventType::KeyDown
        } else {
            DispatchKeyEventType::RawKeyDown
        }
    }
}
