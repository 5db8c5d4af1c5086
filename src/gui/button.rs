use uuid::Uuid;

use super::records::{CheckBoxButtonRecord, SimpleButtonRecord};
use super::registry::{Registered, TAG_LEN};

/// First char of every callback token produced by windows.
pub const SIGNATURE: char = '~';

const WINDOW_ID_LEN: usize = 16;
const NONCE_LEN: usize = 32;
const TOKEN_LEN: usize = 1 + TAG_LEN + WINDOW_ID_LEN + TAG_LEN + NONCE_LEN;

/// Parsed callback data: `~`, window tag, window id as 16 hex digits, button
/// tag, 32 hex digits of randomness. 57 bytes, under the 64-byte limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackToken {
    pub raw: String,
    pub window_tag: String,
    pub window_id: i64,
    pub button_tag: String,
}

impl CallbackToken {
    pub fn generate(window_tag: &str, window_id: i64, button_tag: &str) -> String {
        format!(
            "{}{}{:016x}{}{}",
            SIGNATURE,
            window_tag,
            window_id,
            button_tag,
            Uuid::new_v4().simple()
        )
    }

    pub fn parse(data: &str) -> Option<CallbackToken> {
        if data.len() != TOKEN_LEN || !data.is_ascii() || !data.starts_with(SIGNATURE) {
            return None;
        }
        let window_tag = &data[1..1 + TAG_LEN];
        let id_start = 1 + TAG_LEN;
        let window_id = u64::from_str_radix(&data[id_start..id_start + WINDOW_ID_LEN], 16).ok()?;
        let tag_start = id_start + WINDOW_ID_LEN;
        let button_tag = &data[tag_start..tag_start + TAG_LEN];
        Some(CallbackToken {
            raw: data.to_string(),
            window_tag: window_tag.to_string(),
            window_id: i64::from_ne_bytes(window_id.to_ne_bytes()),
            button_tag: button_tag.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonKind {
    Simple,
    CheckBox,
}

impl ButtonKind {
    pub const ALL: [ButtonKind; 2] = [ButtonKind::Simple, ButtonKind::CheckBox];
}

impl Registered for ButtonKind {
    fn tag(&self) -> &str {
        match self {
            ButtonKind::Simple => "SBTN",
            ButtonKind::CheckBox => "CBOX",
        }
    }

    fn name(&self) -> &str {
        match self {
            ButtonKind::Simple => "SimpleButton",
            ButtonKind::CheckBox => "CheckBoxButton",
        }
    }
}

/// A button activation as seen by the owning tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonPress {
    pub callback: String,
    pub arg: String,
    /// New state of a check box.
    pub checked: Option<bool>,
    pub row: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleButton {
    pub text: String,
    pub row: SimpleButtonRecord,
}

impl SimpleButton {
    pub fn new(text: impl Into<String>, callback: &str, arg: impl ToString) -> Self {
        SimpleButton {
            text: text.into(),
            row: SimpleButtonRecord {
                id: None,
                window_id: 0,
                callback_data: String::new(),
                callback_name: callback.to_string(),
                arg: arg.to_string(),
                name: None,
            },
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.row.name = Some(name.to_string());
        self
    }

    pub(super) fn press(&self, row: usize, column: usize) -> ButtonPress {
        ButtonPress {
            callback: self.row.callback_name.clone(),
            arg: self.row.arg.clone(),
            checked: None,
            row,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckBoxButton {
    pub row: CheckBoxButtonRecord,
}

impl CheckBoxButton {
    pub fn new(text: impl Into<String>, callback: &str, arg: impl ToString, checked: bool) -> Self {
        CheckBoxButton {
            row: CheckBoxButtonRecord {
                id: None,
                window_id: 0,
                callback_data: String::new(),
                callback_name: callback.to_string(),
                arg: arg.to_string(),
                name: None,
                text: text.into(),
                is_checked: checked,
                checked_prefix: "☑ ".to_string(),
                unchecked_prefix: String::new(),
            },
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.row.name = Some(name.to_string());
        self
    }

    pub fn prefixes(mut self, checked: &str, unchecked: &str) -> Self {
        self.row.checked_prefix = checked.to_string();
        self.row.unchecked_prefix = unchecked.to_string();
        self
    }

    pub fn is_checked(&self) -> bool {
        self.row.is_checked
    }

    pub fn label(&self) -> String {
        let prefix = match self.row.is_checked {
            true => &self.row.checked_prefix,
            false => &self.row.unchecked_prefix,
        };
        format!("{}{}", prefix, self.row.text)
    }

    /// Flips the stored state before the callback sees it.
    pub(super) fn toggle(&mut self, row: usize, column: usize) -> ButtonPress {
        self.row.is_checked = !self.row.is_checked;
        ButtonPress {
            callback: self.row.callback_name.clone(),
            arg: self.row.arg.clone(),
            checked: Some(self.row.is_checked),
            row,
            column,
        }
    }
}
