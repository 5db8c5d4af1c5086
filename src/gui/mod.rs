//! Persistent menu windows: a window is one chat message showing the active tab
//! of its tab list, with a text block and an inline keyboard. Everything needed
//! to rebuild a window from its message is kept in the store, so any worker can
//! serve a button press after a restart.

mod button;
mod date_time;
mod handlers;
mod keyboard;
mod paging;
mod records;
mod registry;
mod tab;
mod text;
mod window;

use thiserror::Error;

pub use button::{ButtonKind, ButtonPress, CallbackToken, CheckBoxButton, SimpleButton, SIGNATURE};
pub use date_time::{
    date_time, on_date_time_press, set_date_time, shift, show_date_buttons, show_time_buttons,
    text_data as date_time_text_data, DateTimeUnit, DATE_TIME_BUTTON, DATE_TIME_FORMAT,
};
pub use handlers::{register_handlers, PERMISSION_ALERT, STALE_ALERT};
pub use keyboard::{KeyButton, Keyboard, Layout};
pub use paging::{
    current_page, on_page_press, page_links, show_page, PageInfo, PageMode, PageRequest,
    PagedTab, PAGE_BUTTON, PAGE_CALLBACK,
};
pub use records::{
    CheckBoxButtonRecord, SavedButtonRecord, SimpleButtonRecord, TabRecord, TextRecord,
    WindowRecord,
};
pub use registry::{Registered, Registry, RegistryError};
pub use tab::{FieldSwitch, InputField, Leave, TabArgs, TabClass, TabState};
pub use text::{substitute, Text, TextData, RULE_WIDTH};
pub use window::{clamp_text, Window, WindowClass};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuiError {
    #[error("the window belongs to another user")]
    Permission,
    #[error("stale keyboard: {0}")]
    Reconstruction(String),
    #[error("window not found: {0}")]
    NoWindow(String),
    #[error("gui misconfigured: {0}")]
    Config(String),
}

impl GuiError {
    /// Ordinary churn of old messages rather than a fault.
    pub fn is_expected(&self) -> bool {
        !matches!(self, GuiError::Config(_))
    }
}
