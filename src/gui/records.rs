use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::Record;
use crate::transport::Markup;

macro_rules! record {
    ($ty:ty, $table:literal) => {
        impl Record for $ty {
            const TABLE: &'static str = $table;

            fn id(&self) -> Option<i64> {
                self.id
            }

            fn set_id(&mut self, id: i64) {
                self.id = Some(id);
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub id: Option<i64>,
    pub chat_id: i64,
    /// Owner, or `ANY_USER`.
    pub user_id: i64,
    pub window_tag: String,
    pub message_id: Option<i32>,
    pub current_tab_index: usize,
    pub input_required: bool,
    /// Text and keyboard as last rendered, for transports that cannot fetch a
    /// message back.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub markup: Option<Markup>,
}

record!(WindowRecord, "window");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabRecord {
    pub id: Option<i64>,
    pub window_id: i64,
    pub index_in_window: usize,
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub current_input_field_index: Option<usize>,
}

record!(TabRecord, "tab");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    pub id: Option<i64>,
    pub window_id: i64,
    pub tab_id: i64,
    pub header: Option<String>,
    pub header_one_time: bool,
    pub body: String,
    pub input_field_text: Option<String>,
}

record!(TextRecord, "text");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleButtonRecord {
    pub id: Option<i64>,
    pub window_id: i64,
    pub callback_data: String,
    pub callback_name: String,
    pub arg: String,
    /// Label used to remove a group of buttons at once.
    pub name: Option<String>,
}

record!(SimpleButtonRecord, "simple_button");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckBoxButtonRecord {
    pub id: Option<i64>,
    pub window_id: i64,
    pub callback_data: String,
    pub callback_name: String,
    pub arg: String,
    pub name: Option<String>,
    pub text: String,
    pub is_checked: bool,
    pub checked_prefix: String,
    pub unchecked_prefix: String,
}

record!(CheckBoxButtonRecord, "check_box_button");

/// Button of a tab that was navigated away from but kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedButtonRecord {
    pub id: Option<i64>,
    pub window_id: i64,
    pub tab_index: usize,
    pub position: usize,
    pub text: String,
    /// Button kind tag; `None` for plain markup buttons.
    pub kind: Option<String>,
    pub payload: Value,
    /// Last button of its keyboard row.
    pub right_button: bool,
}

record!(SavedButtonRecord, "saved_button");
