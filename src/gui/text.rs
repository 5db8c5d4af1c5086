use std::collections::BTreeMap;

use super::records::TextRecord;
use super::GuiError;

pub type TextData = BTreeMap<String, String>;

pub const RULE_WIDTH: usize = 60;
pub const EMPTY_TEXT: &str = ".";

/// Replaces `{name}` with `data[name]`; `{{` and `}}` stand for literal braces.
pub fn substitute(template: &str, data: &TextData) -> Result<String, GuiError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(GuiError::Config(format!(
                                "unclosed placeholder {{{} in text",
                                name
                            )))
                        }
                    }
                }
                let value = data.get(&name).ok_or_else(|| {
                    GuiError::Config(format!("no data for placeholder {{{}}}", name))
                })?;
                out.push_str(value);
            }
            '}' => {
                return Err(GuiError::Config("single '}' in text".to_string()));
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Text block of a tab.
#[derive(Debug, Clone)]
pub struct Text {
    pub row: TextRecord,
}

impl Text {
    pub fn new(window_id: i64, tab_id: i64) -> Self {
        Text {
            row: TextRecord {
                id: None,
                window_id,
                tab_id,
                header: None,
                header_one_time: true,
                body: String::new(),
                input_field_text: None,
            },
        }
    }

    /// A one-time header is dropped after it has been rendered once.
    pub fn set_header(&mut self, header: impl Into<String>, one_time: bool) {
        self.row.header = Some(header.into());
        self.row.header_one_time = one_time;
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.row.body = body.into();
    }

    pub fn append_to_body(&mut self, text: &str) {
        self.row.body.push_str(text);
    }

    pub fn set_input_field_text(&mut self, text: Option<String>) {
        self.row.input_field_text = text;
    }

    pub fn render(&mut self, data: &TextData) -> Result<String, GuiError> {
        let mut text = String::new();
        if let Some(header) = &self.row.header {
            text.push_str(header);
            text.push('\n');
            text.push_str(&"-".repeat(RULE_WIDTH));
            text.push('\n');
            if self.row.header_one_time {
                self.row.header = None;
            }
        }
        let mut body: Vec<&str> = Vec::new();
        if !self.row.body.is_empty() {
            body.push(&self.row.body);
        }
        if let Some(prompt) = self.row.input_field_text.as_deref().filter(|p| !p.is_empty()) {
            body.push(prompt);
        }
        if body.is_empty() {
            text.push_str(EMPTY_TEXT);
        } else {
            text.push_str(&body.join("\n"));
        }
        substitute(&text, data)
    }
}
