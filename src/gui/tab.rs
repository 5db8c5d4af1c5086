use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::button::ButtonPress;
use super::keyboard::{Keyboard, Layout};
use super::records::{TabRecord, TextRecord, WindowRecord};
use super::text::{Text, TextData};
use super::GuiError;
use crate::context::UpdateContext;
use crate::store::{Filter, Query, Session};
use crate::transport::Markup;

/// Arguments for building a fresh tab.
pub type TabArgs = Map<String, Value>;

/// A free-text field of a tab. Input typed while the field is focused goes to
/// the tab's `on_input` with the field's method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputField {
    pub name: &'static str,
    pub prompt: Option<&'static str>,
    pub method: Option<&'static str>,
}

impl InputField {
    pub const fn new(name: &'static str) -> Self {
        InputField {
            name,
            prompt: None,
            method: None,
        }
    }

    pub const fn prompt(mut self, prompt: &'static str) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub const fn method(mut self, method: &'static str) -> Self {
        self.method = Some(method);
        self
    }

    /// `process_<name>` unless set explicitly.
    pub fn method_name(&self) -> String {
        match self.method {
            Some(method) => method.to_string(),
            None => format!("process_{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSwitch<'a> {
    Named(&'a str),
    Previous,
    Next,
}

/// What happens to the current tab when the window switches away from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leave {
    Destroy,
    /// Keep the tab row and snapshot its buttons so it can be restored.
    Save,
}

/// Behaviour of one kind of tab. State lives in `TabState`.
#[async_trait]
pub trait TabClass: Send + Sync {
    fn name(&self) -> &'static str;

    fn input_fields(&self) -> &'static [InputField] {
        &[]
    }

    /// When false, re-rendering keeps the text currently shown in the chat.
    fn rerender_text(&self) -> bool {
        true
    }

    fn layout(&self) -> Layout {
        Layout::Rows
    }

    async fn build(&self, tab: &mut TabState, ctx: &mut UpdateContext, args: TabArgs) -> Result<()>;

    async fn text_data(&self, _tab: &TabState, _ctx: &mut UpdateContext) -> Result<TextData> {
        Ok(TextData::new())
    }

    async fn on_button(
        &self,
        _tab: &mut TabState,
        _ctx: &mut UpdateContext,
        press: ButtonPress,
    ) -> Result<()> {
        Err(GuiError::Config(format!("{} has no callback {}", self.name(), press.callback)).into())
    }

    async fn on_input(
        &self,
        _tab: &mut TabState,
        _ctx: &mut UpdateContext,
        method: &str,
        _text: &str,
    ) -> Result<()> {
        Err(GuiError::Config(format!("{} has no input method {}", self.name(), method)).into())
    }
}

pub(super) struct Navigation {
    pub target: &'static dyn TabClass,
    pub args: TabArgs,
    pub leave: Leave,
}

/// The live tab of a window.
pub struct TabState {
    class: &'static dyn TabClass,
    pub row: TabRecord,
    pub text: Text,
    pub keyboard: Keyboard,
    message_text: Option<String>,
    navigation: Option<Navigation>,
}

impl TabState {
    pub fn class(&self) -> &'static dyn TabClass {
        self.class
    }

    pub fn window_id(&self) -> i64 {
        self.row.window_id
    }

    /// Text currently shown in the chat, when reconstructed from a message.
    pub fn message_text(&self) -> Option<&str> {
        self.message_text.as_deref()
    }

    pub fn field<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.row.fields.get(name) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("decode tab field {}", name)),
            None => Ok(None),
        }
    }

    pub fn set_field(&mut self, name: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value).with_context(|| format!("encode tab field {}", name))?;
        self.row.fields.insert(name.to_string(), value);
        Ok(())
    }

    /// Asks the window to switch to `target` once the current callback returns.
    pub fn switch_to(&mut self, target: &'static dyn TabClass, args: TabArgs, leave: Leave) {
        self.navigation = Some(Navigation {
            target,
            args,
            leave,
        });
    }

    pub(super) fn take_navigation(&mut self) -> Option<Navigation> {
        self.navigation.take()
    }

    pub fn current_input_field(&self) -> Option<&'static InputField> {
        let index = self.row.current_input_field_index?;
        self.class.input_fields().get(index)
    }

    pub fn switch_input_field(&mut self, switch: FieldSwitch<'_>) -> Result<(), GuiError> {
        let fields = self.class.input_fields();
        let current = self.row.current_input_field_index.unwrap_or(0);
        let next = match switch {
            FieldSwitch::Named(name) => fields
                .iter()
                .position(|field| field.name == name)
                .ok_or_else(|| GuiError::Config(format!("input field {} not found", name)))?,
            FieldSwitch::Previous => current
                .checked_sub(1)
                .ok_or_else(|| GuiError::Config("this is the first input field".to_string()))?,
            FieldSwitch::Next => {
                if current + 1 >= fields.len() {
                    return Err(GuiError::Config("this is the last input field".to_string()));
                }
                current + 1
            }
        };
        self.row.current_input_field_index = Some(next);
        Ok(())
    }

    fn empty(class: &'static dyn TabClass, row: TabRecord, text: Text, keyboard: Keyboard) -> Self {
        TabState {
            class,
            row,
            text,
            keyboard,
            message_text: None,
            navigation: None,
        }
    }

    pub(super) async fn build(
        class: &'static dyn TabClass,
        window: &WindowRecord,
        ctx: &mut UpdateContext,
        args: TabArgs,
    ) -> Result<TabState> {
        let window_id = window_id(window)?;
        let session = ctx.session()?;
        let mut row = TabRecord {
            id: None,
            window_id,
            index_in_window: window.current_tab_index,
            fields: Map::new(),
            current_input_field_index: match class.input_fields().is_empty() {
                true => None,
                false => Some(0),
            },
        };
        let tab_id = session.add(&mut row).await?;
        let mut text = Text::new(window_id, tab_id);
        session.add(&mut text.row).await?;
        let mut tab = TabState::empty(class, row, text, Keyboard::new(class.layout()));
        class
            .build(&mut tab, ctx, args)
            .await
            .with_context(|| format!("build tab {}", class.name()))?;
        Ok(tab)
    }

    pub(super) async fn render(
        &mut self,
        ctx: &mut UpdateContext,
        window: &WindowRecord,
    ) -> Result<(String, Markup)> {
        let window_id = window_id(window)?;
        let text = match (self.class.rerender_text(), self.message_text.clone()) {
            (false, Some(text)) => text,
            _ => {
                let prompt = self
                    .current_input_field()
                    .and_then(|field| field.prompt)
                    .map(str::to_string);
                if !self.class.input_fields().is_empty() {
                    self.text.set_input_field_text(prompt);
                }
                let data = self.class.text_data(self, ctx).await?;
                self.text.render(&data)?
            }
        };
        let session = ctx.session()?;
        let markup = self
            .keyboard
            .render(session, &window.window_tag, window_id)
            .await?;
        session.add(&mut self.row).await?;
        session.add(&mut self.text.row).await?;
        self.message_text = Some(text.clone());
        Ok((text, markup))
    }

    pub(super) async fn reconstruct(
        class: &'static dyn TabClass,
        window: &WindowRecord,
        ctx: &mut UpdateContext,
        message_text: Option<String>,
        markup: &Markup,
    ) -> Result<TabState> {
        let window_id = window_id(window)?;
        let services = ctx.services.clone();
        let session = ctx.session()?;
        let row = find_tab(session, window_id, window.current_tab_index)
            .await?
            .ok_or_else(|| GuiError::Reconstruction("tab not found".to_string()))?;
        let text = find_text(session, &row)
            .await?
            .ok_or_else(|| GuiError::Reconstruction("text not found".to_string()))?;
        let keyboard =
            Keyboard::reconstruct(session, &services.buttons, class.layout(), window_id, markup)
                .await?;
        let mut tab = TabState::empty(class, row, text, keyboard);
        tab.message_text = message_text;
        Ok(tab)
    }

    pub(super) async fn save(&mut self, session: &mut Session) -> Result<()> {
        session.add(&mut self.row).await?;
        session.add(&mut self.text.row).await?;
        self.keyboard
            .save(session, self.row.window_id, self.row.index_in_window)
            .await
    }

    /// Brings back the tab saved at the window's current index, if any.
    pub(super) async fn restore(
        class: &'static dyn TabClass,
        window: &WindowRecord,
        session: &mut Session,
    ) -> Result<Option<TabState>> {
        let window_id = window_id(window)?;
        let Some(row) = find_tab(session, window_id, window.current_tab_index).await? else {
            return Ok(None);
        };
        let text = find_text(session, &row)
            .await?
            .ok_or_else(|| GuiError::Reconstruction("text of saved tab not found".to_string()))?;
        let keyboard =
            Keyboard::restore(session, class.layout(), window_id, row.index_in_window).await?;
        Ok(Some(TabState::empty(class, row, text, keyboard)))
    }

    pub(super) fn destroy(&mut self, session: &mut Session) -> Result<()> {
        session.delete(&self.row)?;
        if self.text.row.id.is_some() {
            session.delete(&self.text.row)?;
        }
        self.keyboard.destroy(session)
    }
}

fn window_id(window: &WindowRecord) -> Result<i64> {
    window
        .id
        .ok_or_else(|| GuiError::Config("window row has no id".to_string()).into())
}

async fn find_tab(session: &Session, window_id: i64, index: usize) -> Result<Option<TabRecord>> {
    let query = Query::filter(
        Filter::eq("window_id", window_id).and(Filter::eq("index_in_window", index as i64)),
    );
    session.first(query).await
}

async fn find_text(session: &Session, tab: &TabRecord) -> Result<Option<Text>> {
    let Some(tab_id) = tab.id else {
        return Ok(None);
    };
    let query = Query::filter(
        Filter::eq("window_id", tab.window_id).and(Filter::eq("tab_id", tab_id)),
    );
    let row: Option<TextRecord> = session.first(query).await?;
    Ok(row.map(|row| Text { row }))
}
