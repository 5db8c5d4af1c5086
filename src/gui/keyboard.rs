use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;

use super::button::{ButtonKind, ButtonPress, CallbackToken, CheckBoxButton, SimpleButton};
use super::records::{CheckBoxButtonRecord, SavedButtonRecord, SimpleButtonRecord};
use super::registry::{Registered, Registry};
use super::GuiError;
use crate::store::{Filter, Order, Query, Session};
use crate::transport::{Markup, MarkupButton};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// `add_button` extends the last row.
    #[default]
    Rows,
    /// `add_button` starts a new row every `width` buttons.
    Grid { width: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyButton {
    /// Rendered as-is and not backed by a row, e.g. a URL button.
    Plain(MarkupButton),
    Simple(SimpleButton),
    CheckBox(CheckBoxButton),
}

impl From<SimpleButton> for KeyButton {
    fn from(button: SimpleButton) -> Self {
        KeyButton::Simple(button)
    }
}

impl From<CheckBoxButton> for KeyButton {
    fn from(button: CheckBoxButton) -> Self {
        KeyButton::CheckBox(button)
    }
}

impl From<MarkupButton> for KeyButton {
    fn from(button: MarkupButton) -> Self {
        KeyButton::Plain(button)
    }
}

impl KeyButton {
    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        KeyButton::Plain(MarkupButton::url(text, url))
    }

    /// Text without check box prefixes.
    pub fn text(&self) -> &str {
        match self {
            KeyButton::Plain(button) => &button.text,
            KeyButton::Simple(button) => &button.text,
            KeyButton::CheckBox(button) => &button.row.text,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            KeyButton::Plain(_) => None,
            KeyButton::Simple(button) => button.row.name.as_deref(),
            KeyButton::CheckBox(button) => button.row.name.as_deref(),
        }
    }

    pub fn kind(&self) -> Option<ButtonKind> {
        match self {
            KeyButton::Plain(_) => None,
            KeyButton::Simple(_) => Some(ButtonKind::Simple),
            KeyButton::CheckBox(_) => Some(ButtonKind::CheckBox),
        }
    }

    pub fn token(&self) -> Option<&str> {
        let data = match self {
            KeyButton::Plain(_) => return None,
            KeyButton::Simple(button) => &button.row.callback_data,
            KeyButton::CheckBox(button) => &button.row.callback_data,
        };
        Some(data.as_str()).filter(|data| !data.is_empty())
    }

    fn payload(&self) -> Result<Value> {
        let payload = match self {
            KeyButton::Plain(button) => serde_json::to_value(button)?,
            KeyButton::Simple(button) => serde_json::to_value(&button.row)?,
            KeyButton::CheckBox(button) => serde_json::to_value(&button.row)?,
        };
        Ok(payload)
    }

    fn delete(&self, session: &mut Session) -> Result<()> {
        match self {
            KeyButton::Simple(SimpleButton {
                row: SimpleButtonRecord { id: Some(id), .. },
                ..
            }) => session.delete_by_id::<SimpleButtonRecord>(*id),
            KeyButton::CheckBox(CheckBoxButton {
                row: CheckBoxButtonRecord { id: Some(id), .. },
            }) => session.delete_by_id::<CheckBoxButtonRecord>(*id),
            _ => Ok(()),
        }
    }

    /// Stores the backing row, minting a token on first render.
    async fn persist(
        &mut self,
        session: &mut Session,
        window_tag: &str,
        window_id: i64,
    ) -> Result<MarkupButton> {
        match self {
            KeyButton::Plain(button) => Ok(button.clone()),
            KeyButton::Simple(button) => {
                if button.row.callback_data.is_empty() {
                    button.row.callback_data =
                        CallbackToken::generate(window_tag, window_id, ButtonKind::Simple.tag());
                }
                button.row.window_id = window_id;
                session.add(&mut button.row).await?;
                Ok(MarkupButton::callback(
                    button.text.clone(),
                    button.row.callback_data.clone(),
                ))
            }
            KeyButton::CheckBox(button) => {
                if button.row.callback_data.is_empty() {
                    button.row.callback_data =
                        CallbackToken::generate(window_tag, window_id, ButtonKind::CheckBox.tag());
                }
                button.row.window_id = window_id;
                session.add(&mut button.row).await?;
                Ok(MarkupButton::callback(
                    button.label(),
                    button.row.callback_data.clone(),
                ))
            }
        }
    }
}

/// Button grid of a tab.
#[derive(Debug, Clone, Default)]
pub struct Keyboard {
    layout: Layout,
    rows: Vec<Vec<KeyButton>>,
    /// Removed buttons whose rows are deleted on the next render.
    discarded: Vec<KeyButton>,
}

impl Keyboard {
    pub fn new(layout: Layout) -> Self {
        Keyboard {
            layout,
            rows: Vec::new(),
            discarded: Vec::new(),
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn rows(&self) -> &[Vec<KeyButton>] {
        &self.rows
    }

    pub fn buttons(&self) -> impl Iterator<Item = &KeyButton> {
        self.rows.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_row<I, B>(&mut self, buttons: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<KeyButton>,
    {
        self.rows.push(buttons.into_iter().map(Into::into).collect());
    }

    /// Puts a row at `index`, or last when `index` is past the end.
    pub fn insert_row<I, B>(&mut self, index: usize, buttons: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<KeyButton>,
    {
        let index = index.min(self.rows.len());
        self.rows
            .insert(index, buttons.into_iter().map(Into::into).collect());
    }

    pub fn add_button(&mut self, button: impl Into<KeyButton>) {
        let new_row = match (self.layout, self.rows.last()) {
            (_, None) => true,
            (Layout::Grid { width }, Some(row)) => row.len() >= width.max(1),
            (Layout::Rows, Some(_)) => false,
        };
        if new_row {
            self.rows.push(Vec::new());
        }
        if let Some(row) = self.rows.last_mut() {
            row.push(button.into());
        }
    }

    pub fn clear(&mut self) {
        let rows = std::mem::take(&mut self.rows);
        self.discarded.extend(rows.into_iter().flatten());
    }

    /// Removes every button labelled `name`, dropping rows left empty.
    pub fn remove_buttons(&mut self, name: &str) -> usize {
        let mut removed = 0;
        for row in &mut self.rows {
            let (gone, kept): (Vec<KeyButton>, Vec<KeyButton>) = std::mem::take(row)
                .into_iter()
                .partition(|button| button.name() == Some(name));
            removed += gone.len();
            self.discarded.extend(gone);
            *row = kept;
        }
        self.rows.retain(|row| !row.is_empty());
        removed
    }

    pub(super) fn activate(&mut self, token: &str) -> Result<ButtonPress, GuiError> {
        for (r, row) in self.rows.iter_mut().enumerate() {
            for (c, button) in row.iter_mut().enumerate() {
                match button {
                    KeyButton::Simple(button) if button.row.callback_data == token => {
                        return Ok(button.press(r, c));
                    }
                    KeyButton::CheckBox(button) if button.row.callback_data == token => {
                        return Ok(button.toggle(r, c));
                    }
                    _ => {}
                }
            }
        }
        Err(GuiError::Reconstruction(
            "pressed button is not on the keyboard".to_string(),
        ))
    }

    pub(super) async fn render(
        &mut self,
        session: &mut Session,
        window_tag: &str,
        window_id: i64,
    ) -> Result<Markup> {
        for button in self.discarded.drain(..) {
            button.delete(session)?;
        }
        let mut markup = Vec::with_capacity(self.rows.len());
        for row in &mut self.rows {
            if row.is_empty() {
                continue;
            }
            let mut rendered = Vec::with_capacity(row.len());
            for button in row.iter_mut() {
                rendered.push(button.persist(session, window_tag, window_id).await?);
            }
            markup.push(rendered);
        }
        self.rows.retain(|row| !row.is_empty());
        Ok(Markup::new(markup))
    }

    pub(super) fn destroy(&mut self, session: &mut Session) -> Result<()> {
        for button in self.rows.drain(..).flatten().chain(self.discarded.drain(..)) {
            button.delete(session)?;
        }
        Ok(())
    }

    /// Moves the buttons into `saved_button` rows and deletes the concrete rows.
    pub(super) async fn save(
        &mut self,
        session: &mut Session,
        window_id: i64,
        tab_index: usize,
    ) -> Result<()> {
        let mut position = 0;
        for row in &self.rows {
            for (column, button) in row.iter().enumerate() {
                let mut saved = SavedButtonRecord {
                    id: None,
                    window_id,
                    tab_index,
                    position,
                    text: button.text().to_string(),
                    kind: button.kind().map(|kind| kind.tag().to_string()),
                    payload: button.payload()?,
                    right_button: column + 1 == row.len(),
                };
                session.add(&mut saved).await?;
                button.delete(session)?;
                position += 1;
            }
        }
        for button in self.discarded.drain(..) {
            button.delete(session)?;
        }
        self.rows.clear();
        Ok(())
    }

    pub(super) async fn restore(
        session: &mut Session,
        layout: Layout,
        window_id: i64,
        tab_index: usize,
    ) -> Result<Keyboard> {
        let query = Query::filter(
            Filter::eq("window_id", window_id).and(Filter::eq("tab_index", tab_index as i64)),
        )
        .order_by("position", Order::Asc);
        let saved: Vec<SavedButtonRecord> = session.select(&query).await?;
        let mut keyboard = Keyboard::new(layout);
        let mut row = Vec::new();
        for record in saved {
            let button = match record.kind.as_deref() {
                None => KeyButton::Plain(serde_json::from_value(record.payload.clone())?),
                Some(tag) if tag == ButtonKind::Simple.tag() => {
                    let mut stored: SimpleButtonRecord =
                        serde_json::from_value(record.payload.clone())?;
                    if stored.id.is_some() {
                        session.add(&mut stored).await?;
                    }
                    KeyButton::Simple(SimpleButton {
                        text: record.text.clone(),
                        row: stored,
                    })
                }
                Some(tag) if tag == ButtonKind::CheckBox.tag() => {
                    let mut stored: CheckBoxButtonRecord =
                        serde_json::from_value(record.payload.clone())?;
                    if stored.id.is_some() {
                        session.add(&mut stored).await?;
                    }
                    KeyButton::CheckBox(CheckBoxButton { row: stored })
                }
                Some(tag) => {
                    return Err(
                        GuiError::Reconstruction(format!("saved button of unknown kind {}", tag))
                            .into(),
                    )
                }
            };
            row.push(button);
            session.delete(&record)?;
            if record.right_button {
                keyboard.rows.push(std::mem::take(&mut row));
            }
        }
        if !row.is_empty() {
            keyboard.rows.push(row);
        }
        Ok(keyboard)
    }

    /// Rebuilds the keyboard behind `markup`. Every callback button must resolve
    /// to exactly one row of this window, and the window must own no other rows.
    pub(super) async fn reconstruct(
        session: &mut Session,
        registry: &Registry<ButtonKind>,
        layout: Layout,
        window_id: i64,
        markup: &Markup,
    ) -> Result<Keyboard> {
        let mut slots: Vec<Vec<Option<KeyButton>>> = Vec::with_capacity(markup.rows.len());
        let mut wanted: HashMap<ButtonKind, Vec<String>> = HashMap::new();
        let mut positions: HashMap<String, (usize, usize)> = HashMap::new();
        let mut visible = 0;
        for (r, row) in markup.rows.iter().enumerate() {
            let mut slot_row = Vec::with_capacity(row.len());
            for (c, button) in row.iter().enumerate() {
                let Some(data) = button.callback_data() else {
                    slot_row.push(Some(KeyButton::Plain(button.clone())));
                    continue;
                };
                let token = CallbackToken::parse(data).ok_or_else(|| {
                    GuiError::Reconstruction("unrecognized callback data".to_string())
                })?;
                let kind = *registry.get(&token.button_tag).ok_or_else(|| {
                    GuiError::Reconstruction(format!("unknown button class {}", token.button_tag))
                })?;
                if token.window_id != window_id {
                    return Err(GuiError::Reconstruction(
                        "button belongs to another window".to_string(),
                    )
                    .into());
                }
                wanted.entry(kind).or_default().push(data.to_string());
                positions.insert(data.to_string(), (r, c));
                visible += 1;
                slot_row.push(None);
            }
            slots.push(slot_row);
        }

        let label = |(r, c): (usize, usize)| markup.rows[r][c].text.clone();
        let mut fetched = 0;
        for (kind, tokens) in wanted {
            let query = Query::filter(Filter::is_in("callback_data", tokens));
            match kind {
                ButtonKind::Simple => {
                    for row in session.select::<SimpleButtonRecord>(&query).await? {
                        let Some(&(r, c)) = positions.get(&row.callback_data) else {
                            continue;
                        };
                        slots[r][c] = Some(KeyButton::Simple(SimpleButton {
                            text: label((r, c)),
                            row,
                        }));
                        fetched += 1;
                    }
                }
                ButtonKind::CheckBox => {
                    for row in session.select::<CheckBoxButtonRecord>(&query).await? {
                        let Some(&(r, c)) = positions.get(&row.callback_data) else {
                            continue;
                        };
                        slots[r][c] = Some(KeyButton::CheckBox(CheckBoxButton { row }));
                        fetched += 1;
                    }
                }
            }
        }
        if fetched != visible {
            return Err(GuiError::Reconstruction(format!(
                "{} buttons out of {} were fetched",
                fetched, visible
            ))
            .into());
        }
        let owned = session
            .count::<SimpleButtonRecord>(Filter::eq("window_id", window_id))
            .await?
            + session
                .count::<CheckBoxButtonRecord>(Filter::eq("window_id", window_id))
                .await?;
        if owned != visible {
            return Err(GuiError::Reconstruction(format!(
                "window owns {} buttons but shows {}",
                owned, visible
            ))
            .into());
        }

        let mut keyboard = Keyboard::new(layout);
        for slot_row in slots {
            let row: Option<Vec<KeyButton>> = slot_row.into_iter().collect();
            let row = row.ok_or_else(|| {
                GuiError::Reconstruction("button repeated on the keyboard".to_string())
            })?;
            keyboard.rows.push(row);
        }
        Ok(keyboard)
    }
}
