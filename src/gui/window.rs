use anyhow::{anyhow, Result};
use log::{debug, info, warn};

use super::records::{
    CheckBoxButtonRecord, SavedButtonRecord, SimpleButtonRecord, TabRecord, TextRecord,
    WindowRecord,
};
use super::registry::Registered;
use super::tab::{Leave, TabArgs, TabClass, TabState};
use super::GuiError;
use crate::context::UpdateContext;
use crate::sender::OutgoingMessage;
use crate::store::{Filter, Query};
use crate::transport::{LiveMessage, SendOptions, TransportError};
use crate::ANY_USER;

/// A kind of window: a tag for callback tokens and an ordered tab list.
pub trait WindowClass: Send + Sync {
    /// Four ASCII alphanumerics, unique among registered windows.
    fn tag(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn tabs(&self) -> &'static [&'static dyn TabClass];
}

impl Registered for &'static dyn WindowClass {
    fn tag(&self) -> &str {
        WindowClass::tag(*self)
    }

    fn name(&self) -> &str {
        WindowClass::name(*self)
    }
}

pub struct Window {
    class: &'static dyn WindowClass,
    pub row: WindowRecord,
    pub tab: TabState,
    swap: bool,
}

impl Window {
    pub fn class(&self) -> &'static dyn WindowClass {
        self.class
    }

    pub fn id(&self) -> Option<i64> {
        self.row.id
    }

    /// Creates a window for `chat_id` owned by `user_id` (or `ANY_USER`) showing
    /// its first tab. Nothing is sent until `render`.
    pub async fn build(
        class: &'static dyn WindowClass,
        ctx: &mut UpdateContext,
        chat_id: i64,
        user_id: i64,
        args: TabArgs,
    ) -> Result<Window> {
        let first = *class
            .tabs()
            .first()
            .ok_or_else(|| GuiError::Config(format!("window {} has no tabs", class.name())))?;
        let mut row = WindowRecord {
            id: None,
            chat_id,
            user_id,
            window_tag: class.tag().to_string(),
            message_id: None,
            current_tab_index: 0,
            input_required: false,
            text: None,
            markup: None,
        };
        ctx.session()?.add(&mut row).await?;
        debug!("building window {} in chat {}", class.name(), chat_id);
        let tab = TabState::build(first, &row, ctx, args).await?;
        Ok(Window {
            class,
            row,
            tab,
            swap: false,
        })
    }

    /// Makes the next render replace the message instead of editing it.
    pub fn schedule_swap(&mut self) {
        self.swap = true;
    }

    pub async fn render(&mut self, ctx: &mut UpdateContext) -> Result<()> {
        let (text, markup) = self.tab.render(ctx, &self.row).await?;
        let limit = ctx.services.config.sender.max_message_length;
        let text = clamp_text(text, limit);
        self.row.input_required = !self.tab.class().input_fields().is_empty();
        let markup = Some(markup).filter(|markup| !markup.is_empty());
        let client = ctx.services.client.clone();
        if self.swap {
            self.swap = false;
            if let Some(message_id) = self.row.message_id.take() {
                if let Err(err) = client.delete_message(self.row.chat_id, message_id).await {
                    info!("could not delete swapped window message: {}", err);
                }
            }
        }
        match self.row.message_id {
            None => {
                let options = SendOptions::with_markup(markup.clone());
                let message = OutgoingMessage::new(self.row.chat_id, text.clone())
                    .priority(ctx.services.sender.default_priority())
                    .options(options);
                let sent = ctx
                    .services
                    .sender
                    .send_and_wait(message)
                    .await?
                    .ok_or_else(|| anyhow!("window message was not delivered"))?;
                self.row.message_id = Some(sent.id);
            }
            Some(message_id) => {
                let edited = client
                    .edit_message_text(self.row.chat_id, message_id, &text, markup.as_ref())
                    .await;
                match edited {
                    Ok(()) => {}
                    Err(err) => match err.transport() {
                        Some(TransportError::MessageNotModified) => {}
                        Some(TransportError::MessageNotFound) => {
                            self.purge(ctx).await?;
                            return Err(GuiError::NoWindow("message not found".to_string()).into());
                        }
                        _ => return Err(err.into()),
                    },
                }
            }
        }
        self.row.text = Some(text);
        self.row.markup = markup;
        ctx.session()?.add(&mut self.row).await?;
        Ok(())
    }

    pub async fn reconstruct(
        ctx: &mut UpdateContext,
        chat_id: i64,
        window_id: i64,
        message: Option<LiveMessage>,
    ) -> Result<Window> {
        let query = Query::filter(Filter::eq("id", window_id).and(Filter::eq("chat_id", chat_id)));
        let row: WindowRecord = ctx
            .session()?
            .first(query)
            .await?
            .ok_or_else(|| GuiError::NoWindow(format!("no window {} in chat {}", window_id, chat_id)))?;
        Window::reconstruct_row(ctx, row, message).await
    }

    /// Rebuilds the window behind `row`. `message` is the live message when the
    /// update carries it; otherwise it is fetched.
    pub async fn reconstruct_row(
        ctx: &mut UpdateContext,
        row: WindowRecord,
        message: Option<LiveMessage>,
    ) -> Result<Window> {
        let class = *ctx.services.windows.get(&row.window_tag).ok_or_else(|| {
            GuiError::Reconstruction(format!("unknown window class {}", row.window_tag))
        })?;
        if row.user_id != ANY_USER && row.user_id != ctx.actor_id() {
            return Err(GuiError::Permission.into());
        }
        let message = match message {
            Some(message) => message,
            None => Window::fetch_message(ctx, &row).await?,
        };
        if message.empty {
            Window::purge_row(ctx, &row).await?;
            return Err(GuiError::NoWindow("message not found".to_string()).into());
        }
        let tab_class = *class.tabs().get(row.current_tab_index).ok_or_else(|| {
            GuiError::Reconstruction(format!("tab index {} out of range", row.current_tab_index))
        })?;
        let markup = message.markup.unwrap_or_default();
        let tab = TabState::reconstruct(tab_class, &row, ctx, message.text, &markup).await?;
        Ok(Window {
            class,
            row,
            tab,
            swap: false,
        })
    }

    async fn fetch_message(ctx: &UpdateContext, row: &WindowRecord) -> Result<LiveMessage> {
        let Some(message_id) = row.message_id else {
            return Err(GuiError::NoWindow("window was never rendered".to_string()).into());
        };
        match ctx.services.client.get_message(row.chat_id, message_id).await {
            Ok(message) => Ok(message),
            Err(err) => match err.transport() {
                // Fall back to what was last rendered.
                Some(TransportError::Unsupported(_)) => Ok(LiveMessage {
                    chat_id: row.chat_id,
                    id: message_id,
                    text: row.text.clone(),
                    markup: row.markup.clone(),
                    empty: false,
                }),
                Some(TransportError::MessageNotFound) => Ok(LiveMessage {
                    chat_id: row.chat_id,
                    id: message_id,
                    empty: true,
                    ..LiveMessage::default()
                }),
                _ => Err(err.into()),
            },
        }
    }

    pub async fn handle_button_activation(&mut self, ctx: &mut UpdateContext, token: &str) -> Result<()> {
        let press = self.tab.keyboard.activate(token)?;
        debug!(
            "window {:?}: {} pressed with arg {:?}",
            self.row.id, press.callback, press.arg
        );
        let class = self.tab.class();
        class.on_button(&mut self.tab, ctx, press).await?;
        self.apply_navigation(ctx).await
    }

    pub async fn process_input(&mut self, ctx: &mut UpdateContext, text: &str) -> Result<()> {
        let field = self.tab.current_input_field().ok_or_else(|| {
            GuiError::Config(format!("tab {} takes no input", self.tab.class().name()))
        })?;
        let class = self.tab.class();
        class
            .on_input(&mut self.tab, ctx, &field.method_name(), text)
            .await?;
        self.apply_navigation(ctx).await
    }

    async fn apply_navigation(&mut self, ctx: &mut UpdateContext) -> Result<()> {
        if let Some(navigation) = self.tab.take_navigation() {
            self.switch_tab(ctx, navigation.target, navigation.args, navigation.leave)
                .await?;
        }
        Ok(())
    }

    /// Leaves the current tab and shows `target`, restoring it when it was saved
    /// earlier and building it with `args` otherwise.
    pub async fn switch_tab(
        &mut self,
        ctx: &mut UpdateContext,
        target: &'static dyn TabClass,
        args: TabArgs,
        leave: Leave,
    ) -> Result<()> {
        let index = self
            .class
            .tabs()
            .iter()
            .position(|tab| tab.name() == target.name())
            .ok_or_else(|| {
                GuiError::Config(format!(
                    "tab {} is not part of window {}",
                    target.name(),
                    self.class.name()
                ))
            })?;
        let session = ctx.session()?;
        match leave {
            Leave::Destroy => self.tab.destroy(session)?,
            Leave::Save => self.tab.save(session).await?,
        }
        self.row.current_tab_index = index;
        self.tab = match TabState::restore(target, &self.row, session).await? {
            Some(tab) => tab,
            None => TabState::build(target, &self.row, ctx, args).await?,
        };
        Ok(())
    }

    async fn purge(&self, ctx: &UpdateContext) -> Result<()> {
        Window::purge_row(ctx, &self.row).await
    }

    /// Deletes the window and everything it owns in a session of its own, so
    /// the removal sticks even though the current update fails.
    async fn purge_row(ctx: &UpdateContext, row: &WindowRecord) -> Result<()> {
        let Some(window_id) = row.id else {
            return Ok(());
        };
        info!("purging window {} of chat {}", window_id, row.chat_id);
        let mut session = ctx.services.store.begin();
        let owned = || Filter::eq("window_id", window_id);
        session.delete_where::<TabRecord>(owned()).await?;
        session.delete_where::<TextRecord>(owned()).await?;
        session.delete_where::<SimpleButtonRecord>(owned()).await?;
        session.delete_where::<CheckBoxButtonRecord>(owned()).await?;
        session.delete_where::<SavedButtonRecord>(owned()).await?;
        session.delete_by_id::<WindowRecord>(window_id)?;
        session.commit().await
    }
}

/// A window is a single message, so text past `limit` chars is cut and
/// marked with an ellipsis rather than split into parts.
pub fn clamp_text(text: String, limit: usize) -> String {
    let length = text.chars().count();
    if length <= limit {
        return text;
    }
    warn!("window text of {} chars cut to {}", length, limit);
    let mut clamped: String = text.chars().take(limit.saturating_sub(1)).collect();
    clamped.push('…');
    clamped
}
