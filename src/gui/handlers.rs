use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};

use super::button::{CallbackToken, SIGNATURE};
use super::records::WindowRecord;
use super::window::Window;
use super::GuiError;
use crate::context::UpdateContext;
use crate::dispatcher::{Flow, Handler, Phase, StagedDispatcher, FAILURE_NOTICE};
use crate::groups::{self, GroupManager};
use crate::store::{Filter, Order, Query};
use crate::update::{CallbackQuery, Update};
use crate::ANY_USER;

pub const PERMISSION_ALERT: &str = "Sorry, you cannot use this button.";
pub const STALE_ALERT: &str =
    "Sorry, this keyboard is outdated. Please use the keyboard from a newer message.";

/// Routes presses of window buttons.
struct CallbackQueryHandler;

#[async_trait]
impl Handler for CallbackQueryHandler {
    fn name(&self) -> &str {
        "window_callback_query"
    }

    fn check(&self, update: &Update) -> bool {
        update
            .callback_query()
            .and_then(|query| query.data.as_deref())
            .map_or(false, |data| data.starts_with(SIGNATURE))
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        let Some(query) = ctx.update.callback_query().cloned() else {
            return Ok(Flow::Continue);
        };
        let Some(token) = query.data.as_deref().and_then(CallbackToken::parse) else {
            return Ok(Flow::Continue);
        };
        let err = match activate(ctx, &query, &token).await {
            Ok(()) => {
                ctx.answer_callback(None, false).await?;
                return Ok(Flow::Stop);
            }
            Err(err) => err,
        };
        let alert = match err.downcast_ref::<GuiError>() {
            Some(GuiError::Permission) => PERMISSION_ALERT,
            Some(GuiError::Reconstruction(_)) | Some(GuiError::NoWindow(_)) => STALE_ALERT,
            _ => {
                if let Err(answer_err) = ctx.answer_callback(Some(FAILURE_NOTICE), true).await {
                    warn!("failed to answer callback query: {:#}", answer_err);
                }
                return Err(err);
            }
        };
        info!("{}: {}", ctx.update.describe(), err);
        if let Some(session) = ctx.session.as_mut() {
            session.rollback();
        }
        ctx.answer_callback(Some(alert), true).await?;
        Ok(Flow::Stop)
    }
}

async fn activate(ctx: &mut UpdateContext, query: &CallbackQuery, token: &CallbackToken) -> Result<()> {
    let message = query
        .message
        .clone()
        .ok_or_else(|| GuiError::NoWindow("callback query without message".to_string()))?;
    if ctx.services.windows.get(&token.window_tag).is_none() {
        return Err(GuiError::NoWindow(format!("unknown window class {}", token.window_tag)).into());
    }
    let mut window = Window::reconstruct(ctx, message.chat_id, token.window_id, Some(message)).await?;
    window.handle_button_activation(ctx, &token.raw).await?;
    window.render(ctx).await
}

/// Routes plain text to the newest window of the chat waiting for input.
struct InputHandler;

#[async_trait]
impl Handler for InputHandler {
    fn name(&self) -> &str {
        "window_input"
    }

    fn check(&self, update: &Update) -> bool {
        matches!(update, Update::Message(_)) && update.text().is_some() && update.command().is_none()
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        let update = ctx.update.clone();
        let (Some(chat_id), Some(text)) = (update.chat_id(), update.text()) else {
            return Ok(Flow::Continue);
        };
        let actor = ctx.actor_id();
        let query = Query::filter(
            Filter::eq("chat_id", chat_id)
                .and(Filter::eq("input_required", true))
                .and(Filter::is_in("user_id", [ANY_USER, actor])),
        )
        .order_by("id", Order::Desc);
        let Some(row) = ctx.session()?.first::<WindowRecord>(query).await? else {
            return Ok(Flow::Continue);
        };
        let result = async {
            let mut window = Window::reconstruct_row(ctx, row, None).await?;
            window.process_input(ctx, text).await?;
            window.render(ctx).await
        }
        .await;
        match result {
            Ok(()) => Ok(Flow::Stop),
            Err(err) => match err.downcast_ref::<GuiError>() {
                Some(gui) if gui.is_expected() => {
                    info!("{}: {}", update.describe(), err);
                    if let Some(session) = ctx.session.as_mut() {
                        session.rollback();
                    }
                    Ok(Flow::Continue)
                }
                _ => Err(err),
            },
        }
    }
}

/// Registers the window callback and input routing into MAIN.
pub fn register_handlers(dispatcher: &mut StagedDispatcher, groups: &GroupManager) -> Result<()> {
    dispatcher.add_handler(
        Phase::Main,
        groups.get(groups::PROCESS_CALLBACK_QUERY)?,
        Arc::new(CallbackQueryHandler),
    );
    dispatcher.add_handler(
        Phase::Main,
        groups.get(groups::PROCESS_INPUT)?,
        Arc::new(InputHandler),
    );
    Ok(())
}
