use std::sync::Arc;

use anyhow::Result;
use log::debug;
use thiserror::Error;

use crate::bot::Services;
use crate::sender::{Delivery, OutgoingMessage};
use crate::store::Session;
use crate::update::{CallbackQuery, Update};
use crate::users::{GroupRecord, UserRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("no {0} bound to the current update")]
    Empty(&'static str),
}

/// State scoped to one update, from INITIALIZE to FINALIZE.
pub struct UpdateContext {
    pub services: Arc<Services>,
    pub update: Arc<Update>,
    pub session: Option<Session>,
    pub user: Option<UserRecord>,
    pub group: Option<GroupRecord>,
    pub callback_query: Option<CallbackQuery>,
    pub callback_answered: bool,
}

impl UpdateContext {
    pub fn new(services: Arc<Services>, update: Arc<Update>) -> Self {
        UpdateContext {
            services,
            update,
            session: None,
            user: None,
            group: None,
            callback_query: None,
            callback_answered: false,
        }
    }

    pub fn session(&mut self) -> Result<&mut Session, ContextError> {
        self.session.as_mut().ok_or(ContextError::Empty("session"))
    }

    pub fn user(&self) -> Result<&UserRecord, ContextError> {
        self.user.as_ref().ok_or(ContextError::Empty("user"))
    }

    pub fn group(&self) -> Result<&GroupRecord, ContextError> {
        self.group.as_ref().ok_or(ContextError::Empty("group"))
    }

    pub fn callback_query(&self) -> Result<&CallbackQuery, ContextError> {
        self.callback_query
            .as_ref()
            .ok_or(ContextError::Empty("callback query"))
    }

    /// Telegram id of the user behind the update, or 0 when unknown.
    pub fn actor_id(&self) -> i64 {
        self.update
            .actor()
            .and_then(|user| i64::try_from(user.id).ok())
            .unwrap_or(0)
    }

    /// Answers the current callback query once; later calls are no-ops.
    pub async fn answer_callback(&mut self, text: Option<&str>, show_alert: bool) -> Result<()> {
        if self.callback_answered {
            return Ok(());
        }
        let Some(query) = &self.callback_query else {
            return Ok(());
        };
        debug!("answering callback query {}", query.id);
        self.services
            .client
            .answer_callback_query(&query.id, text, show_alert)
            .await?;
        self.callback_answered = true;
        Ok(())
    }

    pub fn send(&self, message: OutgoingMessage) -> Result<Option<Delivery>> {
        self.services.sender.send(message)
    }

    /// Queues `text` to the update's chat at the default priority.
    pub fn reply(&self, text: impl Into<String>) -> Result<()> {
        if let Some(chat_id) = self.update.chat_id() {
            let message = OutgoingMessage::new(chat_id, text)
                .priority(self.services.sender.default_priority());
            self.services.sender.send(message)?;
        }
        Ok(())
    }
}
