use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inline keyboard as shown under a message: rows of buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markup {
    pub rows: Vec<Vec<MarkupButton>>,
}

impl Markup {
    pub fn new(rows: Vec<Vec<MarkupButton>>) -> Self {
        Markup { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.is_empty())
    }

    pub fn buttons(&self) -> impl Iterator<Item = &MarkupButton> {
        self.rows.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupButton {
    pub text: String,
    pub action: ButtonAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonAction {
    Callback(String),
    Url(String),
}

impl MarkupButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        MarkupButton {
            text: text.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        MarkupButton {
            text: text.into(),
            action: ButtonAction::Url(url.into()),
        }
    }

    pub fn callback_data(&self) -> Option<&str> {
        match &self.action {
            ButtonAction::Callback(data) if !data.is_empty() => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    Html,
    MarkdownV2,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Header repeated on every fragment of a split message.
    pub title: String,
    pub markup: Option<Markup>,
    pub parse_mode: Option<ParseMode>,
    pub ignore_errors: bool,
    pub disable_preview: bool,
}

impl SendOptions {
    pub fn with_markup(markup: Option<Markup>) -> Self {
        SendOptions {
            markup,
            ..SendOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub id: i32,
}

/// A message as currently stored by the chat service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveMessage {
    pub chat_id: i64,
    pub id: i32,
    pub text: Option<String>,
    pub markup: Option<Markup>,
    /// Deleted or never existed.
    pub empty: bool,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("rate limited, retry after {0:?}")]
    RetryAfter(Duration),
    #[error("server error: {0}")]
    Server(String),
    #[error("message is not modified")]
    MessageNotModified,
    #[error("message not found")]
    MessageNotFound,
    #[error("chat unavailable: {0}")]
    Blocked(String),
    #[error("operation not supported by transport: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::RetryAfter(_) | TransportError::Server(_))
    }
}

/// A user's standing in a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    pub fn is_admin(self) -> bool {
        matches!(self, MemberStatus::Owner | MemberStatus::Administrator)
    }
}

/// Outbound RPC surface of the chat service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        options: &SendOptions,
    ) -> Result<SentMessage, TransportError>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        markup: Option<&Markup>,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    async fn get_message(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<LiveMessage, TransportError>;

    async fn answer_callback_query(
        &self,
        query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), TransportError>;

    async fn get_member_status(
        &self,
        chat_id: i64,
        user_id: u64,
    ) -> Result<MemberStatus, TransportError>;
}

/// Private chats have positive ids, groups and channels negative ones.
pub fn is_user_chat(chat_id: i64) -> bool {
    chat_id > 0
}
