use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatMemberKind, InlineKeyboardButton, InlineKeyboardButtonKind, InlineKeyboardMarkup,
    MessageId, ParseMode as TgParseMode, User,
};
use teloxide::RequestError;

use crate::transport::{
    ButtonAction, LiveMessage, Markup, MarkupButton, MemberStatus, ParseMode, SendOptions,
    SentMessage, Transport, TransportError,
};
use crate::update::{self, CallbackQuery as QueryUpdate, ChatRef, IncomingMessage, UserRef};

/// Bot API transport.
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        TelegramTransport { bot }
    }
}

pub fn classify(err: RequestError) -> TransportError {
    match &err {
        RequestError::RetryAfter(after) => TransportError::RetryAfter(*after),
        RequestError::Network(_) | RequestError::Io(_) => TransportError::Server(err.to_string()),
        _ => classify_message(&err.to_string()),
    }
}

pub fn classify_message(text: &str) -> TransportError {
    let lower = text.to_ascii_lowercase();
    if lower.contains("message is not modified") {
        TransportError::MessageNotModified
    } else if lower.contains("message to edit not found")
        || lower.contains("message to delete not found")
        || lower.contains("message_id_invalid")
    {
        TransportError::MessageNotFound
    } else if lower.contains("bot was blocked")
        || lower.contains("user is deactivated")
        || lower.contains("bot was kicked")
        || lower.contains("chat not found")
    {
        TransportError::Blocked(text.to_string())
    } else if lower.contains("internal server error")
        || lower.contains("bad gateway")
        || lower.contains("gateway timeout")
        || lower.contains("service unavailable")
    {
        TransportError::Server(text.to_string())
    } else {
        TransportError::Other(text.to_string())
    }
}

fn to_telegram_markup(markup: &Markup) -> Result<InlineKeyboardMarkup, TransportError> {
    let mut rows = Vec::with_capacity(markup.rows.len());
    for row in &markup.rows {
        let mut buttons = Vec::with_capacity(row.len());
        for button in row {
            let button = match &button.action {
                ButtonAction::Callback(data) => {
                    InlineKeyboardButton::callback(button.text.clone(), data.clone())
                }
                ButtonAction::Url(url) => match url.parse() {
                    Ok(url) => InlineKeyboardButton::url(button.text.clone(), url),
                    Err(err) => {
                        return Err(TransportError::Other(format!("bad button url {}: {}", url, err)))
                    }
                },
            };
            buttons.push(button);
        }
        rows.push(buttons);
    }
    Ok(InlineKeyboardMarkup::new(rows))
}

pub fn from_telegram_markup(markup: &InlineKeyboardMarkup) -> Markup {
    let rows = markup
        .inline_keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| match &button.kind {
                    InlineKeyboardButtonKind::CallbackData(data) => {
                        MarkupButton::callback(button.text.clone(), data.clone())
                    }
                    InlineKeyboardButtonKind::Url(url) => {
                        MarkupButton::url(button.text.clone(), url.to_string())
                    }
                    // Other kinds carry no callback token; keep the label only.
                    _ => MarkupButton::callback(button.text.clone(), String::new()),
                })
                .collect()
        })
        .collect();
    Markup::new(rows)
}

fn parse_mode(mode: ParseMode) -> TgParseMode {
    match mode {
        ParseMode::Html => TgParseMode::Html,
        ParseMode::MarkdownV2 => TgParseMode::MarkdownV2,
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        options: &SendOptions,
    ) -> Result<SentMessage, TransportError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(markup) = &options.markup {
            request = request.reply_markup(to_telegram_markup(markup)?);
        }
        if let Some(mode) = options.parse_mode {
            request = request.parse_mode(parse_mode(mode));
        }
        if options.disable_preview {
            request = request.disable_web_page_preview(true);
        }
        let message = request.await.map_err(classify)?;
        Ok(SentMessage {
            chat_id: message.chat.id.0,
            id: message.id.0,
        })
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        markup: Option<&Markup>,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text);
        if let Some(markup) = markup {
            request = request.reply_markup(to_telegram_markup(markup)?);
        }
        request.await.map_err(classify)?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn get_message(
        &self,
        _chat_id: i64,
        _message_id: i32,
    ) -> Result<LiveMessage, TransportError> {
        Err(TransportError::Unsupported("get_message"))
    }

    async fn answer_callback_query(
        &self,
        query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), TransportError> {
        let mut request = self.bot.answer_callback_query(query_id.to_string());
        if let Some(text) = text {
            request = request.text(text.to_string());
        }
        if show_alert {
            request = request.show_alert(true);
        }
        request.await.map_err(classify)?;
        Ok(())
    }

    async fn get_member_status(
        &self,
        chat_id: i64,
        user_id: u64,
    ) -> Result<MemberStatus, TransportError> {
        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), UserId(user_id))
            .await
            .map_err(classify)?;
        Ok(match member.kind {
            ChatMemberKind::Owner(_) => MemberStatus::Owner,
            ChatMemberKind::Administrator(_) => MemberStatus::Administrator,
            ChatMemberKind::Member => MemberStatus::Member,
            ChatMemberKind::Restricted(_) => MemberStatus::Restricted,
            ChatMemberKind::Left => MemberStatus::Left,
            ChatMemberKind::Banned(_) => MemberStatus::Banned,
        })
    }
}

fn user_ref(user: &User) -> UserRef {
    UserRef {
        id: user.id.0,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
    }
}

fn chat_ref(msg: &Message) -> ChatRef {
    ChatRef {
        id: msg.chat.id.0,
        private: msg.chat.is_private(),
        title: msg.chat.title().map(str::to_string),
    }
}

fn live_message(msg: &Message) -> LiveMessage {
    LiveMessage {
        chat_id: msg.chat.id.0,
        id: msg.id.0,
        text: msg.text().map(str::to_string),
        markup: msg.reply_markup().map(from_telegram_markup),
        empty: false,
    }
}

pub fn message_update(msg: &Message) -> update::Update {
    let joined: Vec<UserRef> = msg
        .new_chat_members()
        .map(|users| users.iter().map(user_ref).collect())
        .unwrap_or_default();
    let left = msg.left_chat_member().map(user_ref);
    if !joined.is_empty() || left.is_some() {
        return update::Update::MemberChange {
            chat: chat_ref(msg),
            message_id: msg.id.0,
            joined,
            left,
        };
    }
    update::Update::Message(IncomingMessage {
        id: msg.id.0,
        chat: chat_ref(msg),
        from: msg.from().map(user_ref),
        text: msg.text().map(str::to_string),
    })
}

pub fn callback_update(query: &teloxide::types::CallbackQuery) -> update::Update {
    update::Update::CallbackQuery(QueryUpdate {
        id: query.id.clone(),
        from: user_ref(&query.from),
        message: query.message.as_ref().map(live_message),
        data: query.data.clone(),
    })
}
