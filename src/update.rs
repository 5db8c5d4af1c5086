use std::fmt;

use crate::transport::LiveMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRef {
    pub id: i64,
    pub private: bool,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: u64,
    pub username: Option<String>,
    pub first_name: String,
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(username) => write!(f, "@{} ({})", username, self.id),
            None => write!(f, "{} ({})", self.first_name, self.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: i32,
    pub chat: ChatRef,
    pub from: Option<UserRef>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    pub from: UserRef,
    /// Message the pressed keyboard is attached to, as the chat service sent it.
    pub message: Option<LiveMessage>,
    pub data: Option<String>,
}

/// Parsed update handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Message(IncomingMessage),
    CallbackQuery(CallbackQuery),
    MemberChange {
        chat: ChatRef,
        message_id: i32,
        joined: Vec<UserRef>,
        left: Option<UserRef>,
    },
}

impl Update {
    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Update::Message(message) => Some(message.chat.id),
            Update::CallbackQuery(query) => query.message.as_ref().map(|m| m.chat_id),
            Update::MemberChange { chat, .. } => Some(chat.id),
        }
    }

    /// User who caused the update.
    pub fn actor(&self) -> Option<&UserRef> {
        match self {
            Update::Message(message) => message.from.as_ref(),
            Update::CallbackQuery(query) => Some(&query.from),
            Update::MemberChange { joined, left, .. } => left.as_ref().or(joined.first()),
        }
    }

    pub fn chat(&self) -> Option<&ChatRef> {
        match self {
            Update::Message(message) => Some(&message.chat),
            Update::MemberChange { chat, .. } => Some(chat),
            Update::CallbackQuery(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Update::Message(message) => message.text.as_deref(),
            _ => None,
        }
    }

    /// Command name without the leading slash and bot mention.
    pub fn command(&self) -> Option<&str> {
        parse_command(self.text()?)
    }

    pub fn callback_query(&self) -> Option<&CallbackQuery> {
        match self {
            Update::CallbackQuery(query) => Some(query),
            _ => None,
        }
    }

    /// Short label for log lines.
    pub fn describe(&self) -> String {
        let kind = match self {
            Update::Message(_) => "message",
            Update::CallbackQuery(_) => "callback query",
            Update::MemberChange { .. } => "member change",
        };
        let actor = self
            .actor()
            .map(|user| user.to_string())
            .unwrap_or_else(|| "unknown user".to_string());
        match self.chat_id() {
            Some(chat_id) => format!("{} from {} in chat {}", kind, actor, chat_id),
            None => format!("{} from {}", kind, actor),
        }
    }
}

pub fn parse_command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    let cmd = first.trim_start_matches('/');
    Some(cmd.split('@').next().unwrap_or(cmd))
}
