use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Config, LimitsConfig, RateLimit, SenderConfig};
use crate::transport::{
    LiveMessage, Markup, MemberStatus, SendOptions, SentMessage, Transport, TransportError,
};
use crate::update::{CallbackQuery, ChatRef, IncomingMessage, Update, UserRef};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send { chat_id: i64, text: String },
    Edit { chat_id: i64, message_id: i32, text: String },
    Delete { chat_id: i64, message_id: i32 },
    Get { chat_id: i64, message_id: i32 },
    Answer { query_id: String, text: Option<String>, alert: bool },
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    send_failures: VecDeque<TransportError>,
    send_delays: HashMap<i64, VecDeque<Duration>>,
    messages: HashMap<(i64, i32), LiveMessage>,
    next_id: i32,
    fetch_unsupported: bool,
    members: HashMap<(i64, u64), MemberStatus>,
}

/// In-memory chat service. Calls are recorded when they complete.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(MockTransport::default())
    }

    /// A transport that cannot read messages back, like the Bot API.
    pub fn without_fetch() -> Arc<Self> {
        let mock = MockTransport::default();
        mock.state.lock().unwrap().fetch_unsupported = true;
        Arc::new(mock)
    }

    pub fn fail_send(&self, err: TransportError) {
        self.state.lock().unwrap().send_failures.push_back(err);
    }

    /// Holds the next send to `chat_id` back by `delay`.
    pub fn delay_next_send(&self, chat_id: i64, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .send_delays
            .entry(chat_id)
            .or_default()
            .push_back(delay);
    }

    pub fn set_member_status(&self, chat_id: i64, user_id: u64, status: MemberStatus) {
        self.state
            .lock()
            .unwrap()
            .members
            .insert((chat_id, user_id), status);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn sent_texts(&self) -> Vec<(i64, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { chat_id, text } => Some((chat_id, text)),
                _ => None,
            })
            .collect()
    }

    pub fn answers(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Answer { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn message(&self, chat_id: i64, message_id: i32) -> Option<LiveMessage> {
        self.state.lock().unwrap().messages.get(&(chat_id, message_id)).cloned()
    }

    /// Most recently sent message of the chat that still exists.
    pub fn last_message(&self, chat_id: i64) -> Option<LiveMessage> {
        let state = self.state.lock().unwrap();
        state
            .messages
            .values()
            .filter(|message| message.chat_id == chat_id)
            .max_by_key(|message| message.id)
            .cloned()
    }

    pub fn remove_message(&self, chat_id: i64, message_id: i32) {
        self.state.lock().unwrap().messages.remove(&(chat_id, message_id));
    }

    pub fn set_markup(&self, chat_id: i64, message_id: i32, markup: Markup) {
        if let Some(message) = self.state.lock().unwrap().messages.get_mut(&(chat_id, message_id)) {
            message.markup = Some(markup);
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        options: &SendOptions,
    ) -> Result<SentMessage, TransportError> {
        let (delay, failure) = {
            let mut state = self.state.lock().unwrap();
            let delay = state
                .send_delays
                .get_mut(&chat_id)
                .and_then(VecDeque::pop_front);
            (delay, state.send_failures.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.messages.insert(
            (chat_id, id),
            LiveMessage {
                chat_id,
                id,
                text: Some(text.to_string()),
                markup: options.markup.clone(),
                empty: false,
            },
        );
        state.calls.push(Call::Send {
            chat_id,
            text: text.to_string(),
        });
        Ok(SentMessage { chat_id, id })
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        markup: Option<&Markup>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        let message = state
            .messages
            .get_mut(&(chat_id, message_id))
            .ok_or(TransportError::MessageNotFound)?;
        if message.text.as_deref() == Some(text) && message.markup.as_ref() == markup {
            return Err(TransportError::MessageNotModified);
        }
        message.text = Some(text.to_string());
        message.markup = markup.cloned();
        state.calls.push(Call::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        let removed = self
            .state
            .lock()
            .unwrap()
            .messages
            .remove(&(chat_id, message_id));
        if removed.is_none() {
            return Err(TransportError::MessageNotFound);
        }
        self.record(Call::Delete { chat_id, message_id });
        Ok(())
    }

    async fn get_message(&self, chat_id: i64, message_id: i32) -> Result<LiveMessage, TransportError> {
        let state = self.state.lock().unwrap();
        if state.fetch_unsupported {
            return Err(TransportError::Unsupported("get_message"));
        }
        let message = state.messages.get(&(chat_id, message_id)).cloned();
        drop(state);
        self.record(Call::Get { chat_id, message_id });
        message.ok_or(TransportError::MessageNotFound)
    }

    async fn answer_callback_query(
        &self,
        query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), TransportError> {
        self.record(Call::Answer {
            query_id: query_id.to_string(),
            text: text.map(str::to_string),
            alert: show_alert,
        });
        Ok(())
    }

    async fn get_member_status(
        &self,
        chat_id: i64,
        user_id: u64,
    ) -> Result<MemberStatus, TransportError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .members
            .get(&(chat_id, user_id))
            .copied()
            .unwrap_or(MemberStatus::Left))
    }
}

fn generous() -> RateLimit {
    RateLimit {
        amount: 1000,
        period_secs: 1.0,
    }
}

pub fn test_config() -> Config {
    Config {
        token: "token".to_string(),
        admin_chat_id: None,
        data_path: PathBuf::from("unused.json"),
        serialize_chats: true,
        sender: SenderConfig::default(),
        limits: LimitsConfig {
            global: generous(),
            user: generous(),
            group: generous(),
        },
    }
}

pub fn user(id: u64) -> UserRef {
    UserRef {
        id,
        username: Some(format!("user{}", id)),
        first_name: format!("User {}", id),
    }
}

pub fn text_message(chat_id: i64, from: u64, text: &str) -> Update {
    Update::Message(IncomingMessage {
        id: 1,
        chat: ChatRef {
            id: chat_id,
            private: chat_id > 0,
            title: (chat_id < 0).then(|| format!("Group {}", chat_id)),
        },
        from: Some(user(from)),
        text: Some(text.to_string()),
    })
}

/// A press of the button labelled `label` on `message`.
pub fn press(message: &LiveMessage, from: u64, label: &str) -> Update {
    let data = message
        .markup
        .as_ref()
        .and_then(|markup| markup.buttons().find(|button| button.text == label))
        .and_then(|button| button.callback_data())
        .map(str::to_string);
    assert!(data.is_some(), "no button {:?} on {:?}", label, message.markup);
    Update::CallbackQuery(CallbackQuery {
        id: format!("query-{}", label),
        from: user(from),
        message: Some(message.clone()),
        data,
    })
}

pub fn labels(message: &LiveMessage) -> Vec<String> {
    message
        .markup
        .as_ref()
        .map(|markup| markup.buttons().map(|button| button.text.clone()).collect())
        .unwrap_or_default()
}
