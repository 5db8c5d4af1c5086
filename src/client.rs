use std::sync::Arc;

use crate::invoker::{invoke, InvokeError, InvokeOptions};
use crate::transport::{LiveMessage, Markup, MemberStatus, SendOptions, SentMessage, Transport};

/// Transport handle whose every call goes through the retry invoker.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    max_attempts: u32,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, max_attempts: u32) -> Self {
        Client {
            transport,
            max_attempts,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn options(&self) -> InvokeOptions {
        InvokeOptions {
            max_attempts: self.max_attempts,
            ..InvokeOptions::default()
        }
    }

    /// Sends one message as-is, without splitting or queueing.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        send_options: &SendOptions,
        mut options: InvokeOptions,
    ) -> Result<SentMessage, InvokeError> {
        if options.max_attempts == 0 {
            options.max_attempts = self.max_attempts;
        }
        invoke(options, || self.transport.send_message(chat_id, text, send_options)).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        markup: Option<&Markup>,
    ) -> Result<(), InvokeError> {
        invoke(self.options(), || {
            self.transport
                .edit_message_text(chat_id, message_id, text, markup)
        })
        .await
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), InvokeError> {
        invoke(self.options(), || {
            self.transport.delete_message(chat_id, message_id)
        })
        .await
    }

    pub async fn get_message(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<LiveMessage, InvokeError> {
        invoke(self.options(), || self.transport.get_message(chat_id, message_id)).await
    }

    pub async fn answer_callback_query(
        &self,
        query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), InvokeError> {
        invoke(self.options(), || {
            self.transport
                .answer_callback_query(query_id, text, show_alert)
        })
        .await
    }

    pub async fn member_status(&self, chat_id: i64, user_id: u64) -> Result<MemberStatus, InvokeError> {
        invoke(self.options(), || self.transport.get_member_status(chat_id, user_id)).await
    }
}
