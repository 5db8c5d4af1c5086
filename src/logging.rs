use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::sender::{MessageSender, OutgoingMessage};
use crate::transport::SendOptions;

pub const FORWARD_PRIORITY: u8 = 1;

struct Forward {
    sender: MessageSender,
    chat_id: i64,
}

/// `env_logger` output plus a copy of every warning and error sent to an
/// admin chat once forwarding is attached.
struct ForwardingLogger {
    inner: env_logger::Logger,
    forward: Arc<OnceLock<Forward>>,
}

impl Log for ForwardingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata) || metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record<'_>) {
        if self.inner.matches(record) {
            self.inner.log(record);
        }
        if record.level() > Level::Warn {
            return;
        }
        let Some(forward) = self.forward.get() else {
            return;
        };
        let text = format!("{} [{}] {}", record.level(), record.target(), record.args());
        let options = SendOptions {
            ignore_errors: true,
            disable_preview: true,
            ..SendOptions::default()
        };
        let message = OutgoingMessage::new(forward.chat_id, text)
            .priority(FORWARD_PRIORITY)
            .options(options);
        // Nowhere left to report a failure to queue the copy.
        let _ = forward.sender.send(message);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Handle for attaching chat forwarding to the installed logger.
#[derive(Clone)]
pub struct LogForwarding {
    forward: Arc<OnceLock<Forward>>,
}

impl LogForwarding {
    /// Starts forwarding warnings and errors to `chat_id`. Only the first call
    /// takes effect.
    pub fn attach(&self, sender: MessageSender, chat_id: i64) -> bool {
        self.forward.set(Forward { sender, chat_id }).is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.forward.get().is_some()
    }
}

/// Installs the global logger; `RUST_LOG` overrides `default_filter`.
pub fn init(default_filter: &str) -> Result<LogForwarding> {
    let inner = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .build();
    let max_level = inner.filter().max(LevelFilter::Warn);
    let forward = Arc::new(OnceLock::new());
    let logger = ForwardingLogger {
        inner,
        forward: forward.clone(),
    };
    log::set_boxed_logger(Box::new(logger)).context("install logger")?;
    log::set_max_level(max_level);
    Ok(LogForwarding { forward })
}
