use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::config::{LimitsConfig, SenderConfig};
use crate::invoker::{ChainLink, ChainWaiter, InvokeError, InvokeOptions};
use crate::limiter::Limiter;
use crate::split_text::{split_text_by_units, SplitOptions, DEFAULT_UNITS};
use crate::transport::{is_user_chat, SendOptions, SentMessage};

const CHAIN_PRUNE_THRESHOLD: usize = 1024;
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Logical message: split into fragments and queued by `MessageSender::send`.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub text: String,
    pub chat_id: i64,
    /// Lower value goes first.
    pub priority: u8,
    pub blocking: bool,
    pub options: SendOptions,
}

impl OutgoingMessage {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        OutgoingMessage {
            text: text.into(),
            chat_id,
            priority: 2,
            blocking: false,
            options: SendOptions::default(),
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn options(mut self, options: SendOptions) -> Self {
        self.options = options;
        self
    }
}

type DeliveryResult = Result<Option<SentMessage>>;

/// Completion handle of a blocking send. Resolves once every fragment finished:
/// with the last sent fragment, `None` when failures were ignored, or the first
/// failure.
pub struct Delivery {
    rx: oneshot::Receiver<DeliveryResult>,
}

impl Delivery {
    pub async fn wait(self) -> Result<Option<SentMessage>> {
        self.rx
            .await
            .map_err(|_| anyhow!("message sender stopped before delivery"))?
    }
}

struct BatchState {
    remaining: usize,
    last: Option<SentMessage>,
    error: Option<anyhow::Error>,
    tx: Option<oneshot::Sender<DeliveryResult>>,
}

struct Batch {
    state: Mutex<BatchState>,
}

impl Batch {
    fn new(fragments: usize) -> (Arc<Batch>, Delivery) {
        let (tx, rx) = oneshot::channel();
        let batch = Batch {
            state: Mutex::new(BatchState {
                remaining: fragments,
                last: None,
                error: None,
                tx: Some(tx),
            }),
        };
        (Arc::new(batch), Delivery { rx })
    }

    fn finish(&self, outcome: DeliveryResult) {
        let mut state = lock(&self.state);
        state.remaining = state.remaining.saturating_sub(1);
        match outcome {
            Ok(Some(message)) => state.last = Some(message),
            Ok(None) => {}
            Err(err) => {
                if state.error.is_none() {
                    state.error = Some(err);
                }
            }
        }
        if state.remaining > 0 {
            return;
        }
        if let Some(tx) = state.tx.take() {
            let result = match state.error.take() {
                Some(err) => Err(err),
                None => Ok(state.last.take()),
            };
            let _ = tx.send(result);
        }
    }
}

struct Fragment {
    text: String,
    chat_id: i64,
    priority: u8,
    options: SendOptions,
    batch: Option<Arc<Batch>>,
}

#[derive(Default)]
struct QueueState {
    items: BTreeMap<(u8, u64), Fragment>,
    next_seq: u64,
    in_flight: HashMap<u8, usize>,
    total_in_flight: usize,
}

struct SenderInner {
    client: Client,
    config: SenderConfig,
    limits: LimitsConfig,
    queue: Mutex<QueueState>,
    wakeup: Notify,
    global_limiter: Arc<Limiter>,
    target_limiters: Mutex<HashMap<i64, Arc<Limiter>>>,
    chains: Mutex<HashMap<(i64, u8), ChainWaiter>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Priority queue of outbound messages served by a background worker.
#[derive(Clone)]
pub struct MessageSender {
    inner: Arc<SenderInner>,
}

impl MessageSender {
    pub fn new(client: Client, config: SenderConfig, limits: LimitsConfig) -> Self {
        let global_limiter = Arc::new(Limiter::from_config("broadcast_messages", limits.global));
        MessageSender {
            inner: Arc::new(SenderInner {
                client,
                config,
                limits,
                queue: Mutex::new(QueueState::default()),
                wakeup: Notify::new(),
                global_limiter,
                target_limiters: Mutex::new(HashMap::new()),
                chains: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn default_priority(&self) -> u8 {
        self.inner.config.default_priority
    }

    pub fn fragments(&self, title: &str, text: &str) -> Result<Vec<String>> {
        split_text_by_units(
            title,
            text,
            self.inner.config.max_message_length,
            &DEFAULT_UNITS,
            &SplitOptions::default(),
        )
        .context("split message text")
    }

    /// Queues `message`. Returns a delivery handle for blocking sends.
    pub fn send(&self, message: OutgoingMessage) -> Result<Option<Delivery>> {
        let texts = self.fragments(&message.options.title, &message.text)?;
        let count = texts.len();
        let (batch, delivery) = if message.blocking {
            let (batch, delivery) = Batch::new(count);
            (Some(batch), Some(delivery))
        } else {
            (None, None)
        };
        let mut queue = lock(&self.inner.queue);
        debug!(
            "queueing {} part(s) for chat {} with priority {} ({}, next id {})",
            count,
            message.chat_id,
            message.priority,
            if message.blocking { "blocking" } else { "non-blocking" },
            queue.next_seq
        );
        for (index, text) in texts.into_iter().enumerate() {
            let mut options = message.options.clone();
            if index + 1 < count {
                options.markup = None;
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.items.insert(
                (message.priority, seq),
                Fragment {
                    text,
                    chat_id: message.chat_id,
                    priority: message.priority,
                    options,
                    batch: batch.clone(),
                },
            );
        }
        drop(queue);
        self.inner.wakeup.notify_one();
        Ok(delivery)
    }

    pub async fn send_and_wait(&self, message: OutgoingMessage) -> Result<Option<SentMessage>> {
        match self.send(message.blocking())? {
            Some(delivery) => delivery.wait().await,
            None => Ok(None),
        }
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner.queue).items.len()
    }

    /// Worker loop; returns once `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("message sender started");
        let mut prune = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = prune.tick() => self.prune_limiters().await,
                fragment = self.next_fragment() => self.dispatch(fragment, cancel.clone()),
            }
        }
        self.abandon_queue();
        info!("message sender stopped");
        Ok(())
    }

    async fn next_fragment(&self) -> Fragment {
        loop {
            let notified = self.inner.wakeup.notified();
            if let Some(fragment) = self.take_ready() {
                return fragment;
            }
            notified.await;
        }
    }

    /// Pops the most urgent fragment whose priority tier still has capacity.
    fn take_ready(&self) -> Option<Fragment> {
        let config = &self.inner.config;
        let mut queue = lock(&self.inner.queue);
        if queue.total_in_flight >= config.max_concurrent {
            return None;
        }
        let key = queue
            .items
            .keys()
            .find(|(priority, _)| {
                queue.in_flight.get(priority).copied().unwrap_or(0) < config.per_priority_limit
            })
            .copied()?;
        let fragment = queue.items.remove(&key)?;
        *queue.in_flight.entry(fragment.priority).or_insert(0) += 1;
        queue.total_in_flight += 1;
        Some(fragment)
    }

    fn release(&self, priority: u8) {
        let mut queue = lock(&self.inner.queue);
        if let Some(count) = queue.in_flight.get_mut(&priority) {
            *count = count.saturating_sub(1);
        }
        queue.total_in_flight = queue.total_in_flight.saturating_sub(1);
        drop(queue);
        self.inner.wakeup.notify_one();
    }

    /// Links a new call into the (chat, priority) chain and returns the signal it
    /// must wait for together with its own completion link.
    fn link_chain(&self, chat_id: i64, priority: u8) -> (Option<ChainWaiter>, ChainLink) {
        let link = ChainLink::new();
        let mut chains = lock(&self.inner.chains);
        if chains.len() > CHAIN_PRUNE_THRESHOLD {
            chains.retain(|_, waiter| !waiter.is_fired());
        }
        let previous = chains.insert((chat_id, priority), link.waiter());
        (previous, link)
    }

    fn target_limiter(&self, chat_id: i64) -> Arc<Limiter> {
        let limits = &self.inner.limits;
        let mut limiters = lock(&self.inner.target_limiters);
        limiters
            .entry(chat_id)
            .or_insert_with(|| {
                let limiter = if is_user_chat(chat_id) {
                    Limiter::from_config(format!("user_{}", chat_id), limits.user)
                } else {
                    Limiter::from_config(format!("chat_{}", chat_id), limits.group)
                };
                Arc::new(limiter.dynamic())
            })
            .clone()
    }

    async fn prune_limiters(&self) {
        let candidates: Vec<(i64, Arc<Limiter>)> = lock(&self.inner.target_limiters)
            .iter()
            .map(|(chat_id, limiter)| (*chat_id, limiter.clone()))
            .collect();
        let mut stale = Vec::new();
        for (chat_id, limiter) in candidates {
            if limiter.is_old().await {
                stale.push(chat_id);
            }
        }
        if stale.is_empty() {
            return;
        }
        let mut limiters = lock(&self.inner.target_limiters);
        for chat_id in stale {
            if let Some(limiter) = limiters.get(&chat_id) {
                // Still referenced by an in-flight send.
                if Arc::strong_count(limiter) == 1 {
                    limiters.remove(&chat_id);
                }
            }
        }
    }

    fn dispatch(&self, fragment: Fragment, cancel: CancellationToken) {
        let (after, link) = self.link_chain(fragment.chat_id, fragment.priority);
        let options = InvokeOptions {
            ignore_errors: fragment.options.ignore_errors,
            max_attempts: self.inner.config.max_attempts,
            limiters: vec![
                self.inner.global_limiter.clone(),
                self.target_limiter(fragment.chat_id),
            ],
            after,
            link: Some(link),
        };
        let sender = self.clone();
        tokio::spawn(async move {
            let Fragment {
                text,
                chat_id,
                priority,
                options: send_options,
                batch,
            } = fragment;
            debug!("sending message to chat {} with priority {}", chat_id, priority);
            let client = sender.client();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(InvokeError::Cancelled),
                result = client.send_message(chat_id, &text, &send_options, options) => result,
            };
            let outcome = match result {
                Ok(message) => Ok(Some(message)),
                Err(InvokeError::Cancelled) => {
                    debug!("send to chat {} cancelled", chat_id);
                    Err(anyhow::Error::new(InvokeError::Cancelled))
                }
                Err(err) if send_options.ignore_errors => {
                    info!("ignored failure sending message to chat {}: {}", chat_id, err);
                    Ok(None)
                }
                Err(err) => {
                    let err = anyhow::Error::new(err)
                        .context(format!("send message to chat {}", chat_id));
                    error!("{:#}", err);
                    Err(err)
                }
            };
            if let Some(batch) = batch {
                batch.finish(outcome);
            }
            sender.release(priority);
        });
    }

    fn abandon_queue(&self) {
        let items = std::mem::take(&mut lock(&self.inner.queue).items);
        if !items.is_empty() {
            info!("dropping {} unsent message part(s)", items.len());
        }
        for fragment in items.into_values() {
            if let Some(batch) = fragment.batch {
                batch.finish(Err(anyhow::Error::new(InvokeError::Cancelled)));
            }
        }
    }
}
