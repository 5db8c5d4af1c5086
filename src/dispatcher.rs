use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::UpdateContext;
use crate::gui::GuiError;
use crate::update::Update;

pub const FAILURE_NOTICE: &str = "Something went wrong, try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Initialize,
    Main,
    Restore,
    Finish,
    Finalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initialize => "INITIALIZE",
            Phase::Main => "MAIN",
            Phase::Restore => "RESTORE",
            Phase::Finish => "FINISH",
            Phase::Finalize => "FINALIZE",
        };
        f.write_str(name)
    }
}

/// What a handler wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Not interested; offer the update to the next handler of the group.
    Continue,
    /// Done with this group; move on to the next one.
    Handled,
    /// Skip the remaining groups of the phase.
    Stop,
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, _update: &Update) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow>;
}

/// How an update left the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// MAIN and FINISH completed.
    Finished,
    /// MAIN or FINISH failed and RESTORE ran.
    Restored,
    /// INITIALIZE stopped or failed; only FINALIZE ran.
    Aborted,
    Cancelled,
}

enum PhaseEnd {
    Completed,
    Stopped,
}

type Groups = BTreeMap<i32, Vec<Arc<dyn Handler>>>;

/// Runs every update through INITIALIZE, MAIN, FINISH or RESTORE, then FINALIZE.
pub struct StagedDispatcher {
    phases: HashMap<Phase, Groups>,
    serialize_chats: bool,
    chat_locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl StagedDispatcher {
    pub fn new(serialize_chats: bool) -> Self {
        StagedDispatcher {
            phases: HashMap::new(),
            serialize_chats,
            chat_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Handlers of one group run in registration order.
    pub fn add_handler(&mut self, phase: Phase, group: i32, handler: Arc<dyn Handler>) {
        debug!("registering {} in {} group {}", handler.name(), phase, group);
        self.phases
            .entry(phase)
            .or_default()
            .entry(group)
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, phase: Phase) -> usize {
        self.phases
            .get(&phase)
            .map(|groups| groups.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn chat_lock(&self, chat_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(chat_id).or_default().clone()
    }

    fn release_chat_lock(&self, chat_id: i64) {
        let mut locks = self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(&chat_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&chat_id);
            }
        }
    }

    pub async fn process(&self, mut ctx: UpdateContext, cancel: &CancellationToken) -> Outcome {
        let chat_id = match self.serialize_chats {
            true => ctx.update.chat_id(),
            false => None,
        };
        let outcome = match chat_id {
            Some(chat_id) => {
                let lock = self.chat_lock(chat_id);
                let outcome = {
                    let _guard = lock.lock().await;
                    self.run_phases(&mut ctx, cancel).await
                };
                drop(lock);
                self.release_chat_lock(chat_id);
                outcome
            }
            None => self.run_phases(&mut ctx, cancel).await,
        };
        debug!("{} done: {:?}", ctx.update.describe(), outcome);
        outcome
    }

    async fn run_phases(&self, ctx: &mut UpdateContext, cancel: &CancellationToken) -> Outcome {
        let outcome = self.run_main_phases(ctx, cancel).await;
        self.run_finalize(ctx).await;
        outcome
    }

    async fn run_main_phases(&self, ctx: &mut UpdateContext, cancel: &CancellationToken) -> Outcome {
        let initialized = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled,
            result = self.run_phase(Phase::Initialize, ctx) => result,
        };
        match initialized {
            Ok(PhaseEnd::Completed) => {}
            Ok(PhaseEnd::Stopped) => {
                debug!("{}: initialization stopped", ctx.update.describe());
                return Outcome::Aborted;
            }
            Err(err) => {
                error!("{}: {:#}", ctx.update.describe(), err);
                return Outcome::Aborted;
            }
        }

        let main = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.run_phase(Phase::Main, ctx) => Some(result),
        };
        match main {
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                self.report_failure(ctx, &err).await;
                self.run_restore(ctx).await;
                return Outcome::Restored;
            }
            None => {
                info!("{}: cancelled", ctx.update.describe());
                self.run_restore(ctx).await;
                return Outcome::Cancelled;
            }
        }

        match self.run_phase(Phase::Finish, ctx).await {
            Ok(_) => Outcome::Finished,
            Err(err) => {
                self.report_failure(ctx, &err).await;
                self.run_restore(ctx).await;
                Outcome::Restored
            }
        }
    }

    async fn run_phase(&self, phase: Phase, ctx: &mut UpdateContext) -> Result<PhaseEnd> {
        let Some(groups) = self.phases.get(&phase) else {
            return Ok(PhaseEnd::Completed);
        };
        let update = ctx.update.clone();
        for (group, handlers) in groups {
            for handler in handlers {
                if !handler.check(&update) {
                    continue;
                }
                let flow = handler
                    .handle(ctx)
                    .await
                    .with_context(|| format!("{} handler {} (group {})", phase, handler.name(), group))?;
                match flow {
                    Flow::Continue => continue,
                    Flow::Handled => break,
                    Flow::Stop => {
                        debug!("{} stopped by {}", phase, handler.name());
                        return Ok(PhaseEnd::Stopped);
                    }
                }
            }
        }
        Ok(PhaseEnd::Completed)
    }

    async fn run_restore(&self, ctx: &mut UpdateContext) {
        if let Err(err) = self.run_phase(Phase::Restore, ctx).await {
            error!("{}: {:#}", ctx.update.describe(), err);
        }
    }

    /// Every FINALIZE handler runs even when an earlier one fails.
    async fn run_finalize(&self, ctx: &mut UpdateContext) {
        let Some(groups) = self.phases.get(&Phase::Finalize) else {
            return;
        };
        let update = ctx.update.clone();
        for handlers in groups.values() {
            for handler in handlers {
                if !handler.check(&update) {
                    continue;
                }
                if let Err(err) = handler.handle(ctx).await {
                    error!(
                        "{}: FINALIZE handler {}: {:#}",
                        update.describe(),
                        handler.name(),
                        err
                    );
                }
            }
        }
    }

    async fn report_failure(&self, ctx: &mut UpdateContext, err: &anyhow::Error) {
        match err.downcast_ref::<GuiError>() {
            Some(gui) if gui.is_expected() => {
                info!("{}: {:#}", ctx.update.describe(), err);
            }
            _ => error!("{}: {:#}", ctx.update.describe(), err),
        }
        if ctx.callback_query.is_some() && !ctx.callback_answered {
            if let Err(err) = ctx.answer_callback(Some(FAILURE_NOTICE), true).await {
                warn!("failed to answer callback query: {:#}", err);
            }
            return;
        }
        if matches!(*ctx.update, Update::Message(_)) {
            if let Err(err) = ctx.reply(FAILURE_NOTICE) {
                warn!("failed to queue failure notice: {:#}", err);
            }
        }
    }
}
