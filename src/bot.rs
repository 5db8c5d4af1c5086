use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::config::Config;
use crate::context::UpdateContext;
use crate::dispatcher::{Handler, Outcome, Phase, StagedDispatcher};
use crate::groups::GroupManager;
use crate::gui::{self, ButtonKind, Registry, WindowClass};
use crate::sender::MessageSender;
use crate::store::Store;
use crate::tasks::{self, TaskSpawner};
use crate::transport::Transport;
use crate::update::Update;
use crate::users;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Capabilities shared by every update.
pub struct Services {
    pub config: Config,
    pub store: Arc<Store>,
    pub client: Client,
    pub sender: MessageSender,
    pub windows: Registry<&'static dyn WindowClass>,
    pub buttons: Registry<ButtonKind>,
}

pub struct BotBuilder {
    config: Config,
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    windows: Registry<&'static dyn WindowClass>,
    groups: GroupManager,
    handlers: Vec<(Phase, i32, Arc<dyn Handler>)>,
}

impl BotBuilder {
    pub fn new(config: Config, store: Arc<Store>, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate().context("invalid config")?;
        Ok(BotBuilder {
            config,
            store,
            transport,
            windows: Registry::new("window"),
            groups: GroupManager::with_defaults()?,
            handlers: Vec::new(),
        })
    }

    pub fn window(mut self, class: &'static dyn WindowClass) -> Result<Self> {
        self.windows.register(class)?;
        Ok(self)
    }

    /// Named group numbers, for placing custom handlers relative to the
    /// built-in ones.
    pub fn groups(&mut self) -> &mut GroupManager {
        &mut self.groups
    }

    pub fn handler(mut self, phase: Phase, group: i32, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push((phase, group, handler));
        self
    }

    pub fn build(self) -> Result<BotController> {
        let mut buttons = Registry::new("button");
        for kind in ButtonKind::ALL {
            buttons.register(kind)?;
        }
        let client = Client::new(self.transport, self.config.sender.max_attempts);
        let sender = MessageSender::new(
            client.clone(),
            self.config.sender.clone(),
            self.config.limits.clone(),
        );
        let mut dispatcher = StagedDispatcher::new(self.config.serialize_chats);
        users::register_handlers(&mut dispatcher, &self.groups)?;
        gui::register_handlers(&mut dispatcher, &self.groups)?;
        for (phase, group, handler) in self.handlers {
            dispatcher.add_handler(phase, group, handler);
        }
        info!(
            "bot ready: {} window class(es), {} MAIN handler(s)",
            self.windows.len(),
            dispatcher.handler_count(Phase::Main)
        );
        let services = Services {
            config: self.config,
            store: self.store,
            client,
            sender,
            windows: self.windows,
            buttons,
        };
        let (spawner, supervisor) = tasks::supervisor();
        Ok(BotController {
            services: Arc::new(services),
            dispatcher: Arc::new(dispatcher),
            cancel: CancellationToken::new(),
            spawner,
            supervisor: Mutex::new(Some(supervisor)),
            monitor: Mutex::new(None),
        })
    }
}

/// A running bot: shared services, the staged dispatcher and the background
/// tasks, all stopped by one cancellation token.
pub struct BotController {
    services: Arc<Services>,
    dispatcher: Arc<StagedDispatcher>,
    cancel: CancellationToken,
    spawner: TaskSpawner,
    supervisor: Mutex<Option<tasks::TaskSupervisor>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl BotController {
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawner(&self) -> TaskSpawner {
        self.spawner.clone()
    }

    /// Starts the task monitor and the message sender. Calling it twice is a
    /// no-op.
    pub fn start(&self) -> Result<()> {
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(supervisor) = supervisor else {
            return Ok(());
        };
        let monitor = tokio::spawn(supervisor.run(self.cancel.clone(), SHUTDOWN_GRACE));
        *self.monitor.lock().unwrap_or_else(PoisonError::into_inner) = Some(monitor);
        let sender = self.services.sender.clone();
        let cancel = self.cancel.clone();
        self.spawner
            .spawn("message_sender", async move { sender.run(cancel).await })
            .context("start message sender")?;
        Ok(())
    }

    pub async fn process_update(&self, update: Update) -> Outcome {
        let ctx = UpdateContext::new(self.services.clone(), Arc::new(update));
        self.dispatcher.process(ctx, &self.cancel).await
    }

    /// Cancels everything and waits for the background tasks to wind down.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.cancel.cancel();
        let monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(monitor) = monitor {
            if let Err(err) = monitor.await {
                error!("task monitor failed: {}", err);
            }
        }
    }
}
