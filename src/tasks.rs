use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type TaskOutcome = (String, Result<Result<()>, JoinError>);

/// Spawns named background tasks onto the supervisor.
#[derive(Clone)]
pub struct TaskSpawner {
    tx: mpsc::UnboundedSender<(String, TaskFuture)>,
}

impl TaskSpawner {
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        self.tx
            .send((name, Box::pin(future)))
            .map_err(|mpsc::error::SendError((name, _))| anyhow!("task supervisor stopped; {} not started", name))
    }
}

/// Owns every background task and logs how each one ends.
pub struct TaskSupervisor {
    rx: mpsc::UnboundedReceiver<(String, TaskFuture)>,
    tasks: JoinSet<TaskOutcome>,
    aborts: Vec<AbortHandle>,
}

pub fn supervisor() -> (TaskSpawner, TaskSupervisor) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        TaskSpawner { tx },
        TaskSupervisor {
            rx,
            tasks: JoinSet::new(),
            aborts: Vec::new(),
        },
    )
}

impl TaskSupervisor {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn start(&mut self, name: String, future: TaskFuture) {
        info!("starting task {}", name);
        // The inner spawn turns a panic into a JoinError that still knows the name.
        let handle = tokio::spawn(future);
        self.aborts.retain(|abort| !abort.is_finished());
        self.aborts.push(handle.abort_handle());
        self.tasks.spawn(async move { (name, handle.await) });
    }

    fn report((name, outcome): TaskOutcome) {
        match outcome {
            Ok(Ok(())) => info!("task {} finished", name),
            Ok(Err(err)) => error!("task {} failed: {:#}", name, err),
            Err(err) if err.is_panic() => error!("task {} panicked", name),
            Err(_) => info!("task {} was cancelled", name),
        }
    }

    /// Runs until `cancel` fires, then gives the tasks `grace` to wind down.
    pub async fn run(mut self, cancel: CancellationToken, grace: Duration) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some((name, future)) = self.rx.recv() => self.start(name, future),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok(outcome) => Self::report(outcome),
                    Err(err) => error!("task monitor lost a task: {}", err),
                },
            }
        }
        self.rx.close();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Ok(outcome) = joined {
                    Self::report(outcome);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("{} task(s) did not stop in time; aborting", self.tasks.len());
            for abort in &self.aborts {
                abort.abort();
            }
            self.tasks.abort_all();
        }
    }
}
