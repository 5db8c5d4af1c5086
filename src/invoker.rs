use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{log, Level};
use thiserror::Error;
use tokio::sync::watch;

use crate::limiter::Limiter;
use crate::transport::TransportError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("attempt limit reached after {attempts} attempts: {last}")]
    AttemptLimitReached { attempts: u32, last: TransportError },
    #[error("cancelled")]
    Cancelled,
}

impl InvokeError {
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            InvokeError::Transport(err) => Some(err),
            InvokeError::AttemptLimitReached { last, .. } => Some(last),
            InvokeError::Cancelled => None,
        }
    }
}

/// Completion signal of one call in a dependency chain.
///
/// Fires when the call finishes, fails, or is dropped, so a broken link never
/// stalls the calls queued behind it.
pub struct ChainLink {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ChainWaiter {
    rx: watch::Receiver<bool>,
}

impl ChainLink {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        ChainLink { tx }
    }

    pub fn waiter(&self) -> ChainWaiter {
        ChainWaiter {
            rx: self.tx.subscribe(),
        }
    }

    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for ChainLink {
    fn default() -> Self {
        ChainLink::new()
    }
}

impl Drop for ChainLink {
    fn drop(&mut self) {
        self.fire();
    }
}

impl ChainWaiter {
    pub async fn wait(mut self) {
        // An error means the link is gone, which counts as fired.
        let _ = self.rx.wait_for(|fired| *fired).await;
    }

    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }
}

pub struct InvokeOptions {
    /// Failures are expected; log them at info instead of error.
    pub ignore_errors: bool,
    pub max_attempts: u32,
    pub limiters: Vec<Arc<Limiter>>,
    /// The call starts only after this signal fires.
    pub after: Option<ChainWaiter>,
    /// Fired once this call completes in any way.
    pub link: Option<ChainLink>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        InvokeOptions {
            ignore_errors: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            limiters: Vec::new(),
            after: None,
            link: None,
        }
    }
}

/// Delay before the next attempt, or `None` when the error is permanent.
pub fn retry_delay(error: &TransportError, attempt: u32) -> Option<Duration> {
    match error {
        TransportError::RetryAfter(after) => Some(*after),
        TransportError::Server(_) => Some(Duration::from_secs(u64::from(attempt).pow(4))),
        _ => None,
    }
}

/// Runs `call` with limiter pacing, ordering after `options.after`, and bounded
/// retries on transient errors.
pub async fn invoke<T, F, Fut>(mut options: InvokeOptions, mut call: F) -> Result<T, InvokeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let _link = options.link.take();
    if let Some(after) = options.after.take() {
        after.wait().await;
    }
    let level = if options.ignore_errors {
        Level::Info
    } else {
        Level::Error
    };
    let mut attempt = 0u32;
    loop {
        for limiter in &options.limiters {
            limiter.acquire().await;
        }
        attempt += 1;
        let error = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let Some(timeout) = retry_delay(&error, attempt) else {
            return Err(error.into());
        };
        if attempt >= options.max_attempts {
            log!(level, "telegram request failed: {}; attempts exhausted", error);
            return Err(InvokeError::AttemptLimitReached {
                attempts: attempt,
                last: error,
            });
        }
        log!(
            level,
            "telegram request failed: {}; next attempt in {:?}",
            error,
            timeout
        );
        tokio::time::sleep(timeout).await;
    }
}
