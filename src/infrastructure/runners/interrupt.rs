//! One-shot interrupt handling for the pod lifecycle.
//!
//! The first interrupt tears down owned pods and raises the shared
//! interrupted flag; a second one exits the process right away.

use futures::stream::BoxStream;
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{AppError, Result};

/// Yields one item per received interrupt.
pub type SignalSource = BoxStream<'static, ()>;

pub struct InterruptHandler {
    interrupted: CancellationToken,
    installed: AtomicBool,
    source: Mutex<Option<SignalSource>>,
}

impl Default for InterruptHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptHandler {
    /// Listens for SIGINT and SIGTERM once installed.
    pub fn new() -> Self {
        Self {
            interrupted: CancellationToken::new(),
            installed: AtomicBool::new(false),
            source: Mutex::new(None),
        }
    }

    /// Listens on `source` instead of OS signals.
    pub fn with_source(source: SignalSource) -> Self {
        Self {
            source: Mutex::new(Some(source)),
            ..Self::new()
        }
    }

    /// Cancelled once the first interrupt has been received.
    pub fn token(&self) -> CancellationToken {
        self.interrupted.clone()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_cancelled()
    }

    /// Spawns the listener. Later calls are no-ops and return `Ok(false)`.
    ///
    /// `cleanup` runs on the first interrupt. A second interrupt, during or
    /// after cleanup, terminates the process with exit code 1.
    pub fn install<F, Fut>(&self, cleanup: F) -> Result<bool>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.installed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let injected = self
            .source
            .lock()
            .map_err(|_| AppError::ConfigError("interrupt source lock poisoned".to_string()))?
            .take();
        let mut signals = match injected {
            Some(source) => source,
            None => os_signals()?,
        };
        let interrupted = self.interrupted.clone();

        tokio::spawn(async move {
            if signals.next().await.is_none() {
                return;
            }
            warn!("Interrupted, destroying pods");
            interrupted.cancel();

            tokio::select! {
                _ = cleanup() => {}
                Some(()) = signals.next() => force_exit(),
            }
            if signals.next().await.is_some() {
                force_exit();
            }
        });

        Ok(true)
    }
}

fn force_exit() -> ! {
    error!("Interrupted again, exiting without cleanup");
    std::process::exit(1)
}

#[cfg(unix)]
fn os_signals() -> Result<SignalSource> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(merge_signals(
        futures::stream::poll_fn(move |cx| interrupt.poll_recv(cx)).boxed(),
        futures::stream::poll_fn(move |cx| terminate.poll_recv(cx)).boxed(),
    ))
}

#[cfg(any(unix, test))]
/// Interleaves two sources; signals that arrive together stay separate items.
fn merge_signals(first: SignalSource, second: SignalSource) -> SignalSource {
    futures::stream::select(first, second).boxed()
}

#[cfg(not(unix))]
fn os_signals() -> Result<SignalSource> {
    Ok(futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    })
    .boxed())
}
