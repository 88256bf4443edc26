//! Ctrl-C as a shared stop flag
//!
//! One listener is installed for the whole evaluation. Every stage (the
//! rollout loop and the driver between runs) polls the same flag, so a
//! signal delivered while a model is downloading or loading is not lost.

use std::future::Future;
use std::io;

use tokio::sync::watch;

/// Read side of the stop flag
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

/// Raising side of an [`Interrupt`]
#[derive(Debug)]
pub struct InterruptHandle {
    tx: watch::Sender<bool>,
}

impl InterruptHandle {
    /// Raise the flag; every clone of the paired [`Interrupt`] sees it
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }
}

impl Interrupt {
    /// A lowered flag and the handle that raises it
    #[must_use]
    pub fn new() -> (InterruptHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (InterruptHandle { tx }, Self { rx })
    }

    /// A flag that is never raised
    #[must_use]
    pub fn never() -> Self {
        Self::new().1
    }

    /// A flag raised by the first Ctrl-C
    ///
    /// The signal handler is registered before this returns. Must be called
    /// from within a tokio runtime.
    pub fn on_ctrl_c() -> io::Result<Self> {
        let (handle, interrupt) = Self::new();
        let signal = listen()?;
        tokio::spawn(async move {
            signal.await;
            tracing::warn!("interrupt received, stopping after the current step");
            handle.raise();
        });
        Ok(interrupt)
    }

    /// Whether the flag was raised
    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(unix)]
fn listen() -> io::Result<impl Future<Output = ()> + Send + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        sigint.recv().await;
    })
}

#[cfg(not(unix))]
fn listen() -> io::Result<impl Future<Output = ()> + Send + 'static> {
    Ok(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
}
