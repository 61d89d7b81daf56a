//! Cancellation for the monitor loop.
//!
//! Built on a `watch` channel carrying a `bool`. A [`StopSignal::never`]
//! signal has no sender and keeps the monitor running forever.

use tokio::sync::watch;

/// Sending half; call [`StopHandle::stop`] to end a running monitor.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        // send_replace never fails, even once every receiver is gone
        self.tx.send_replace(true);
    }
}

/// Receiving half passed into the monitor.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::never()
    }
}

impl StopSignal {
    /// A handle/signal pair.
    pub fn channel() -> (StopHandle, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (StopHandle { tx }, StopSignal { rx: Some(rx) })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_stopped(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once stop has been requested.
    ///
    /// If every handle is dropped without stopping, this pends forever.
    pub async fn stopped(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}
