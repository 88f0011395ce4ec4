use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::rpc::peer::Peer;

/// List-changed trigger shared between an application and the capability
/// layer. The application keeps the signal and fires [`ChangeSignal::notify`]
/// whenever its list changes; the notifier task takes the receive end exactly
/// once per session via [`ChangeSignal::take`].
///
/// The one-shot take doubles as the started guard: a second initialize
/// handshake (or reuse of the same provider) finds the receiver gone and does
/// not spawn a duplicate notifier.
pub struct ChangeSignal {
    tx: UnboundedSender<()>,
    rx: Mutex<Option<UnboundedReceiver<()>>>,
}

impl ChangeSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Signals one change. Never blocks; a signal fired before the notifier
    /// starts is buffered.
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }

    /// Hands out the receive end. Returns `None` on every call after the
    /// first.
    pub fn take(&self) -> Option<UnboundedReceiver<()>> {
        self.rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Default for ChangeSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Long-lived task translating change signals into `notifications/*` frames.
/// Exits when the session token cancels, the signal's send end drops, or the
/// peer goes away.
pub(crate) fn spawn_notifier(
    peer: Peer,
    token: CancellationToken,
    method: &'static str,
    mut rx: UnboundedReceiver<()>,
) {
    tokio::spawn(async move {
        info!(method, "list-changed notifier started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                signal = rx.recv() => match signal {
                    Some(()) => {
                        if peer.notify(method, Value::Null).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!(method, "list-changed notifier stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_delivers_buffered_notifications() {
        let signal = ChangeSignal::new();
        signal.notify();
        signal.notify();

        let mut rx = signal.take().expect("first take yields the receiver");
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn test_take_is_one_shot() {
        let signal = ChangeSignal::new();
        assert!(signal.take().is_some());
        assert!(signal.take().is_none());
    }

    #[tokio::test]
    async fn test_receiver_sees_close_when_signal_dropped() {
        let signal = ChangeSignal::new();
        let mut rx = signal.take().unwrap();
        drop(signal);
        assert!(rx.recv().await.is_none());
    }
}
