//! Shared cancellation signal.
//!
//! A `watch` channel carrying `true` once shutdown was requested. Every
//! loop and in-flight tunnel open holds a receiver cloned from the root.

use tokio::sync::watch;

pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

pub fn is_cancelled(rx: &ShutdownReceiver) -> bool {
    *rx.borrow()
}

/// Resolve once shutdown is requested. Returns immediately when it already
/// was; never resolves if the sender goes away without cancelling.
pub async fn wait_for_cancellation(rx: &mut ShutdownReceiver) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await
}
