//! The decision channel between the parsing pipeline, the watchdog, and the
//! iteration loop.
//!
//! Payloads are [`ControlSignal`] values only. Diagnostics travel on their own
//! channels and can never be mistaken for a decision.

use tokio::sync::mpsc;
use tracing::trace;
use wiggum_proto::ControlSignal;

/// Capacity of the signal channel. Writers block rather than drop when full.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Creates a bounded, ordered, multi-writer single-reader signal channel.
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    (SignalSender(tx), SignalReceiver(rx))
}

/// Write half. Clone it once per writer.
#[derive(Debug, Clone)]
pub struct SignalSender(mpsc::Sender<ControlSignal>);

impl SignalSender {
    /// Delivers a signal. Returns false if the loop has stopped listening.
    pub async fn send(&self, signal: ControlSignal) -> bool {
        trace!(%signal, "Raising control signal");
        self.0.send(signal).await.is_ok()
    }
}

/// Read half, owned by the iteration loop.
#[derive(Debug)]
pub struct SignalReceiver(mpsc::Receiver<ControlSignal>);

impl SignalReceiver {
    /// Next signal, or `None` once every sender is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<ControlSignal> {
        self.0.recv().await
    }

    /// Stops accepting new signals; queued ones can still be received.
    pub fn close(&mut self) {
        self.0.close();
    }
}
