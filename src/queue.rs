//! Bounded change-event queue between the watcher and the pipeline.
//!
//! Created once by the composition root; the sender half goes to producers
//! (watcher thread, startup scan) and the receiver half to the pipeline
//! consumer. Dropping every sender closes the queue and lets the consumer
//! drain and exit.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::ChangeEvent;

#[derive(Debug, Error)]
#[error("event queue closed")]
pub struct QueueClosed;

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ChangeEvent>,
}

pub struct EventReceiver {
    rx: mpsc::Receiver<ChangeEvent>,
}

pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

impl EventSender {
    /// Enqueue from async code, waiting for capacity.
    pub async fn send(&self, event: ChangeEvent) -> Result<(), QueueClosed> {
        self.tx.send(event).await.map_err(|_| QueueClosed)
    }

    /// Enqueue from a plain thread (the watcher), blocking for capacity.
    pub fn blocking_send(&self, event: ChangeEvent) -> Result<(), QueueClosed> {
        self.tx.blocking_send(event).map_err(|_| QueueClosed)
    }
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}
