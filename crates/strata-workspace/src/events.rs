use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use strata_index::IndexEvent;
use strata_project::TreeEvent;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    Tree(TreeEvent),
    Index(IndexEvent),
    SnapshotSaved { path: PathBuf },
}

#[derive(Default)]
pub(crate) struct EventHub {
    subscribers: Mutex<Vec<Sender<WorkspaceEvent>>>,
}

impl EventHub {
    /// Bounded per subscriber; a subscriber that does not keep up misses
    /// events instead of growing the queue.
    pub(crate) fn subscribe(&self) -> Receiver<WorkspaceEvent> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_QUEUE_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn publish(&self, event: WorkspaceEvent) {
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(target = "strata.workspace", "subscriber full; event dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }
}
