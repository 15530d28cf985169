use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::{CancellationToken, Cancelled};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Begin {
        id: ProgressId,
        title: String,
    },
    Report {
        id: ProgressId,
        message: Option<String>,
        percentage: Option<u32>,
    },
    End {
        id: ProgressId,
    },
}

pub type ProgressReceiver = Receiver<ProgressEvent>;

/// Fan-out point for progress events; every subscriber gets every event.
#[derive(Clone, Default)]
pub struct ProgressSender {
    subscribers: Arc<Mutex<Vec<Sender<ProgressEvent>>>>,
    next_id: Arc<AtomicU64>,
}

impl ProgressSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn start(&self, title: impl Into<String>, token: CancellationToken) -> ProgressIndicator {
        let id = ProgressId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.send(ProgressEvent::Begin {
            id,
            title: title.into(),
        });
        ProgressIndicator {
            id,
            token,
            sender: Some(self.clone()),
            state: Arc::new(ProgressState::default()),
        }
    }

    fn send(&self, event: ProgressEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Default)]
struct ProgressState {
    text: Mutex<String>,
    fraction_bits: AtomicU64,
    finished: AtomicBool,
}

/// Progress/cancellation handle passed into long-running operations.
#[derive(Clone)]
pub struct ProgressIndicator {
    id: ProgressId,
    token: CancellationToken,
    sender: Option<ProgressSender>,
    state: Arc<ProgressState>,
}

impl ProgressIndicator {
    /// An indicator that reports nowhere; only cancellation is observable.
    pub fn detached(token: CancellationToken) -> Self {
        Self {
            id: ProgressId(0),
            token,
            sender: None,
            state: Arc::new(ProgressState::default()),
        }
    }

    pub fn id(&self) -> ProgressId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        *self.state.text.lock() = text.clone();
        self.report(Some(text), None);
    }

    pub fn text(&self) -> String {
        self.state.text.lock().clone()
    }

    /// Record completion in `[0, 1]`; out-of-range values are clamped.
    pub fn set_fraction(&self, fraction: f64) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.state
            .fraction_bits
            .store(fraction.to_bits(), Ordering::Relaxed);
        self.report(None, Some((fraction * 100.0).round() as u32));
    }

    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.state.fraction_bits.load(Ordering::Relaxed))
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn check_canceled(&self) -> Result<(), Cancelled> {
        crate::check_cancelled(&self.token)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn finish(&self) {
        if self
            .state
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(sender) = &self.sender {
                sender.send(ProgressEvent::End { id: self.id });
            }
        }
    }

    fn report(&self, message: Option<String>, percentage: Option<u32>) {
        if let Some(sender) = &self.sender {
            sender.send(ProgressEvent::Report {
                id: self.id,
                message,
                percentage,
            });
        }
    }
}
