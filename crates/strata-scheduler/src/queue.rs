use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

use strata_core::panic_payload_to_str;

use crate::{CancellationToken, ProgressIndicator, ProgressSender, TaskError};

/// Kind of background work. Tasks of one category run strictly one at a
/// time in FIFO order; different categories run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskCategory {
    Reading,
    Resolving,
    FoldersResolving,
    PluginsResolving,
    ArtifactsDownloading,
    PostProcessing,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 6] = [
        TaskCategory::Reading,
        TaskCategory::Resolving,
        TaskCategory::FoldersResolving,
        TaskCategory::PluginsResolving,
        TaskCategory::ArtifactsDownloading,
        TaskCategory::PostProcessing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::Reading => "reading",
            TaskCategory::Resolving => "resolving",
            TaskCategory::FoldersResolving => "folders-resolving",
            TaskCategory::PluginsResolving => "plugins-resolving",
            TaskCategory::ArtifactsDownloading => "artifacts-downloading",
            TaskCategory::PostProcessing => "post-processing",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Job = Box<dyn FnOnce(&ProgressIndicator) -> Result<(), TaskError> + Send + 'static>;

struct Scheduled {
    title: String,
    token: CancellationToken,
    job: Job,
}

/// Outcome counters for a queue, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
}

struct QueueShared {
    category: TaskCategory,
    pending: Mutex<usize>,
    drained: Condvar,
    root_token: Mutex<CancellationToken>,
    progress: ProgressSender,
    counters: Counters,
    worker_thread: OnceLock<ThreadId>,
}

impl QueueShared {
    fn finish_one(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }
}

/// A FIFO of tasks executed one at a time on a dedicated worker thread.
pub struct SerialQueue {
    shared: Arc<QueueShared>,
    tx: Mutex<Option<Sender<Scheduled>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialQueue {
    pub fn new(category: TaskCategory, progress: ProgressSender) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Scheduled>();
        let shared = Arc::new(QueueShared {
            category,
            pending: Mutex::new(0),
            drained: Condvar::new(),
            root_token: Mutex::new(CancellationToken::new()),
            progress,
            counters: Counters::default(),
            worker_thread: OnceLock::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let spawn_result = std::thread::Builder::new()
            .name(format!("strata-{}", category.as_str()))
            .spawn(move || {
                let _ = worker_shared
                    .worker_thread
                    .set(std::thread::current().id());
                for scheduled in rx.iter() {
                    run_one(&worker_shared, scheduled);
                    worker_shared.finish_one();
                }
            });

        let (tx, worker) = match spawn_result {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(err) => {
                tracing::error!(
                    target = "strata.scheduler",
                    queue = %category,
                    error = %err,
                    "failed to spawn queue worker; tasks will run inline"
                );
                (None, None)
            }
        };

        Self {
            shared,
            tx: Mutex::new(tx),
            worker: Mutex::new(worker),
        }
    }

    pub fn category(&self) -> TaskCategory {
        self.shared.category
    }

    /// Enqueue `task`. It runs after every previously scheduled task of this
    /// queue has finished.
    pub fn schedule<F>(&self, title: impl Into<String>, task: F)
    where
        F: FnOnce(&ProgressIndicator) -> Result<(), TaskError> + Send + 'static,
    {
        let token = self.shared.root_token.lock().child_token();
        let scheduled = Scheduled {
            title: title.into(),
            token,
            job: Box::new(task),
        };

        *self.shared.pending.lock() += 1;
        let tx = self.tx.lock();
        let scheduled = match tx.as_ref() {
            Some(tx) => match tx.send(scheduled) {
                Ok(()) => return,
                Err(err) => err.into_inner(),
            },
            None => scheduled,
        };
        drop(tx);

        // No worker (spawn failure or shut down): run on the caller thread.
        run_one(&self.shared, scheduled);
        self.shared.finish_one();
    }

    /// Block until every task scheduled so far has finished.
    ///
    /// Returns immediately when called from the queue's own worker thread.
    pub fn wait_for_completion(&self) {
        if self.is_worker_thread() {
            tracing::debug!(
                target = "strata.scheduler",
                queue = %self.shared.category,
                "wait_for_completion called from the worker thread; not waiting"
            );
            return;
        }
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.drained.wait(&mut pending);
        }
    }

    fn is_worker_thread(&self) -> bool {
        self.shared.worker_thread.get() == Some(&std::thread::current().id())
    }

    pub fn is_idle(&self) -> bool {
        *self.shared.pending.lock() == 0
    }

    /// Cancel every task scheduled so far. Tasks scheduled afterwards run
    /// normally.
    pub fn cancel_pending(&self) {
        let mut root = self.shared.root_token.lock();
        root.cancel();
        *root = CancellationToken::new();
    }

    pub fn stats(&self) -> QueueStats {
        let counters = &self.shared.counters;
        QueueStats {
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            panicked: counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, let the worker drain what is queued and join it.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::error!(
                    target = "strata.scheduler",
                    queue = %self.shared.category,
                    "queue worker terminated abnormally"
                );
            }
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_one(shared: &QueueShared, scheduled: Scheduled) {
    let Scheduled { title, token, job } = scheduled;
    let category = shared.category;

    if token.is_cancelled() {
        tracing::debug!(
            target = "strata.scheduler",
            queue = %category,
            task = %title,
            "skipping cancelled task"
        );
        shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let progress = shared.progress.start(title.clone(), token);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(&progress)));
    progress.finish();

    match result {
        Ok(Ok(())) => {
            shared.counters.completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(TaskError::Cancelled)) => {
            tracing::debug!(
                target = "strata.scheduler",
                queue = %category,
                task = %title,
                "task cancelled"
            );
            shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(err)) => {
            tracing::error!(
                target = "strata.scheduler",
                queue = %category,
                task = %title,
                error = %err,
                "task failed"
            );
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        Err(panic) => {
            let message = panic_payload_to_str(&*panic);
            tracing::error!(
                target = "strata.scheduler",
                queue = %category,
                task = %title,
                panic = %message,
                "task panicked"
            );
            shared.counters.panicked.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// One [`SerialQueue`] per [`TaskCategory`], sharing a progress channel.
pub struct ProcessorQueues {
    progress: ProgressSender,
    queues: Vec<SerialQueue>,
}

impl ProcessorQueues {
    pub fn new() -> Self {
        let progress = ProgressSender::new();
        let queues = TaskCategory::ALL
            .iter()
            .map(|category| SerialQueue::new(*category, progress.clone()))
            .collect();
        Self { progress, queues }
    }

    pub fn queue(&self, category: TaskCategory) -> &SerialQueue {
        &self.queues[category.index()]
    }

    pub fn schedule<F>(&self, category: TaskCategory, title: impl Into<String>, task: F)
    where
        F: FnOnce(&ProgressIndicator) -> Result<(), TaskError> + Send + 'static,
    {
        self.queue(category).schedule(title, task);
    }

    pub fn progress(&self) -> &ProgressSender {
        &self.progress
    }

    /// Wait until every queue is drained.
    ///
    /// Tasks may schedule follow-up work on other queues, so this loops until
    /// a full pass finds every queue idle.
    pub fn wait_for_all(&self) {
        if self.queues.iter().any(SerialQueue::is_worker_thread) {
            tracing::debug!(
                target = "strata.scheduler",
                "wait_for_all called from a queue worker; not waiting"
            );
            return;
        }
        loop {
            for queue in &self.queues {
                queue.wait_for_completion();
            }
            if self.queues.iter().all(SerialQueue::is_idle) {
                return;
            }
        }
    }

    pub fn cancel_all(&self) {
        for queue in &self.queues {
            queue.cancel_pending();
        }
    }

    pub fn shutdown(&self) {
        for queue in &self.queues {
            queue.shutdown();
        }
    }
}

impl Default for ProcessorQueues {
    fn default() -> Self {
        Self::new()
    }
}
