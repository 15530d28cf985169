use std::path::PathBuf;
use std::sync::OnceLock;

use rayon::prelude::*;
use rayon::ThreadPool;

use strata_core::{panic_payload_to_str, MavenId};

use crate::{CancellationToken, Cancelled};

/// Result of fetching one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Resolved(PathBuf),
    Unresolved(String),
}

impl DownloadOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, DownloadOutcome::Resolved(_))
    }
}

enum Pool {
    Rayon(ThreadPool),
    Inline,
}

/// Shared pool for independent artifact downloads.
///
/// Jobs run in parallel; callers block until the whole batch is done.
pub struct DownloadPool {
    pool: Pool,
}

impl DownloadPool {
    pub fn new(threads: usize) -> Self {
        Self {
            pool: build_rayon_pool("strata-download", threads),
        }
    }

    /// The process-wide pool.
    pub fn shared() -> &'static DownloadPool {
        static SHARED: OnceLock<DownloadPool> = OnceLock::new();
        SHARED.get_or_init(|| {
            let available = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            DownloadPool::new(available.clamp(2, 8))
        })
    }

    /// Run `job` for every artifact and collect one outcome per artifact, in
    /// input order.
    ///
    /// A job that fails or panics yields [`DownloadOutcome::Unresolved`]; the
    /// rest of the batch is unaffected. Jobs not yet started when `token` is
    /// cancelled are skipped and the whole call returns `Err(Cancelled)`.
    pub fn download_all<F>(
        &self,
        artifacts: &[MavenId],
        token: &CancellationToken,
        job: F,
    ) -> Result<Vec<(MavenId, DownloadOutcome)>, Cancelled>
    where
        F: Fn(&MavenId, &CancellationToken) -> Result<PathBuf, String> + Send + Sync,
    {
        crate::check_cancelled(token)?;

        let run = |id: &MavenId| -> (MavenId, DownloadOutcome) {
            if token.is_cancelled() {
                return (id.clone(), DownloadOutcome::Unresolved("cancelled".into()));
            }
            let outcome =
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(id, token))) {
                    Ok(Ok(path)) => DownloadOutcome::Resolved(path),
                    Ok(Err(message)) => {
                        tracing::debug!(
                            target = "strata.scheduler",
                            artifact = %id,
                            error = %message,
                            "artifact download failed"
                        );
                        DownloadOutcome::Unresolved(message)
                    }
                    Err(panic) => {
                        let message = panic_payload_to_str(&*panic).to_string();
                        tracing::error!(
                            target = "strata.scheduler",
                            artifact = %id,
                            panic = %message,
                            "artifact download panicked"
                        );
                        DownloadOutcome::Unresolved(message)
                    }
                };
            (id.clone(), outcome)
        };

        let outcomes: Vec<_> = match &self.pool {
            Pool::Rayon(pool) => pool.install(|| artifacts.par_iter().map(run).collect()),
            Pool::Inline => artifacts.iter().map(run).collect(),
        };

        crate::check_cancelled(token)?;
        Ok(outcomes)
    }
}

fn build_rayon_pool(prefix: &'static str, threads: usize) -> Pool {
    // Thread creation can fail under low process limits; degrade instead of
    // crashing.
    let mut threads = threads.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
        {
            Ok(pool) => return Pool::Rayon(pool),
            Err(_) if threads > 1 => {
                threads = (threads / 2).max(1);
            }
            Err(_) => return Pool::Inline,
        }
    }
}
