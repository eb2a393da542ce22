//! Runner trait defining how independent work units are executed.
//!
//! Every runner accepts an ordered list of work descriptors and a per-item
//! function, calls the function exactly once per descriptor, and returns the
//! results in descriptor order. The first unit error aborts the batch; units
//! that have not started yet are skipped.

use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};

// ── Runner Errors ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// No runner is registered under this name.
    Unknown { name: String },
    /// A worker count of zero was requested.
    ZeroThreads,
    /// A worker thread panicked while executing a unit.
    WorkerPanicked { worker: usize, detail: String },
    /// The rayon pool could not be built.
    PoolBuild { detail: String },
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown { name } => write!(
                f,
                "unknown runner `{name}` (expected sequential, threads or rayon)"
            ),
            Self::ZeroThreads => write!(f, "runner needs at least one worker thread"),
            Self::WorkerPanicked { worker, detail } => {
                write!(f, "worker {worker} panicked: {detail}")
            }
            Self::PoolBuild { detail } => write!(f, "failed to build rayon pool: {detail}"),
        }
    }
}

impl std::error::Error for RunnerError {}

/// Failure of a batch: either a unit's own error, passed through untouched,
/// or a failure of the runner itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError<E> {
    Unit(E),
    Runner(RunnerError),
}

impl<E> From<RunnerError> for RunError<E> {
    fn from(value: RunnerError) -> Self {
        Self::Runner(value)
    }
}

// ── Runner Trait ───────────────────────────────────────────────────

pub trait ParallelRunner: Send + Sync {
    /// Short name used in logs and configuration ("sequential", "threads", "rayon").
    fn name(&self) -> &str;

    /// Run `unit_fn` once per item of `work`, returning results in `work` order.
    fn execute<T, R, E, F>(&self, work: Vec<T>, unit_fn: F) -> Result<Vec<R>, RunError<E>>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync;
}

/// Runs every unit on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequentialRunner;

impl ParallelRunner for SequentialRunner {
    fn name(&self) -> &str {
        "sequential"
    }

    fn execute<T, R, E, F>(&self, work: Vec<T>, unit_fn: F) -> Result<Vec<R>, RunError<E>>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync,
    {
        work.into_iter()
            .map(unit_fn)
            .collect::<Result<Vec<_>, _>>()
            .map_err(RunError::Unit)
    }
}

/// A fixed set of scoped worker threads pulling units from a shared queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPoolRunner {
    threads: NonZeroUsize,
}

impl ThreadPoolRunner {
    pub fn new(threads: usize) -> Result<Self, RunnerError> {
        let threads = NonZeroUsize::new(threads).ok_or(RunnerError::ZeroThreads)?;
        Ok(Self { threads })
    }

    /// One worker per available core.
    #[must_use]
    pub fn with_available_parallelism() -> Self {
        let threads = std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        Self { threads }
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads.get()
    }
}

impl ParallelRunner for ThreadPoolRunner {
    fn name(&self) -> &str {
        "threads"
    }

    fn execute<T, R, E, F>(&self, work: Vec<T>, unit_fn: F) -> Result<Vec<R>, RunError<E>>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync,
    {
        let total = work.len();
        let workers = self.threads.get().min(total.max(1));
        let queue = Mutex::new(work.into_iter().enumerate());
        let abort = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<(usize, Result<R, E>)>();

        let panicked = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let tx = tx.clone();
                    let queue = &queue;
                    let abort = &abort;
                    let unit_fn = &unit_fn;
                    scope.spawn(move || {
                        loop {
                            if abort.load(Ordering::Relaxed) {
                                break;
                            }
                            let next = match queue.lock() {
                                Ok(mut items) => items.next(),
                                Err(_) => None,
                            };
                            let Some((index, item)) = next else {
                                break;
                            };
                            let outcome = unit_fn(item);
                            if outcome.is_err() {
                                abort.store(true, Ordering::Relaxed);
                            }
                            if tx.send((index, outcome)).is_err() {
                                break;
                            }
                        }
                    })
                })
                .collect();
            drop(tx);

            // Join every handle so no panic escapes the scope.
            let mut panicked = None;
            for (worker, handle) in handles.into_iter().enumerate() {
                if let Err(payload) = handle.join()
                    && panicked.is_none()
                {
                    panicked = Some(RunnerError::WorkerPanicked {
                        worker,
                        detail: panic_detail(payload.as_ref()),
                    });
                }
            }
            panicked
        });

        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut first_error = None;
        for (index, outcome) in rx {
            match outcome {
                Ok(value) => slots[index] = Some(value),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = panicked {
            return Err(err.into());
        }
        if let Some(err) = first_error {
            return Err(RunError::Unit(err));
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    RunError::Runner(RunnerError::WorkerPanicked {
                        worker: usize::MAX,
                        detail: format!("unit {index} produced no result"),
                    })
                })
            })
            .collect()
    }
}

/// Work-stealing execution on a rayon pool. Without an explicit thread count
/// the global pool is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayonRunner {
    threads: Option<NonZeroUsize>,
}

impl RayonRunner {
    #[must_use]
    pub fn global() -> Self {
        Self { threads: None }
    }

    pub fn with_threads(threads: usize) -> Result<Self, RunnerError> {
        let threads = NonZeroUsize::new(threads).ok_or(RunnerError::ZeroThreads)?;
        Ok(Self {
            threads: Some(threads),
        })
    }
}

impl ParallelRunner for RayonRunner {
    fn name(&self) -> &str {
        "rayon"
    }

    fn execute<T, R, E, F>(&self, work: Vec<T>, unit_fn: F) -> Result<Vec<R>, RunError<E>>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync,
    {
        let run = || {
            work.into_par_iter()
                .map(&unit_fn)
                .collect::<Result<Vec<_>, _>>()
                .map_err(RunError::Unit)
        };

        match self.threads {
            None => run(),
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads.get())
                    .build()
                    .map_err(|err| RunnerError::PoolBuild {
                        detail: err.to_string(),
                    })?;
                pool.install(run)
            }
        }
    }
}

// ── Runner Selection ───────────────────────────────────────────────

/// A runner chosen at run time, e.g. from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runner {
    Sequential(SequentialRunner),
    Threads(ThreadPoolRunner),
    Rayon(RayonRunner),
}

impl Default for Runner {
    fn default() -> Self {
        Self::Sequential(SequentialRunner)
    }
}

impl Runner {
    /// Resolve a runner by name. `threads` sizes the pool for `threads` and
    /// `rayon`; when absent, `threads` uses one worker per core and `rayon`
    /// uses its global pool.
    pub fn from_name(name: &str, threads: Option<usize>) -> Result<Self, RunnerError> {
        let runner = match name.trim().to_ascii_lowercase().as_str() {
            "" | "sequential" | "serial" => Self::Sequential(SequentialRunner),
            "threads" | "thread_pool" => match threads {
                Some(count) => Self::Threads(ThreadPoolRunner::new(count)?),
                None => Self::Threads(ThreadPoolRunner::with_available_parallelism()),
            },
            "rayon" => match threads {
                Some(count) => Self::Rayon(RayonRunner::with_threads(count)?),
                None => Self::Rayon(RayonRunner::global()),
            },
            _ => {
                return Err(RunnerError::Unknown {
                    name: name.to_owned(),
                });
            }
        };
        tracing::debug!(runner = runner.name(), ?threads, "resolved runner");
        Ok(runner)
    }
}

impl ParallelRunner for Runner {
    fn name(&self) -> &str {
        match self {
            Self::Sequential(runner) => runner.name(),
            Self::Threads(runner) => runner.name(),
            Self::Rayon(runner) => runner.name(),
        }
    }

    fn execute<T, R, E, F>(&self, work: Vec<T>, unit_fn: F) -> Result<Vec<R>, RunError<E>>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync,
    {
        match self {
            Self::Sequential(runner) => runner.execute(work, unit_fn),
            Self::Threads(runner) => runner.execute(work, unit_fn),
            Self::Rayon(runner) => runner.execute(work, unit_fn),
        }
    }
}

fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
