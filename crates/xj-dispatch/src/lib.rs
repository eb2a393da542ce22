#![forbid(unsafe_code)]

pub mod assemble;
pub mod progress;
pub mod schedule;

pub use assemble::{JoinOutput, LabeledGrid, assemble};
pub use schedule::{CacheSettings, CellArgs, KeyFn, ScheduleOptions, ScheduleOutcome};

use serde::Serialize;
use serde::de::DeserializeOwned;
use xj_core::{JoinArg, MismatchPolicy, ValueError};
use xj_index::{RegistryError, build_registry, enumerate, projection_maps};
use xj_runtime::{ParallelRunner, Runner, RunnerError};

#[derive(Debug, Clone)]
pub struct MapJoinRequest<P = Runner> {
    pub args: Vec<JoinArg>,
    pub policy: MismatchPolicy,
    pub schedule: ScheduleOptions,
    pub cache: Option<CacheSettings>,
    pub runner: P,
}

impl MapJoinRequest<Runner> {
    /// Sequential, uncached, unshuffled join over `args` that fails on
    /// conflicting labels.
    #[must_use]
    pub fn new(args: Vec<JoinArg>) -> Self {
        Self {
            args,
            policy: MismatchPolicy::Fail,
            schedule: ScheduleOptions::default(),
            cache: None,
            runner: Runner::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub cells: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub runner: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapJoinResponse<R> {
    pub output: JoinOutput<R>,
    pub stats: RunStats,
}

#[derive(Debug)]
pub enum MapJoinError<E> {
    Registry(RegistryError),
    /// An array-like input could not produce the element a cell asked for.
    Select { input: String, source: ValueError },
    /// The user function failed; the batch was abandoned.
    Apply(E),
    Runner(RunnerError),
    /// The runner returned a different number of results than units submitted.
    RunnerContract { expected: usize, actual: usize },
    Assembly(ValueError),
}

impl<E: std::fmt::Display> std::fmt::Display for MapJoinError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(err) => write!(f, "axis registry error: {err}"),
            Self::Select { input, source } => {
                write!(f, "selection from input `{input}` failed: {source}")
            }
            Self::Apply(err) => write!(f, "join function failed: {err}"),
            Self::Runner(err) => write!(f, "runner error: {err}"),
            Self::RunnerContract { expected, actual } => write!(
                f,
                "runner returned {actual} results for {expected} work units"
            ),
            Self::Assembly(err) => write!(f, "result assembly error: {err}"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for MapJoinError<E> {}

impl<E> From<RegistryError> for MapJoinError<E> {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl<E> From<RunnerError> for MapJoinError<E> {
    fn from(value: RunnerError) -> Self {
        Self::Runner(value)
    }
}

/// Join `request.args` on their named axes and evaluate `f` once per cell of
/// the resulting index space.
pub fn map_join<R, E, F, P>(
    request: MapJoinRequest<P>,
    f: F,
) -> Result<MapJoinResponse<R>, MapJoinError<E>>
where
    R: Serialize + DeserializeOwned + Send,
    E: Send,
    F: Fn(&CellArgs<'_>) -> Result<R, E> + Sync,
    P: ParallelRunner,
{
    let registry = build_registry(&request.args, request.policy)?;
    let maps = projection_maps(&registry, &request.args)?;
    let cells = enumerate(&registry)?;
    tracing::info!(
        inputs = request.args.len(),
        axes = registry.len(),
        cells = cells.len(),
        policy = request.policy.as_str(),
        "map_join starting"
    );

    let outcome = schedule::run(
        &registry,
        &cells,
        &request.args,
        &maps,
        &f,
        &request.schedule,
        request.cache.as_ref(),
        &request.runner,
    )?;

    let stats = RunStats {
        cells: cells.len(),
        cache_hits: outcome.cache_hits,
        cache_misses: outcome.cache_misses,
        runner: request.runner.name().to_owned(),
    };
    let output = assemble(registry, outcome.outputs).map_err(MapJoinError::Assembly)?;
    tracing::debug!(?stats, "map_join finished");
    Ok(MapJoinResponse { output, stats })
}
