//! Work scheduler: evaluates the user function once per cell.
//!
//! Cells may be submitted in a shuffled order so expensive regions of the
//! index space spread across workers. The permutation only affects
//! submission; results are put back into cell order before they are returned.

use crate::MapJoinError;
use crate::progress::Progress;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use xj_cache::{
    CacheKey, CacheStore, coordinate_labels, decode_entry, default_cell_key, encode_entry,
};
use xj_core::{ArgKind, ArrayLike, Axis, JoinArg, Value, ValueError};
use xj_index::{Cell, ProjectionMap, Registry};
use xj_runtime::{ParallelRunner, RunError};

/// Derives a raw cache key from a cell's coordinate labels.
pub type KeyFn = dyn Fn(&[String]) -> String + Send + Sync;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Submit cells in a uniformly random order.
    pub shuffle: bool,
    /// Seed for the shuffle; `None` draws from the thread RNG.
    pub seed: Option<u64>,
    /// Log "N/total" at logarithmically spaced completion counts.
    pub progress: bool,
}

/// Where per-cell results are persisted and how they are keyed.
#[derive(Clone)]
pub struct CacheSettings {
    pub store: Arc<dyn CacheStore>,
    pub key_fn: Arc<KeyFn>,
}

impl CacheSettings {
    /// Key cells with [`default_cell_key`].
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            key_fn: Arc::new(|coordinates: &[String]| default_cell_key(coordinates)),
        }
    }

    #[must_use]
    pub fn with_key_fn(
        mut self,
        key_fn: impl Fn(&[String]) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_fn = Arc::new(key_fn);
        self
    }

    #[must_use]
    pub fn key_for(&self, axes: &[Axis], cell: &[usize]) -> CacheKey {
        let coordinates = coordinate_labels(axes, cell);
        CacheKey::from_raw(&(self.key_fn)(&coordinates))
    }
}

impl std::fmt::Debug for CacheSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSettings").finish_non_exhaustive()
    }
}

/// The arguments of one cell, each projected to the value it contributes.
#[derive(Debug, Clone)]
pub struct CellArgs<'a> {
    names: &'a [String],
    values: Vec<Value>,
    axes: &'a [Axis],
    cell: &'a [usize],
}

impl<'a> CellArgs<'a> {
    #[must_use]
    pub fn new(names: &'a [String], values: Vec<Value>, axes: &'a [Axis], cell: &'a [usize]) -> Self {
        Self {
            names,
            values,
            axes,
            cell,
        }
    }

    /// Argument by declared name (or `arg{i}` for unnamed arguments).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        let position = self.names.iter().position(|candidate| candidate == name)?;
        self.values.get(position)
    }

    /// Argument by position.
    #[must_use]
    pub fn at(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(&self.values)
    }

    /// This cell's position along every registry axis.
    #[must_use]
    pub fn cell(&self) -> &[usize] {
        self.cell
    }

    /// This cell's label along the registry axis `axis`.
    #[must_use]
    pub fn label(&self, axis: &str) -> Option<&str> {
        let slot = self.axes.iter().position(|candidate| candidate.name == axis)?;
        self.axes[slot]
            .labels
            .get(self.cell[slot])
            .map(String::as_str)
    }
}

/// Everything a scheduled run produced, in cell order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOutcome<R> {
    pub outputs: Vec<R>,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WorkUnit {
    cell: Cell,
}

enum CellError<E> {
    Select { input: String, source: ValueError },
    Apply(E),
}

/// Evaluate `f` once per cell of `cells` and return the outputs in `cells`
/// order, whatever order the runner executed them in.
#[allow(clippy::too_many_arguments)]
pub fn run<R, E, F, P>(
    registry: &Registry,
    cells: &[Cell],
    args: &[JoinArg],
    maps: &[ProjectionMap],
    f: &F,
    options: &ScheduleOptions,
    cache: Option<&CacheSettings>,
    runner: &P,
) -> Result<ScheduleOutcome<R>, MapJoinError<E>>
where
    R: Serialize + DeserializeOwned + Send,
    E: Send,
    F: Fn(&CellArgs<'_>) -> Result<R, E> + Sync,
    P: ParallelRunner,
{
    let total = cells.len();
    let order = submission_order(total, options);
    let names: Vec<String> = args
        .iter()
        .enumerate()
        .map(|(position, arg)| arg.display_name(position))
        .collect();
    let axes = registry.axes();
    let progress = Progress::new(total, options.progress);
    let hits = AtomicUsize::new(0);

    tracing::info!(
        cells = total,
        runner = runner.name(),
        shuffle = options.shuffle,
        caching = cache.is_some(),
        "scheduling join cells"
    );

    let units: Vec<WorkUnit> = order
        .iter()
        .map(|&index| WorkUnit {
            cell: cells[index].clone(),
        })
        .collect();

    let evaluate = |unit: WorkUnit| -> Result<R, CellError<E>> {
        let key = cache.map(|settings| settings.key_for(axes, &unit.cell));
        if let (Some(settings), Some(key)) = (cache, key.as_ref())
            && let Some(value) = load_cached::<R>(settings.store.as_ref(), key)
        {
            hits.fetch_add(1, Ordering::Relaxed);
            progress.tick();
            return Ok(value);
        }

        let values = args
            .iter()
            .zip(maps)
            .zip(&names)
            .map(|((arg, map), name)| {
                project_arg(arg, map, &unit.cell).map_err(|source| CellError::Select {
                    input: name.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let cell_args = CellArgs::new(&names, values, axes, &unit.cell);
        let value = f(&cell_args).map_err(CellError::Apply)?;

        if let (Some(settings), Some(key)) = (cache, key.as_ref()) {
            store_cached(settings.store.as_ref(), key, &value);
        }
        progress.tick();
        Ok(value)
    };

    let executed = runner.execute(units, evaluate).map_err(|err| match err {
        RunError::Unit(CellError::Apply(err)) => MapJoinError::Apply(err),
        RunError::Unit(CellError::Select { input, source }) => {
            MapJoinError::Select { input, source }
        }
        RunError::Runner(err) => MapJoinError::Runner(err),
    })?;

    if executed.len() != total {
        return Err(MapJoinError::RunnerContract {
            expected: total,
            actual: executed.len(),
        });
    }

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
    for (value, &index) in executed.into_iter().zip(&order) {
        slots[index] = Some(value);
    }
    let outputs: Vec<R> = slots.into_iter().flatten().collect();

    let cache_hits = hits.into_inner();
    let cache_misses = if cache.is_some() {
        total - cache_hits
    } else {
        0
    };
    tracing::debug!(cells = total, cache_hits, cache_misses, "join cells finished");

    Ok(ScheduleOutcome {
        outputs,
        cache_hits,
        cache_misses,
    })
}

/// Cell indices in submission order: identity, or a uniform permutation.
#[must_use]
pub fn submission_order(total: usize, options: &ScheduleOptions) -> Vec<usize> {
    let mut order: Vec<usize> = (0..total).collect();
    if options.shuffle {
        match options.seed {
            Some(seed) => order.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed)),
            None => order.shuffle(&mut rand::thread_rng()),
        }
    }
    order
}

fn project_arg(arg: &JoinArg, map: &ProjectionMap, cell: &[usize]) -> Result<Value, ValueError> {
    match &arg.kind {
        ArgKind::NoJoin(value) => Ok(value.clone()),
        ArgKind::Joined(array) => array.select(&map.project(cell)),
    }
}

fn load_cached<R: DeserializeOwned>(store: &dyn CacheStore, key: &CacheKey) -> Option<R> {
    match store.load(key) {
        Ok(Some(bytes)) => match decode_entry(key, &bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "discarding unreadable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "cache lookup failed; recomputing");
            None
        }
    }
}

fn store_cached<R: Serialize>(store: &dyn CacheStore, key: &CacheKey, value: &R) {
    let written = encode_entry(key, value).and_then(|bytes| store.store(key, &bytes));
    if let Err(err) = written {
        tracing::warn!(key = %key, error = %err, "cache write failed");
    }
}
