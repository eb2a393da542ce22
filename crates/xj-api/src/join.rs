use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use xj_cache::CacheStore;
use xj_core::{ArrayLike, JoinArg, MismatchPolicy, Value};
use xj_dispatch::{
    CacheSettings, CellArgs, JoinOutput, MapJoinError, MapJoinRequest, MapJoinResponse,
    ScheduleOptions,
};
use xj_runtime::Runner;

use crate::config::MapJoinConfig;
use crate::errors::ConfigError;

/// A user function bound to join settings; call it with the inputs.
#[derive(Clone)]
pub struct MapJoin<F> {
    f: F,
    policy: MismatchPolicy,
    schedule: ScheduleOptions,
    cache: Option<CacheSettings>,
    runner: Runner,
}

/// Wrap `f` for joining. Defaults: fail on conflicting labels, shuffled
/// sequential execution, no cache.
#[must_use]
pub fn map_join<F>(f: F) -> MapJoin<F> {
    MapJoin {
        f,
        policy: MismatchPolicy::Fail,
        schedule: ScheduleOptions {
            shuffle: true,
            seed: None,
            progress: false,
        },
        cache: None,
        runner: Runner::default(),
    }
}

impl<F> MapJoin<F> {
    #[must_use]
    pub fn with_policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.schedule.shuffle = shuffle;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.schedule.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.schedule.progress = progress;
        self
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Runner) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(CacheSettings::new(store));
        self
    }

    #[must_use]
    pub fn with_cache_settings(mut self, cache: CacheSettings) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace every setting with the ones `config` resolves to.
    pub fn with_config(mut self, config: &MapJoinConfig) -> Result<Self, ConfigError> {
        self.policy = config.mismatch_policy;
        self.schedule = config.schedule_options();
        self.runner = config.build_runner()?;
        self.cache = config.open_cache()?;
        Ok(self)
    }

    pub fn call<R, E>(&self, args: Vec<JoinArg>) -> Result<JoinOutput<R>, MapJoinError<E>>
    where
        R: Serialize + DeserializeOwned + Send,
        E: Send,
        F: Fn(&CellArgs<'_>) -> Result<R, E> + Sync,
    {
        self.call_with_stats(args).map(|response| response.output)
    }

    pub fn call_with_stats<R, E>(
        &self,
        args: Vec<JoinArg>,
    ) -> Result<MapJoinResponse<R>, MapJoinError<E>>
    where
        R: Serialize + DeserializeOwned + Send,
        E: Send,
        F: Fn(&CellArgs<'_>) -> Result<R, E> + Sync,
    {
        let request = MapJoinRequest {
            args,
            policy: self.policy,
            schedule: self.schedule,
            cache: self.cache.clone(),
            runner: self.runner,
        };
        xj_dispatch::map_join(request, &self.f)
    }
}

impl<F> std::fmt::Debug for MapJoin<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapJoin")
            .field("policy", &self.policy)
            .field("schedule", &self.schedule)
            .field("cache", &self.cache)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

/// A joined input exposed to the function under `name`.
pub fn arg(name: impl Into<String>, array: impl ArrayLike + 'static) -> JoinArg {
    JoinArg::joined(array).named(name)
}

/// A constant passed unchanged to every cell under `name`.
pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> JoinArg {
    JoinArg::no_join(value).named(name)
}
