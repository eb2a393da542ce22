#![forbid(unsafe_code)]

pub mod runner;

pub use runner::{
    ParallelRunner, RayonRunner, RunError, Runner, RunnerError, SequentialRunner,
    ThreadPoolRunner,
};
