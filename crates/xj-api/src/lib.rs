#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod join;

pub use config::MapJoinConfig;
pub use errors::ConfigError;
pub use join::{MapJoin, arg, constant, map_join};
pub use xj_dispatch::{CellArgs, JoinOutput, LabeledGrid, MapJoinError, RunStats};
