#![forbid(unsafe_code)]

//! Merges the named axes of every join argument into one ordered registry and
//! enumerates the Cartesian index space over it.

pub mod registry;
pub mod space;

pub use registry::{InvalidAxisReason, Registry, RegistryError, build_registry};
pub use space::{AxisProjection, Cell, IndexSpace, ProjectionMap, enumerate, projection_maps};
