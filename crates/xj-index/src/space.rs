//! Index space enumeration and per-argument projection maps.

use crate::registry::{Registry, RegistryError};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use xj_core::{ArgKind, Axis, JoinArg, element_count};

/// One coordinate tuple of the index space: a position per registry axis.
pub type Cell = SmallVec<[usize; 4]>;

/// Cartesian product of the registry axes, ordered row-major (the last
/// registry axis varies fastest).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpace {
    shape: Vec<usize>,
    len: usize,
}

impl IndexSpace {
    pub fn new(registry: &Registry) -> Result<Self, RegistryError> {
        let shape = registry.shape();
        let len = element_count(&shape).ok_or_else(|| RegistryError::CellCountOverflow {
            shape: shape.clone(),
        })?;
        Ok(Self { shape, len })
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of cells. An empty registry has exactly one (empty) cell.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The cell at linear position `index`.
    #[must_use]
    pub fn cell(&self, index: usize) -> Option<Cell> {
        if index >= self.len {
            return None;
        }
        let mut cell: Cell = SmallVec::from_elem(0, self.shape.len());
        let mut rest = index;
        for (slot, &dim) in cell.iter_mut().zip(&self.shape).rev() {
            *slot = rest % dim;
            rest /= dim;
        }
        Some(cell)
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.len).filter_map(move |index| self.cell(index))
    }
}

/// Every cell of the registry's index space, in linear order.
pub fn enumerate(registry: &Registry) -> Result<Vec<Cell>, RegistryError> {
    let space = IndexSpace::new(registry)?;
    tracing::debug!(
        cells = space.len(),
        shape = ?space.shape(),
        "enumerated index space"
    );
    Ok(space.cells().collect())
}

/// Where one argument axis sits in the registry, and how registry positions
/// translate to the argument's own positions along it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisProjection {
    pub registry_axis: usize,
    pub positions: Vec<usize>,
}

/// Restriction of a full cell to the axes one argument actually has, in that
/// argument's axis order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionMap {
    pub axes: Vec<AxisProjection>,
}

impl ProjectionMap {
    pub fn for_arg(
        registry: &Registry,
        arg: &JoinArg,
        position: usize,
    ) -> Result<Self, RegistryError> {
        let ArgKind::Joined(array) = &arg.kind else {
            return Ok(Self::default());
        };

        let input = arg.display_name(position);
        let axes = array
            .axes()
            .iter()
            .map(|axis| project_axis(registry, axis, &input))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { axes })
    }

    /// True for no-join arguments: every cell selects the same value.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.axes.is_empty()
    }

    /// The argument-local coordinates for `cell`.
    #[must_use]
    pub fn project(&self, cell: &[usize]) -> Cell {
        self.axes
            .iter()
            .map(|axis| axis.positions[cell[axis.registry_axis]])
            .collect()
    }
}

/// Projection maps for every argument, computed once per invocation.
pub fn projection_maps(
    registry: &Registry,
    args: &[JoinArg],
) -> Result<Vec<ProjectionMap>, RegistryError> {
    args.iter()
        .enumerate()
        .map(|(position, arg)| ProjectionMap::for_arg(registry, arg, position))
        .collect()
}

fn project_axis(registry: &Registry, axis: &Axis, input: &str) -> Result<AxisProjection, RegistryError> {
    let conflict = |merged: &Axis| RegistryError::AxisConflict {
        axis: axis.name.clone(),
        first_input: "<registry>".to_owned(),
        second_input: input.to_owned(),
        first_labels: merged.labels.clone(),
        second_labels: axis.labels.clone(),
        policy: xj_core::MismatchPolicy::Intersect,
    };

    let registry_axis = registry.position(&axis.name).ok_or_else(|| RegistryError::AxisConflict {
        axis: axis.name.clone(),
        first_input: "<registry>".to_owned(),
        second_input: input.to_owned(),
        first_labels: Vec::new(),
        second_labels: axis.labels.clone(),
        policy: xj_core::MismatchPolicy::Fail,
    })?;
    let merged = &registry.axes()[registry_axis];
    if merged.is_empty() {
        return Ok(AxisProjection {
            registry_axis,
            positions: Vec::new(),
        });
    }

    if merged.labels == axis.labels || axis.is_trivial() || merged.is_trivial() {
        if merged.len() != axis.len() {
            return Err(conflict(merged));
        }
        return Ok(AxisProjection {
            registry_axis,
            positions: (0..merged.len()).collect(),
        });
    }

    let mut lookup: FxHashMap<&str, usize> = FxHashMap::default();
    for (index, label) in axis.labels.iter().enumerate() {
        if !label.is_empty() {
            lookup.entry(label.as_str()).or_insert(index);
        }
    }
    let positions = merged
        .labels
        .iter()
        .map(|label| lookup.get(label.as_str()).copied())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| conflict(merged))?;

    Ok(AxisProjection {
        registry_axis,
        positions,
    })
}
