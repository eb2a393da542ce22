//! Result assembly: per-cell outputs back into a labelled grid.

use serde::{Deserialize, Serialize};
use xj_core::{Axis, NamedArray, Value, ValueError, element_count, row_major_offset};
use xj_index::Registry;

/// Outputs laid out row-major over the registry axes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledGrid<R> {
    axes: Vec<Axis>,
    values: Vec<R>,
}

impl<R> LabeledGrid<R> {
    pub fn new(axes: Vec<Axis>, values: Vec<R>) -> Result<Self, ValueError> {
        let shape: Vec<usize> = axes.iter().map(Axis::len).collect();
        let expected_count = element_count(&shape).ok_or(ValueError::ShapeOverflow {
            shape: shape.clone(),
        })?;
        if expected_count != values.len() {
            return Err(ValueError::ElementCountMismatch {
                shape,
                expected_count,
                actual_count: values.len(),
            });
        }
        Ok(Self { axes, values })
    }

    #[must_use]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::len).collect()
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
    pub fn values(&self) -> &[R] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<R> {
        self.values
    }

    #[must_use]
    pub fn get_at(&self, coords: &[usize]) -> Option<&R> {
        let offset = row_major_offset(&self.shape(), coords).ok()?;
        self.values.get(offset)
    }

    /// Value addressed by one label per axis, in axis order.
    #[must_use]
    pub fn get(&self, labels: &[&str]) -> Option<&R> {
        if labels.len() != self.axes.len() {
            return None;
        }
        let coords = self
            .axes
            .iter()
            .zip(labels)
            .map(|(axis, label)| axis.position(label))
            .collect::<Option<Vec<_>>>()?;
        self.get_at(&coords)
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnMut(R) -> U) -> LabeledGrid<U> {
        LabeledGrid {
            axes: self.axes,
            values: self.values.into_iter().map(f).collect(),
        }
    }
}

impl LabeledGrid<Value> {
    /// Reuse this result as an array-like input of another join.
    pub fn into_named_array(self) -> Result<NamedArray, ValueError> {
        NamedArray::new(self.axes, self.values)
    }
}

/// Assembled join result. An empty registry collapses to a bare scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOutput<R> {
    Scalar(R),
    Grid(LabeledGrid<R>),
}

impl<R> JoinOutput<R> {
    #[must_use]
    pub fn as_scalar(&self) -> Option<&R> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Grid(_) => None,
        }
    }

    #[must_use]
    pub fn as_grid(&self) -> Option<&LabeledGrid<R>> {
        match self {
            Self::Scalar(_) => None,
            Self::Grid(grid) => Some(grid),
        }
    }

    #[must_use]
    pub fn into_scalar(self) -> Option<R> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Grid(_) => None,
        }
    }

    #[must_use]
    pub fn into_grid(self) -> Option<LabeledGrid<R>> {
        match self {
            Self::Scalar(_) => None,
            Self::Grid(grid) => Some(grid),
        }
    }
}

/// Shape `outputs` (in cell order) by `registry`.
pub fn assemble<R>(registry: Registry, mut outputs: Vec<R>) -> Result<JoinOutput<R>, ValueError> {
    if registry.is_empty() {
        if outputs.len() != 1 {
            return Err(ValueError::ElementCountMismatch {
                shape: Vec::new(),
                expected_count: 1,
                actual_count: outputs.len(),
            });
        }
        return outputs
            .pop()
            .map(JoinOutput::Scalar)
            .ok_or(ValueError::ElementCountMismatch {
                shape: Vec::new(),
                expected_count: 1,
                actual_count: 0,
            });
    }

    LabeledGrid::new(registry.into_axes(), outputs).map(JoinOutput::Grid)
}
