//! JSON fixture model: inputs, the per-cell operation, and expected results.

use serde::{Deserialize, Serialize};
use xj_core::{Axis, JoinArg, Literal, MismatchPolicy, NamedArray, Value, ValueError};
use xj_dispatch::{CellArgs, MapJoinError};
use xj_index::RegistryError;

pub const FIXTURE_SCHEMA_VERSION: &str = "xjoin.join-fixtures.v1";

/// An integer or float fixture value. Integers stay integers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureNumber {
    I64(i64),
    F64(f64),
}

impl FixtureNumber {
    #[must_use]
    pub fn to_literal(self) -> Literal {
        match self {
            Self::I64(value) => Literal::I64(value),
            Self::F64(value) => Literal::from_f64(value),
        }
    }

    #[must_use]
    pub fn from_literal(literal: Literal) -> Option<Self> {
        match literal {
            Literal::I64(value) => Some(Self::I64(value)),
            Literal::F64Bits(_) => literal.as_f64().map(Self::F64),
            Literal::Bool(_) => None,
        }
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::I64(value) => value as f64,
            Self::F64(value) => value,
        }
    }

    #[must_use]
    pub fn approx_eq(self, other: Self, atol: f64) -> bool {
        match (self, other) {
            (Self::I64(a), Self::I64(b)) => a == b,
            (a, b) => (a.as_f64() - b.as_f64()).abs() <= atol,
        }
    }
}

/// An axis as written in a fixture: explicit labels, or a bare length for a
/// trivially-labelled axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureAxis {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
}

impl FixtureAxis {
    #[must_use]
    pub fn to_axis(&self) -> Axis {
        match self.len {
            Some(len) if self.labels.is_empty() => Axis::unlabelled(self.name.clone(), len),
            _ => Axis::new(self.name.clone(), self.labels.clone()),
        }
    }

    #[must_use]
    pub fn from_axis(axis: &Axis) -> Self {
        if axis.is_trivial() {
            Self {
                name: axis.name.clone(),
                labels: Vec::new(),
                len: Some(axis.len()),
            }
        } else {
            Self {
                name: axis.name.clone(),
                labels: axis.labels.clone(),
                len: None,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixtureInput {
    /// A no-join constant.
    Constant {
        #[serde(default)]
        name: Option<String>,
        value: FixtureNumber,
    },
    /// A joined array; `values` are row-major over `axes`.
    Array {
        #[serde(default)]
        name: Option<String>,
        axes: Vec<FixtureAxis>,
        values: Vec<FixtureNumber>,
    },
}

impl FixtureInput {
    pub fn to_join_arg(&self) -> Result<JoinArg, ValueError> {
        let (name, arg) = match self {
            Self::Constant { name, value } => {
                (name, JoinArg::no_join(Value::Scalar(value.to_literal())))
            }
            Self::Array { name, axes, values } => {
                let array = NamedArray::new(
                    axes.iter().map(FixtureAxis::to_axis).collect(),
                    values
                        .iter()
                        .map(|value| Value::Scalar(value.to_literal()))
                        .collect(),
                )?;
                (name, JoinArg::joined(array))
            }
        };
        Ok(match name {
            Some(name) => arg.named(name.clone()),
            None => arg,
        })
    }
}

/// Operation applied to every cell's arguments, in argument order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOp {
    Multiply,
    Add,
    Subtract,
    Max,
    First,
}

impl FixtureOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Multiply => "multiply",
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Max => "max",
            Self::First => "first",
        }
    }

    pub fn apply_cell(self, args: &CellArgs<'_>) -> Result<Literal, String> {
        let operands = args
            .iter()
            .map(|(name, value)| {
                value
                    .as_scalar_literal()
                    .ok_or_else(|| format!("argument `{name}` is not a scalar"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.apply(&operands)
    }

    pub fn apply(self, operands: &[Literal]) -> Result<Literal, String> {
        let Some((&head, tail)) = operands.split_first() else {
            return Err(format!("{} needs at least one operand", self.as_str()));
        };
        if self == Self::First {
            return Ok(head);
        }

        let integers: Option<Vec<i64>> = operands.iter().map(|lit| lit.as_i64()).collect();
        if let Some(integers) = integers {
            let overflow = || format!("{} overflowed i64", self.as_str());
            let mut acc = integers[0];
            for &next in &integers[1..] {
                acc = match self {
                    Self::Multiply => acc.checked_mul(next).ok_or_else(overflow)?,
                    Self::Add => acc.checked_add(next).ok_or_else(overflow)?,
                    Self::Subtract => acc.checked_sub(next).ok_or_else(overflow)?,
                    Self::Max => acc.max(next),
                    Self::First => acc,
                };
            }
            return Ok(Literal::I64(acc));
        }

        let as_float = |lit: Literal| {
            lit.as_f64()
                .ok_or_else(|| format!("{} expects numeric operands, got {lit}", self.as_str()))
        };
        let mut acc = as_float(head)?;
        for &next in tail {
            let next = as_float(next)?;
            acc = match self {
                Self::Multiply => acc * next,
                Self::Add => acc + next,
                Self::Subtract => acc - next,
                Self::Max => acc.max(next),
                Self::First => acc,
            };
        }
        Ok(Literal::from_f64(acc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureErrorKind {
    InvalidAxisName,
    AxisConflict,
    UnmarkedScalar,
    DuplicateArgName,
    Apply,
}

impl FixtureErrorKind {
    /// The fixture-level kind of a join failure, if it has one.
    #[must_use]
    pub fn classify<E>(err: &MapJoinError<E>) -> Option<Self> {
        match err {
            MapJoinError::Registry(RegistryError::InvalidAxisName { .. }) => {
                Some(Self::InvalidAxisName)
            }
            MapJoinError::Registry(RegistryError::AxisConflict { .. }) => Some(Self::AxisConflict),
            MapJoinError::Registry(RegistryError::UnmarkedScalar { .. }) => {
                Some(Self::UnmarkedScalar)
            }
            MapJoinError::Registry(RegistryError::DuplicateArgName { .. }) => {
                Some(Self::DuplicateArgName)
            }
            MapJoinError::Apply(_) => Some(Self::Apply),
            _ => None,
        }
    }
}

/// Expected (or observed) outcome of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixtureOutcome {
    Scalar {
        value: FixtureNumber,
    },
    Grid {
        axes: Vec<FixtureAxis>,
        values: Vec<FixtureNumber>,
    },
    Error {
        error: FixtureErrorKind,
    },
}

fn default_runner() -> String {
    "sequential".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinFixtureCase {
    pub case_id: String,
    #[serde(default)]
    pub policy: MismatchPolicy,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_runner")]
    pub runner: String,
    #[serde(default)]
    pub threads: Option<usize>,
    /// Run twice against one cache and require identical results.
    #[serde(default)]
    pub cached: bool,
    pub op: FixtureOp,
    pub inputs: Vec<FixtureInput>,
    pub expected: FixtureOutcome,
    #[serde(default)]
    pub atol: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinFixtureBundle {
    pub schema_version: String,
    pub cases: Vec<JoinFixtureCase>,
}
