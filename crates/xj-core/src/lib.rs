#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Rule for reconciling two inputs that carry different labels for the same
/// axis name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    /// Any disagreement is an `AxisConflict`.
    #[default]
    Fail,
    /// Non-trivial label sets are narrowed to their ordered intersection.
    Intersect,
}

impl MismatchPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Intersect => "intersect",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            s if s.eq_ignore_ascii_case("fail") || s.eq_ignore_ascii_case("stop") => {
                Some(Self::Fail)
            }
            s if s.eq_ignore_ascii_case("intersect") => Some(Self::Intersect),
            _ => None,
        }
    }
}

/// A named dimension with an ordered sequence of element labels.
///
/// An empty label is an unnamed placeholder: it never participates in
/// cross-input matching. An axis whose labels are all empty is *trivial*.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub labels: Vec<String>,
}

impl Axis {
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// An axis of `len` placeholder labels.
    #[must_use]
    pub fn unlabelled(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            labels: vec![String::new(); len],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.labels.iter().all(String::is_empty)
    }

    /// Position of the first occurrence of a non-empty `label`.
    #[must_use]
    pub fn position(&self, label: &str) -> Option<usize> {
        if label.is_empty() {
            return None;
        }
        self.labels.iter().position(|candidate| candidate == label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    I64(i64),
    Bool(bool),
    F64Bits(u64),
}

impl Literal {
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self::F64Bits(value.to_bits())
    }

    #[must_use]
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Self::F64Bits(bits) => Some(f64::from_bits(bits)),
            Self::I64(value) => Some(value as f64),
            Self::Bool(_) => None,
        }
    }

    #[must_use]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::I64(value) => Some(value),
            Self::Bool(_) | Self::F64Bits(_) => None,
        }
    }

    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(value),
            Self::I64(_) | Self::F64Bits(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I64(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::F64Bits(bits) => write!(f, "{}", f64::from_bits(*bits)),
        }
    }
}

/// A value handed to (or returned from) the per-cell function.
///
/// `Array` lets a no-join argument carry a whole array through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Scalar(Literal),
    Array(NamedArray),
}

impl Value {
    #[must_use]
    pub fn scalar_i64(value: i64) -> Self {
        Self::Scalar(Literal::I64(value))
    }

    #[must_use]
    pub fn scalar_f64(value: f64) -> Self {
        Self::Scalar(Literal::from_f64(value))
    }

    #[must_use]
    pub fn scalar_bool(value: bool) -> Self {
        Self::Scalar(Literal::Bool(value))
    }

    #[must_use]
    pub fn as_scalar_literal(&self) -> Option<Literal> {
        match self {
            Self::Scalar(lit) => Some(*lit),
            Self::Array(_) => None,
        }
    }

    #[must_use]
    pub fn as_f64_scalar(&self) -> Option<f64> {
        self.as_scalar_literal().and_then(Literal::as_f64)
    }

    #[must_use]
    pub fn as_i64_scalar(&self) -> Option<i64> {
        self.as_scalar_literal().and_then(Literal::as_i64)
    }

    #[must_use]
    pub fn as_bool_scalar(&self) -> Option<bool> {
        self.as_scalar_literal().and_then(Literal::as_bool)
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&NamedArray> {
        match self {
            Self::Scalar(_) => None,
            Self::Array(array) => Some(array),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::scalar_i64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::scalar_f64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::scalar_bool(value)
    }
}

impl From<NamedArray> for Value {
    fn from(value: NamedArray) -> Self {
        Self::Array(value)
    }
}

/// Capability set every array-like input exposes to the join engine.
pub trait ArrayLike: fmt::Debug + Send + Sync {
    /// Ordered axes, one per dimension.
    fn axes(&self) -> &[Axis];

    /// The single element at `coords` (one position per axis).
    fn select(&self, coords: &[usize]) -> Result<Value, ValueError>;

    fn rank(&self) -> usize {
        self.axes().len()
    }
}

/// A dense row-major array whose dimensions are identified by axis name.
///
/// The element count always matches the axis lengths; every constructor,
/// deserialization included, goes through [`NamedArray::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "NamedArrayParts")]
pub struct NamedArray {
    axes: Vec<Axis>,
    elements: Vec<Value>,
}

#[derive(Deserialize)]
struct NamedArrayParts {
    axes: Vec<Axis>,
    elements: Vec<Value>,
}

impl TryFrom<NamedArrayParts> for NamedArray {
    type Error = ValueError;

    fn try_from(parts: NamedArrayParts) -> Result<Self, Self::Error> {
        Self::new(parts.axes, parts.elements)
    }
}

impl NamedArray {
    pub fn new(axes: Vec<Axis>, elements: Vec<Value>) -> Result<Self, ValueError> {
        let shape: Vec<usize> = axes.iter().map(Axis::len).collect();
        let expected_count = element_count(&shape).ok_or(ValueError::ShapeOverflow {
            shape: shape.clone(),
        })?;

        if expected_count != elements.len() {
            return Err(ValueError::ElementCountMismatch {
                shape,
                expected_count,
                actual_count: elements.len(),
            });
        }

        Ok(Self { axes, elements })
    }

    pub fn vector(axis: Axis, elements: Vec<Value>) -> Result<Self, ValueError> {
        Self::new(vec![axis], elements)
    }

    pub fn vector_i64(axis: Axis, values: &[i64]) -> Result<Self, ValueError> {
        Self::vector(axis, values.iter().copied().map(Value::scalar_i64).collect())
    }

    pub fn vector_f64(axis: Axis, values: &[f64]) -> Result<Self, ValueError> {
        Self::vector(axis, values.iter().copied().map(Value::scalar_f64).collect())
    }

    #[must_use]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Elements in row-major order.
    #[must_use]
    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<Axis>, Vec<Value>) {
        (self.axes, self.elements)
    }

    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::len).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element addressed by one label per axis, in axis order.
    #[must_use]
    pub fn get(&self, labels: &[&str]) -> Option<&Value> {
        if labels.len() != self.axes.len() {
            return None;
        }
        let coords = self
            .axes
            .iter()
            .zip(labels)
            .map(|(axis, label)| axis.position(label))
            .collect::<Option<Vec<_>>>()?;
        let offset = row_major_offset(&self.shape(), &coords).ok()?;
        self.elements.get(offset)
    }
}

impl ArrayLike for NamedArray {
    fn axes(&self) -> &[Axis] {
        &self.axes
    }

    fn select(&self, coords: &[usize]) -> Result<Value, ValueError> {
        let shape = self.shape();
        let offset = row_major_offset(&shape, coords)?;
        self.elements
            .get(offset)
            .cloned()
            .ok_or_else(|| ValueError::ElementCountMismatch {
                expected_count: element_count(&shape).unwrap_or(usize::MAX),
                shape,
                actual_count: self.elements.len(),
            })
    }
}

/// How an argument takes part in the join.
#[derive(Debug, Clone)]
pub enum ArgKind {
    /// Decomposed along its axes; each cell sees one element.
    Joined(Arc<dyn ArrayLike>),
    /// Passed unchanged to every cell; contributes no axes.
    NoJoin(Value),
}

/// One argument of a join, optionally named.
#[derive(Debug, Clone)]
pub struct JoinArg {
    pub name: Option<String>,
    pub kind: ArgKind,
}

impl JoinArg {
    #[must_use]
    pub fn joined(array: impl ArrayLike + 'static) -> Self {
        Self {
            name: None,
            kind: ArgKind::Joined(Arc::new(array)),
        }
    }

    #[must_use]
    pub fn joined_shared(array: Arc<dyn ArrayLike>) -> Self {
        Self {
            name: None,
            kind: ArgKind::Joined(array),
        }
    }

    #[must_use]
    pub fn no_join(value: impl Into<Value>) -> Self {
        Self {
            name: None,
            kind: ArgKind::NoJoin(value.into()),
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declared name, or the positional `arg{position}` convention.
    #[must_use]
    pub fn display_name(&self, position: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("arg{position}"),
        }
    }

    /// Axes this argument contributes to the join; empty for no-join values.
    #[must_use]
    pub fn axes(&self) -> &[Axis] {
        match &self.kind {
            ArgKind::Joined(array) => array.axes(),
            ArgKind::NoJoin(_) => &[],
        }
    }

    #[must_use]
    pub fn is_no_join(&self) -> bool {
        matches!(self.kind, ArgKind::NoJoin(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    ShapeOverflow {
        shape: Vec<usize>,
    },
    ElementCountMismatch {
        shape: Vec<usize>,
        expected_count: usize,
        actual_count: usize,
    },
    CoordinateRankMismatch {
        expected: usize,
        actual: usize,
    },
    CoordinateOutOfBounds {
        axis: usize,
        index: usize,
        axis_len: usize,
    },
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeOverflow { shape } => {
                write!(f, "shape element count overflowed: {shape:?}")
            }
            Self::ElementCountMismatch {
                shape,
                expected_count,
                actual_count,
            } => {
                write!(
                    f,
                    "element count mismatch for shape {:?}: expected {}, got {}",
                    shape, expected_count, actual_count
                )
            }
            Self::CoordinateRankMismatch { expected, actual } => {
                write!(
                    f,
                    "coordinate rank mismatch: expected {expected} positions, got {actual}"
                )
            }
            Self::CoordinateOutOfBounds {
                axis,
                index,
                axis_len,
            } => {
                write!(
                    f,
                    "position {index} out of bounds for axis {axis} of length {axis_len}"
                )
            }
        }
    }
}

impl std::error::Error for ValueError {}

/// Product of `shape`, or `None` on overflow. The empty shape has one element.
#[must_use]
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1_usize, |acc, dim| acc.checked_mul(*dim))
}

/// Linear offset of `coords` in a row-major layout of `shape`
/// (last axis varies fastest).
pub fn row_major_offset(shape: &[usize], coords: &[usize]) -> Result<usize, ValueError> {
    if shape.len() != coords.len() {
        return Err(ValueError::CoordinateRankMismatch {
            expected: shape.len(),
            actual: coords.len(),
        });
    }

    let mut offset = 0_usize;
    for (axis, (&dim, &index)) in shape.iter().zip(coords).enumerate() {
        if index >= dim {
            return Err(ValueError::CoordinateOutOfBounds {
                axis,
                index,
                axis_len: dim,
            });
        }
        offset = offset
            .checked_mul(dim)
            .and_then(|scaled| scaled.checked_add(index))
            .ok_or(ValueError::ShapeOverflow {
                shape: shape.to_vec(),
            })?;
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::{
        ArrayLike, Axis, JoinArg, Literal, MismatchPolicy, NamedArray, Value, ValueError,
        element_count, row_major_offset,
    };
    use proptest::prelude::*;
    use proptest::test_runner::{Config as ProptestConfig, TestRunner};
    use std::collections::BTreeSet;

    fn grid_2x3() -> NamedArray {
        NamedArray::new(
            vec![Axis::new("X", ["a", "b"]), Axis::new("Y", ["1", "2", "3"])],
            (0..6).map(Value::scalar_i64).collect(),
        )
        .expect("2x3 array should build")
    }

    #[test]
    fn element_count_mismatch_is_rejected() {
        let err = NamedArray::new(
            vec![Axis::new("X", ["a", "b"])],
            vec![Value::scalar_i64(1)],
        )
        .expect_err("one element for a length-2 axis");
        assert_eq!(
            err,
            ValueError::ElementCountMismatch {
                shape: vec![2],
                expected_count: 2,
                actual_count: 1,
            }
        );
    }

    #[test]
    fn select_is_row_major() {
        let array = grid_2x3();
        assert_eq!(array.select(&[0, 2]).expect("select"), Value::scalar_i64(2));
        assert_eq!(array.select(&[1, 0]).expect("select"), Value::scalar_i64(3));
        assert_eq!(array.get(&["b", "3"]), Some(&Value::scalar_i64(5)));
    }

    #[test]
    fn select_out_of_bounds_reports_axis() {
        let err = grid_2x3().select(&[0, 3]).expect_err("column 3 does not exist");
        assert_eq!(
            err,
            ValueError::CoordinateOutOfBounds {
                axis: 1,
                index: 3,
                axis_len: 3,
            }
        );
        assert!(err.to_string().contains("axis 1"));
    }

    #[test]
    fn short_element_buffers_are_rejected_when_deserialized() {
        let short = serde_json::json!({
            "axes": [{"name": "X", "labels": ["a", "b"]}],
            "elements": [{"Scalar": {"I64": 1}}],
        });
        let err = serde_json::from_value::<NamedArray>(short).expect_err("count mismatch");
        assert!(err.to_string().contains("element count mismatch"));

        let array = grid_2x3();
        let encoded = serde_json::to_value(&array).expect("serialize");
        let decoded: NamedArray = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, array);
        assert_eq!(decoded.elements().len(), 6);
        assert_eq!(ArrayLike::axes(&decoded)[1].name, "Y");
    }

    #[test]
    fn get_ignores_placeholder_labels() {
        let array = NamedArray::vector_i64(Axis::unlabelled("C", 2), &[7, 8])
            .expect("vector should build");
        assert_eq!(array.get(&[""]), None);
    }

    #[test]
    fn trivial_axis_detection() {
        assert!(Axis::unlabelled("C", 4).is_trivial());
        assert!(Axis::new("C", Vec::<String>::new()).is_trivial());
        assert!(!Axis::new("C", ["", "x"]).is_trivial());
        assert_eq!(Axis::new("C", ["", "x"]).position("x"), Some(1));
        assert_eq!(Axis::new("C", ["", "x"]).position(""), None);
    }

    #[test]
    fn policy_names_parse() {
        assert_eq!(MismatchPolicy::from_name("fail"), Some(MismatchPolicy::Fail));
        assert_eq!(MismatchPolicy::from_name("STOP"), Some(MismatchPolicy::Fail));
        assert_eq!(
            MismatchPolicy::from_name(" intersect "),
            Some(MismatchPolicy::Intersect)
        );
        assert_eq!(MismatchPolicy::from_name("union"), None);
        assert_eq!(MismatchPolicy::default(), MismatchPolicy::Fail);
    }

    #[test]
    fn policy_serializes_snake_case() {
        let encoded = serde_json::to_string(&MismatchPolicy::Intersect).expect("serialize");
        assert_eq!(encoded, "\"intersect\"");
    }

    #[test]
    fn join_arg_positional_names() {
        let arg = JoinArg::no_join(142_i64);
        assert_eq!(arg.display_name(3), "arg3");
        assert!(arg.axes().is_empty());
        assert!(arg.is_no_join());

        let named = JoinArg::joined(grid_2x3()).named("grid");
        assert_eq!(named.display_name(0), "grid");
        assert_eq!(named.axes().len(), 2);
    }

    #[test]
    fn no_join_can_carry_a_whole_array() {
        let arg = JoinArg::no_join(grid_2x3());
        assert!(arg.axes().is_empty());
    }

    #[test]
    fn literal_accessors() {
        assert_eq!(Literal::I64(4).as_f64(), Some(4.0));
        assert_eq!(Literal::from_f64(2.5).as_i64(), None);
        assert_eq!(Literal::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::scalar_f64(1.5).as_f64_scalar(), Some(1.5));
        assert_eq!(Literal::from_f64(2.5).to_string(), "2.5");
    }

    #[test]
    fn empty_shape_has_one_element() {
        assert_eq!(element_count(&[]), Some(1));
        assert_eq!(row_major_offset(&[], &[]), Ok(0));
        assert_eq!(element_count(&[usize::MAX, 2]), None);
    }

    #[test]
    fn prop_row_major_offsets_are_a_bijection() {
        let mut runner = TestRunner::new(ProptestConfig::with_cases(
            xj_test_utils::property_test_case_count(),
        ));
        runner
            .run(&prop::collection::vec(1_usize..5, 0..4), |shape| {
                let total = element_count(&shape).expect("small shapes fit");
                let mut seen = BTreeSet::new();
                let mut coords = vec![0_usize; shape.len()];
                for _ in 0..total {
                    let offset = row_major_offset(&shape, &coords).expect("in bounds");
                    prop_assert!(offset < total);
                    prop_assert!(seen.insert(offset));
                    for axis in (0..shape.len()).rev() {
                        coords[axis] += 1;
                        if coords[axis] < shape[axis] {
                            break;
                        }
                        coords[axis] = 0;
                    }
                }
                prop_assert_eq!(seen.len(), total);
                Ok(())
            })
            .expect("row-major property should hold");
    }
}
