//! Axis registry builder.
//!
//! Folds every joined argument's axes into one ordered `name -> labels`
//! mapping. Axis order is first-seen order across arguments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use xj_core::{ArgKind, Axis, JoinArg, MismatchPolicy};

// ── Registry Errors ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidAxisReason {
    EmptyName,
    DuplicateName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An argument has an unnamed axis or names two axes the same.
    InvalidAxisName {
        input: String,
        axis_position: usize,
        axis: String,
        reason: InvalidAxisReason,
    },
    /// Two arguments disagree on an axis in a way the policy cannot reconcile.
    AxisConflict {
        axis: String,
        first_input: String,
        second_input: String,
        first_labels: Vec<String>,
        second_labels: Vec<String>,
        policy: MismatchPolicy,
    },
    /// A zero-axis argument that was not wrapped as no-join.
    UnmarkedScalar { input: String },
    /// Two arguments resolve to the same name.
    DuplicateArgName { name: String, positions: (usize, usize) },
    /// The product of axis lengths does not fit in `usize`.
    CellCountOverflow { shape: Vec<usize> },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAxisName {
                input,
                axis_position,
                axis,
                reason,
            } => match reason {
                InvalidAxisReason::EmptyName => write!(
                    f,
                    "input `{input}` has an unnamed axis at dimension {axis_position}"
                ),
                InvalidAxisReason::DuplicateName => write!(
                    f,
                    "input `{input}` names dimension {axis_position} `{axis}`, which is already used by an earlier dimension"
                ),
            },
            Self::AxisConflict {
                axis,
                first_input,
                second_input,
                first_labels,
                second_labels,
                policy,
            } => write!(
                f,
                "axis `{axis}` conflicts under policy `{}`: `{first_input}` has {} labels {:?}, `{second_input}` has {} labels {:?}",
                policy.as_str(),
                first_labels.len(),
                first_labels,
                second_labels.len(),
                second_labels
            ),
            Self::UnmarkedScalar { input } => write!(
                f,
                "input `{input}` has no axes; wrap it as a no-join argument to pass it to every cell"
            ),
            Self::DuplicateArgName { name, positions } => write!(
                f,
                "argument name `{name}` is used at positions {} and {}",
                positions.0, positions.1
            ),
            Self::CellCountOverflow { shape } => {
                write!(f, "index space {shape:?} has more cells than fit in usize")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ── Registry ───────────────────────────────────────────────────────

/// Ordered mapping from axis name to merged labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    axes: Vec<Axis>,
}

impl Registry {
    #[must_use]
    pub fn from_axes(axes: Vec<Axis>) -> Self {
        Self { axes }
    }

    #[must_use]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    #[must_use]
    pub fn into_axes(self) -> Vec<Axis> {
        self.axes
    }

    /// Number of axes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.axes.iter().position(|axis| axis.name == name)
    }

    #[must_use]
    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::len).collect()
    }
}

/// Build the registry for `args`, reconciling shared axes under `policy`.
///
/// Every argument is validated before any axes are merged, so a malformed
/// argument is reported even when an earlier pair would also conflict.
pub fn build_registry(args: &[JoinArg], policy: MismatchPolicy) -> Result<Registry, RegistryError> {
    check_arg_names(args)?;
    for (position, arg) in args.iter().enumerate() {
        validate_arg(arg, position)?;
    }

    let mut axes: Vec<Axis> = Vec::new();
    let mut contributors: Vec<String> = Vec::new();
    // Length every contributing input agreed on, before any narrowing.
    let mut agreed_lens: Vec<usize> = Vec::new();

    for (position, arg) in args.iter().enumerate() {
        let input = arg.display_name(position);
        for incoming in arg.axes() {
            let Some(slot) = axes.iter().position(|axis| axis.name == incoming.name) else {
                axes.push(incoming.clone());
                contributors.push(input.clone());
                agreed_lens.push(incoming.len());
                continue;
            };

            let current = Registered {
                axis: &axes[slot],
                input: &contributors[slot],
                agreed_len: agreed_lens[slot],
            };
            if let Some(merged) = merge_axis(&current, incoming, &input, policy)? {
                axes[slot] = merged;
            }
        }
    }

    tracing::debug!(
        axes = axes.len(),
        names = ?axes.iter().map(|axis| axis.name.as_str()).collect::<Vec<_>>(),
        policy = policy.as_str(),
        "built axis registry"
    );

    Ok(Registry { axes })
}

fn check_arg_names(args: &[JoinArg]) -> Result<(), RegistryError> {
    let names: Vec<String> = args
        .iter()
        .enumerate()
        .map(|(position, arg)| arg.display_name(position))
        .collect();
    for (later, name) in names.iter().enumerate() {
        if let Some(earlier) = names[..later].iter().position(|seen| seen == name) {
            return Err(RegistryError::DuplicateArgName {
                name: name.clone(),
                positions: (earlier, later),
            });
        }
    }
    Ok(())
}

fn validate_arg(arg: &JoinArg, position: usize) -> Result<(), RegistryError> {
    let ArgKind::Joined(array) = &arg.kind else {
        return Ok(());
    };

    let input = arg.display_name(position);
    let axes = array.axes();
    if axes.is_empty() {
        return Err(RegistryError::UnmarkedScalar { input });
    }

    let mut seen = BTreeSet::new();
    for (axis_position, axis) in axes.iter().enumerate() {
        let reason = if axis.name.is_empty() {
            Some(InvalidAxisReason::EmptyName)
        } else if !seen.insert(axis.name.as_str()) {
            Some(InvalidAxisReason::DuplicateName)
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(RegistryError::InvalidAxisName {
                input,
                axis_position,
                axis: axis.name.clone(),
                reason,
            });
        }
    }
    Ok(())
}

struct Registered<'a> {
    axis: &'a Axis,
    input: &'a str,
    agreed_len: usize,
}

/// Reconcile `incoming` with the registered axis. Returns the replacement
/// axis, or `None` when the registered one already stands.
///
/// Inputs must agree on length under both policies; `intersect` only
/// narrows equal-length label sets that disagree on labels.
fn merge_axis(
    registered: &Registered<'_>,
    incoming: &Axis,
    incoming_input: &str,
    policy: MismatchPolicy,
) -> Result<Option<Axis>, RegistryError> {
    let current = registered.axis;
    if current.labels == incoming.labels {
        return Ok(None);
    }

    let conflict = || RegistryError::AxisConflict {
        axis: current.name.clone(),
        first_input: registered.input.to_owned(),
        second_input: incoming_input.to_owned(),
        first_labels: current.labels.clone(),
        second_labels: incoming.labels.clone(),
        policy,
    };

    if incoming.len() != registered.agreed_len {
        return Err(conflict());
    }

    // An axis already narrowed to nothing stays empty.
    if policy == MismatchPolicy::Intersect && current.is_empty() && !incoming.is_trivial() {
        return Ok(None);
    }

    match (current.is_trivial(), incoming.is_trivial()) {
        (true, false) => Ok(Some(incoming.clone())),
        (_, true) => Ok(None),
        (false, false) => match policy {
            MismatchPolicy::Fail => Err(conflict()),
            MismatchPolicy::Intersect => {
                let kept: Vec<String> = current
                    .labels
                    .iter()
                    .filter(|label| incoming.position(label).is_some())
                    .cloned()
                    .collect();
                if kept.is_empty() {
                    tracing::warn!(
                        axis = %current.name,
                        first_input = registered.input,
                        second_input = incoming_input,
                        "label intersection is empty; the joined result will have no cells"
                    );
                }
                Ok(Some(Axis {
                    name: current.name.clone(),
                    labels: kept,
                }))
            }
        },
    }
}
