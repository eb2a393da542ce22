#![forbid(unsafe_code)]

pub mod fixture;

pub use fixture::{
    FIXTURE_SCHEMA_VERSION, FixtureAxis, FixtureErrorKind, FixtureInput, FixtureNumber, FixtureOp,
    FixtureOutcome, JoinFixtureBundle, JoinFixtureCase,
};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use xj_api::{JoinOutput, MapJoinError, map_join};
use xj_cache::MemoryCacheStore;
use xj_core::Literal;
use xj_dispatch::CellArgs;
use xj_runtime::Runner;

pub const PARITY_REPORT_SCHEMA_VERSION: &str = "xjoin.join-parity-report.v1";

#[must_use]
pub fn default_fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

pub fn read_fixture_bundle(path: &Path) -> Result<JoinFixtureBundle, std::io::Error> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str::<JoinFixtureBundle>(&raw).map_err(std::io::Error::other)
}

#[must_use]
pub fn collect_json_fixtures(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    collect_json_fixtures_recursive(root, &mut out);
    out.sort();
    out
}

fn collect_json_fixtures_recursive(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_json_fixtures_recursive(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftClassification {
    Pass,
    ValueMismatch,
    ShapeMismatch,
    UnexpectedError,
    MissingError,
    /// A cached re-run disagreed with the first run.
    CacheDivergence,
    InvalidFixture,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCaseReport {
    pub case_id: String,
    /// SHA-256 of the case's JSON encoding.
    pub fixture_id: String,
    pub op: FixtureOp,
    pub drift_classification: DriftClassification,
    pub matched: bool,
    pub expected_json: String,
    pub actual_json: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinParityReport {
    pub schema_version: String,
    pub total_cases: usize,
    pub matched_cases: usize,
    pub mismatched_cases: usize,
    pub reports: Vec<JoinCaseReport>,
}

impl JoinParityReport {
    #[must_use]
    pub fn from_reports(reports: Vec<JoinCaseReport>) -> Self {
        let matched_cases = reports.iter().filter(|report| report.matched).count();
        Self {
            schema_version: PARITY_REPORT_SCHEMA_VERSION.to_owned(),
            total_cases: reports.len(),
            matched_cases,
            mismatched_cases: reports.len().saturating_sub(matched_cases),
            reports,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRunnerConfig {
    pub case_timeout: Duration,
}

impl Default for BatchRunnerConfig {
    fn default() -> Self {
        Self {
            case_timeout: Duration::from_secs(30),
        }
    }
}

#[must_use]
pub fn run_fixture_bundle(bundle: &JoinFixtureBundle) -> JoinParityReport {
    JoinParityReport::from_reports(bundle.cases.iter().map(run_fixture_case).collect())
}

/// Run every case on its own thread; a case that does not report within
/// `batch.case_timeout` is recorded as a timeout.
#[must_use]
pub fn run_fixture_bundle_batched(
    bundle: &JoinFixtureBundle,
    batch: &BatchRunnerConfig,
) -> JoinParityReport {
    let pending: Vec<_> = bundle
        .cases
        .iter()
        .cloned()
        .map(|case| {
            let case_id = case.case_id.clone();
            let fixture_id = fixture_id(&case);
            let op = case.op;
            let expected_json = expected_json(&case);
            let (tx, rx) = mpsc::channel::<JoinCaseReport>();
            std::thread::spawn(move || {
                let _ = tx.send(run_fixture_case(&case));
            });
            (case_id, fixture_id, op, expected_json, rx)
        })
        .collect();

    let reports = pending
        .into_iter()
        .map(|(case_id, fixture_id, op, expected_json, rx)| {
            match rx.recv_timeout(batch.case_timeout) {
                Ok(report) => report,
                Err(_) => JoinCaseReport {
                    case_id,
                    fixture_id,
                    op,
                    drift_classification: DriftClassification::Timeout,
                    matched: false,
                    expected_json,
                    actual_json: None,
                    error: Some(format!(
                        "timeout waiting for case result after {}ms",
                        batch.case_timeout.as_millis()
                    )),
                },
            }
        })
        .collect();
    JoinParityReport::from_reports(reports)
}

fn fixture_id(case: &JoinFixtureCase) -> String {
    xj_test_utils::fixture_id_from_json(case)
        .unwrap_or_else(|err| format!("<fixture digest error: {err}>"))
}

fn expected_json(case: &JoinFixtureCase) -> String {
    serde_json::to_string(&case.expected)
        .unwrap_or_else(|err| format!("<expected serialization error: {err}>"))
}

#[must_use]
pub fn run_fixture_case(case: &JoinFixtureCase) -> JoinCaseReport {
    let expected_json = expected_json(case);
    let fixture_id = fixture_id(case);
    let report = |drift: DriftClassification, actual: Option<&FixtureOutcome>, error: Option<String>| {
        JoinCaseReport {
            case_id: case.case_id.clone(),
            fixture_id: fixture_id.clone(),
            op: case.op,
            drift_classification: drift,
            matched: drift == DriftClassification::Pass,
            expected_json: expected_json.clone(),
            actual_json: actual.and_then(|outcome| serde_json::to_string(outcome).ok()),
            error,
        }
    };

    let args = match case
        .inputs
        .iter()
        .map(FixtureInput::to_join_arg)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(args) => args,
        Err(err) => {
            return report(
                DriftClassification::InvalidFixture,
                None,
                Some(format!("fixture input conversion failed: {err}")),
            );
        }
    };
    let runner = match Runner::from_name(&case.runner, case.threads) {
        Ok(runner) => runner,
        Err(err) => {
            return report(DriftClassification::InvalidFixture, None, Some(err.to_string()));
        }
    };

    let op = case.op;
    let mut join = map_join(move |cell: &CellArgs<'_>| op.apply_cell(cell))
        .with_policy(case.policy)
        .with_shuffle(case.shuffle)
        .with_runner(runner);
    if let Some(seed) = case.seed {
        join = join.with_seed(seed);
    }
    if case.cached {
        join = join.with_cache(Arc::new(MemoryCacheStore::new()));
    }

    let first = join.call(args.clone());
    if case.cached {
        let second = join.call(args);
        let first_outcome = observe(&first);
        let second_outcome = observe(&second);
        if first_outcome.as_ref().ok() != second_outcome.as_ref().ok() {
            return report(
                DriftClassification::CacheDivergence,
                first_outcome.as_ref().ok(),
                Some("cached re-run produced a different result".to_owned()),
            );
        }
    }

    let (drift, actual, error) = match observe(&first) {
        Ok(actual) => {
            let drift = compare(&case.expected, &actual, case.atol);
            (drift, Some(actual), None)
        }
        Err(detail) => (DriftClassification::UnexpectedError, None, Some(detail)),
    };
    tracing::debug!(case_id = %case.case_id, ?drift, "fixture case finished");
    report(drift, actual.as_ref(), error)
}

/// Translate a join result into the fixture vocabulary. Failures with no
/// fixture counterpart come back as `Err(detail)`.
fn observe(result: &Result<JoinOutput<Literal>, MapJoinError<String>>) -> Result<FixtureOutcome, String> {
    let to_numbers = |values: &[Literal]| {
        values
            .iter()
            .map(|&literal| {
                FixtureNumber::from_literal(literal)
                    .ok_or_else(|| format!("non-numeric output `{literal}`"))
            })
            .collect::<Result<Vec<_>, _>>()
    };

    match result {
        Ok(JoinOutput::Scalar(literal)) => FixtureNumber::from_literal(*literal)
            .map(|value| FixtureOutcome::Scalar { value })
            .ok_or_else(|| format!("non-numeric output `{literal}`")),
        Ok(JoinOutput::Grid(grid)) => Ok(FixtureOutcome::Grid {
            axes: grid.axes().iter().map(FixtureAxis::from_axis).collect(),
            values: to_numbers(grid.values())?,
        }),
        Err(err) => FixtureErrorKind::classify(err)
            .map(|error| FixtureOutcome::Error { error })
            .ok_or_else(|| err.to_string()),
    }
}

fn compare(expected: &FixtureOutcome, actual: &FixtureOutcome, atol: f64) -> DriftClassification {
    match (expected, actual) {
        (FixtureOutcome::Scalar { value: want }, FixtureOutcome::Scalar { value: got }) => {
            if want.approx_eq(*got, atol) {
                DriftClassification::Pass
            } else {
                DriftClassification::ValueMismatch
            }
        }
        (
            FixtureOutcome::Grid {
                axes: want_axes,
                values: want,
            },
            FixtureOutcome::Grid {
                axes: got_axes,
                values: got,
            },
        ) => {
            let same_axes = want_axes.len() == got_axes.len()
                && want_axes
                    .iter()
                    .zip(got_axes)
                    .all(|(want, got)| want.to_axis() == got.to_axis());
            if !same_axes || want.len() != got.len() {
                DriftClassification::ShapeMismatch
            } else if want.iter().zip(got).all(|(w, g)| w.approx_eq(*g, atol)) {
                DriftClassification::Pass
            } else {
                DriftClassification::ValueMismatch
            }
        }
        (FixtureOutcome::Error { error: want }, FixtureOutcome::Error { error: got }) => {
            if want == got {
                DriftClassification::Pass
            } else {
                DriftClassification::UnexpectedError
            }
        }
        (FixtureOutcome::Error { .. }, _) => DriftClassification::MissingError,
        (_, FixtureOutcome::Error { .. }) => DriftClassification::UnexpectedError,
        _ => DriftClassification::ShapeMismatch,
    }
}

pub fn emit_parity_json(report: &JoinParityReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

#[must_use]
pub fn emit_parity_markdown(report: &JoinParityReport) -> String {
    let mut out = String::new();
    out.push_str("# Join Parity Report\n\n");
    out.push_str("| Metric | Value |\n");
    out.push_str("|---|---|\n");
    out.push_str(&format!("| Schema | `{}` |\n", report.schema_version));
    out.push_str(&format!("| Total Cases | {} |\n", report.total_cases));
    out.push_str(&format!("| Matched Cases | {} |\n", report.matched_cases));
    out.push_str(&format!(
        "| Mismatched Cases | {} |\n\n",
        report.mismatched_cases
    ));

    out.push_str("| Case ID | Op | Drift | Matched |\n");
    out.push_str("|---|---|---|---|\n");
    for case in &report.reports {
        out.push_str(&format!(
            "| {} | {} | {:?} | {} |\n",
            case.case_id,
            case.op.as_str(),
            case.drift_classification,
            case.matched
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{DriftClassification, compare};
    use crate::fixture::{FixtureAxis, FixtureErrorKind, FixtureNumber, FixtureOutcome};

    fn grid(labels: &[&str], values: &[i64]) -> FixtureOutcome {
        FixtureOutcome::Grid {
            axes: vec![FixtureAxis {
                name: "X".to_owned(),
                labels: labels.iter().map(|l| (*l).to_owned()).collect(),
                len: None,
            }],
            values: values.iter().copied().map(FixtureNumber::I64).collect(),
        }
    }

    #[test]
    fn comparison_separates_shape_from_value_drift() {
        assert_eq!(
            compare(&grid(&["a", "b"], &[1, 2]), &grid(&["a", "b"], &[1, 2]), 0.0),
            DriftClassification::Pass
        );
        assert_eq!(
            compare(&grid(&["a", "b"], &[1, 2]), &grid(&["a", "b"], &[1, 3]), 0.0),
            DriftClassification::ValueMismatch
        );
        assert_eq!(
            compare(&grid(&["a", "b"], &[1, 2]), &grid(&["b", "a"], &[1, 2]), 0.0),
            DriftClassification::ShapeMismatch
        );
    }

    #[test]
    fn comparison_of_errors() {
        let conflict = FixtureOutcome::Error {
            error: FixtureErrorKind::AxisConflict,
        };
        assert_eq!(
            compare(&conflict, &grid(&["a"], &[1]), 0.0),
            DriftClassification::MissingError
        );
        assert_eq!(
            compare(&grid(&["a"], &[1]), &conflict, 0.0),
            DriftClassification::UnexpectedError
        );
        assert_eq!(compare(&conflict, &conflict, 0.0), DriftClassification::Pass);
    }
}
