#![forbid(unsafe_code)]

//! Property-test knobs and fixture digests shared by the xjoin test suites.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Cases per property test: `XJ_PROPTEST_CASES` when set to a positive
/// number, otherwise 512 on CI and 128 locally.
#[must_use]
pub fn property_test_case_count() -> u32 {
    if let Ok(raw) = std::env::var("XJ_PROPTEST_CASES")
        && let Ok(parsed) = raw.parse::<u32>()
        && parsed > 0
    {
        return parsed;
    }

    if std::env::var_os("CI").is_some() { 512 } else { 128 }
}

/// Hex SHA-256 of the fixture's JSON encoding.
pub fn fixture_id_from_json<T: Serialize>(fixture: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(fixture)?;
    Ok(Sha256::digest(&bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}
