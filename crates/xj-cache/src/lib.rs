#![forbid(unsafe_code)]

//! Cache keys derived from cell coordinates, and the stores that persist one
//! opaque blob per key.

pub mod store;

pub use store::{CacheStore, DirCacheStore, MemoryCacheStore};

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use xj_core::Axis;

/// Separator between coordinate labels in a default key.
pub const KEY_SEPARATOR: &str = ".";

/// Keys longer than this are truncated and suffixed with a digest.
pub const MAX_KEY_LEN: usize = 120;

const DIGEST_SUFFIX_LEN: usize = 16;

/// Leads the component of a coordinate whose axis label is empty.
pub const PLACEHOLDER_MARKER: char = '-';

/// Key used when the index space is a single empty cell.
pub const SCALAR_CELL_KEY: &str = "scalar";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    body: String,
}

impl CacheKey {
    /// Build a path-safe key from an arbitrary raw key.
    ///
    /// A raw key that is already path-safe and short is used as is. Anything
    /// else keeps a sanitised prefix and gains a digest of the raw text, so
    /// two raw keys that sanitise alike still map to different keys.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        let sanitized = sanitize_component(raw);
        if !raw.is_empty() && sanitized == raw && sanitized.len() <= MAX_KEY_LEN {
            return Self { body: sanitized };
        }

        let digest = Sha256::digest(raw.as_bytes());
        let digest_hex = bytes_to_hex(&digest);
        let keep = sanitized.len().min(MAX_KEY_LEN - DIGEST_SUFFIX_LEN - 1);
        Self {
            body: format!("{}-{}", &sanitized[..keep], &digest_hex[..DIGEST_SUFFIX_LEN]),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.body
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.body)
    }
}

#[derive(Debug)]
pub enum CacheError {
    Io { path: PathBuf, source: std::io::Error },
    Codec { key: String, detail: String },
    Poisoned,
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cache io error at {}: {source}", path.display()),
            Self::Codec { key, detail } => write!(f, "cache entry `{key}` is unreadable: {detail}"),
            Self::Poisoned => write!(f, "cache store lock poisoned"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Codec { .. } | Self::Poisoned => None,
        }
    }
}

/// Path-safe coordinate components of `cell` along `axes`.
///
/// Real labels are escaped with [`escape_label`]. A placeholder coordinate
/// becomes [`PLACEHOLDER_MARKER`] followed by its 1-based position; escaped
/// labels never start with the marker.
#[must_use]
pub fn coordinate_labels(axes: &[Axis], cell: &[usize]) -> Vec<String> {
    axes.iter()
        .zip(cell)
        .map(|(axis, &position)| match axis.labels.get(position) {
            Some(label) if !label.is_empty() => escape_label(label),
            _ => format!("{PLACEHOLDER_MARKER}{}", position + 1),
        })
        .collect()
}

/// Escape one label so it contains neither [`KEY_SEPARATOR`] nor path-unsafe
/// bytes. ASCII alphanumerics are kept, as is `-` anywhere but the first
/// byte; every other byte becomes `_XX` (uppercase hex).
#[must_use]
pub fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for (index, byte) in label.bytes().enumerate() {
        if byte.is_ascii_alphanumeric() || (byte == b'-' && index > 0) {
            out.push(char::from(byte));
        } else {
            let _ = std::fmt::Write::write_fmt(&mut out, format_args!("_{byte:02X}"));
        }
    }
    out
}

/// Default raw key: coordinate components joined by [`KEY_SEPARATOR`].
#[must_use]
pub fn default_cell_key(coordinates: &[String]) -> String {
    if coordinates.is_empty() {
        return SCALAR_CELL_KEY.to_owned();
    }
    coordinates.join(KEY_SEPARATOR)
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

pub fn encode_entry<T: Serialize>(key: &CacheKey, value: &T) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(value).map_err(|err| CacheError::Codec {
        key: key.to_string(),
        detail: err.to_string(),
    })
}

pub fn decode_entry<T: DeserializeOwned>(key: &CacheKey, bytes: &[u8]) -> Result<T, CacheError> {
    serde_json::from_slice(bytes).map_err(|err| CacheError::Codec {
        key: key.to_string(),
        detail: err.to_string(),
    })
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = std::fmt::Write::write_fmt(&mut out, format_args!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{
        CacheError, CacheKey, MAX_KEY_LEN, SCALAR_CELL_KEY, coordinate_labels, decode_entry,
        default_cell_key, encode_entry, escape_label, sanitize_component,
    };
    use proptest::prelude::*;
    use proptest::test_runner::{Config as ProptestConfig, TestRunner};
    use xj_core::Axis;

    #[test]
    fn coordinates_fall_back_to_positions_for_placeholders() {
        let axes = [Axis::new("X", ["a", "b"]), Axis::unlabelled("C", 4)];
        assert_eq!(coordinate_labels(&axes, &[1, 2]), vec!["b", "-3"]);
    }

    #[test]
    fn default_key_joins_escaped_labels() {
        let axes = [Axis::new("T", ["2017"]), Axis::new("H", ["hhs 1"])];
        let coords = coordinate_labels(&axes, &[0, 0]);
        assert_eq!(default_cell_key(&coords), "2017.hhs_201");
        assert_eq!(CacheKey::from_raw(&default_cell_key(&coords)).as_str(), "2017.hhs_201");
        assert_eq!(default_cell_key(&[]), SCALAR_CELL_KEY);
    }

    #[test]
    fn distinct_cells_never_share_a_default_key() {
        let key = |axes: &[Axis], cell: &[usize]| {
            CacheKey::from_raw(&default_cell_key(&coordinate_labels(axes, cell)))
        };

        let spaced = [Axis::new("S", ["a b", "a_b"])];
        assert_ne!(key(&spaced, &[0]), key(&spaced, &[1]));

        let placeholder = [Axis::new("S", ["", "1"])];
        assert_ne!(key(&placeholder, &[0]), key(&placeholder, &[1]));

        let dotted = [Axis::new("X", ["a.b", "a"]), Axis::new("Y", ["c", "b.c"])];
        assert_ne!(key(&dotted, &[0, 0]), key(&dotted, &[1, 1]));

        let hyphen = [Axis::new("S", ["", "-1"])];
        assert_ne!(key(&hyphen, &[0]), key(&hyphen, &[1]));
        assert_eq!(escape_label("2017-01"), "2017-01");
        assert_eq!(escape_label("-1"), "_2D1");
    }

    #[test]
    fn sanitised_raw_keys_gain_a_digest() {
        let plain = CacheKey::from_raw("a.1");
        assert_eq!(plain.as_str(), "a.1");

        let spaced = CacheKey::from_raw("a b");
        let underscored = CacheKey::from_raw("a_b");
        assert_eq!(underscored.as_str(), "a_b");
        assert!(spaced.as_str().starts_with("a_b-"));
        assert_ne!(spaced, underscored);

        let empty = CacheKey::from_raw("");
        assert!(empty.as_str().starts_with('-'));
        assert_eq!(empty.as_str().len(), 17);
    }

    #[test]
    fn path_unsafe_characters_are_replaced() {
        assert_eq!(sanitize_component("a/b\\c:d*e?f"), "a_b_c_d_e_f");
        assert_eq!(sanitize_component("kept-._chars"), "kept-._chars");
        assert_eq!(sanitize_component("ü"), "_");
    }

    #[test]
    fn long_keys_are_bounded_and_stay_distinct() {
        let a = "x".repeat(400);
        let b = format!("{}y", "x".repeat(399));
        let key_a = CacheKey::from_raw(&a);
        let key_b = CacheKey::from_raw(&b);
        assert_eq!(key_a.as_str().len(), MAX_KEY_LEN);
        assert_ne!(key_a, key_b);
        assert_eq!(key_a, CacheKey::from_raw(&a));
    }

    #[test]
    fn corrupt_entries_fail_to_decode() {
        let key = CacheKey::from_raw("a.1");
        let err = decode_entry::<i64>(&key, b"{not json").expect_err("garbage payload");
        assert!(matches!(err, CacheError::Codec { .. }));
        assert!(err.to_string().contains("a.1"));

        let bytes = encode_entry(&key, &42_i64).expect("encode");
        assert_eq!(decode_entry::<i64>(&key, &bytes).expect("decode"), 42);
    }

    #[test]
    fn prop_distinct_labels_give_distinct_keys() {
        let mut runner = TestRunner::new(ProptestConfig::with_cases(
            xj_test_utils::property_test_case_count(),
        ));
        runner
            .run(
                &(
                    prop::collection::vec("[ a_.\\-1~%]{0,4}", 2),
                    prop::collection::vec("[ a_.\\-1~%]{0,4}", 2),
                ),
                |(x_labels, y_labels)| {
                    let axes = [
                        Axis::new("X", x_labels.clone()),
                        Axis::new("Y", y_labels.clone()),
                    ];
                    // Identity of a coordinate: its label, or its position when unlabelled.
                    let identity = |labels: &[String], at: usize| {
                        if labels[at].is_empty() {
                            format!("#{at}")
                        } else {
                            labels[at].clone()
                        }
                    };
                    let mut seen = std::collections::BTreeMap::new();
                    for i in 0..2 {
                        for j in 0..2 {
                            let coords = coordinate_labels(&axes, &[i, j]);
                            let key = CacheKey::from_raw(&default_cell_key(&coords));
                            let cell = (identity(&x_labels, i), identity(&y_labels, j));
                            if let Some(previous) = seen.insert(key.as_str().to_owned(), cell.clone())
                            {
                                prop_assert_eq!(previous, cell);
                            }
                        }
                    }
                    Ok(())
                },
            )
            .expect("key injectivity property");
    }

    #[test]
    fn prop_keys_are_path_safe() {
        let mut runner = TestRunner::new(ProptestConfig::with_cases(
            xj_test_utils::property_test_case_count(),
        ));
        runner
            .run(&prop::collection::vec(".*", 0..5), |coords| {
                let key = CacheKey::from_raw(&default_cell_key(&coords));
                prop_assert!(!key.as_str().is_empty());
                prop_assert!(key.as_str().len() <= MAX_KEY_LEN);
                prop_assert!(
                    key.as_str()
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
                );
                Ok(())
            })
            .expect("key property should hold");
    }
}
