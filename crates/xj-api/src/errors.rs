use xj_cache::CacheError;
use xj_runtime::RunnerError;

#[derive(Debug)]
pub enum ConfigError {
    UnknownKey {
        key: String,
    },
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
    Runner(RunnerError),
    /// The configured cache directory could not be opened.
    Cache(CacheError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKey { key } => write!(f, "unknown map_join option `{key}`"),
            Self::InvalidValue {
                key,
                value,
                expected,
            } => write!(
                f,
                "invalid value `{value}` for option `{key}` (expected {expected})"
            ),
            Self::Runner(err) => write!(f, "runner configuration error: {err}"),
            Self::Cache(err) => write!(f, "cache configuration error: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Runner(err) => Some(err),
            Self::Cache(err) => Some(err),
            Self::UnknownKey { .. } | Self::InvalidValue { .. } => None,
        }
    }
}

impl From<RunnerError> for ConfigError {
    fn from(value: RunnerError) -> Self {
        Self::Runner(value)
    }
}

impl From<CacheError> for ConfigError {
    fn from(value: CacheError) -> Self {
        Self::Cache(value)
    }
}
