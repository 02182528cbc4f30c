use std::path::PathBuf;

/// Per-document analysis failures. Each one is local to a single
/// equipment's analysis and stops it before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid measurement record: {reason}")]
    InvalidMeasurementRecord { reason: String },

    #[error("insufficient data: none of {components} component(s) could be scored")]
    InsufficientData { components: usize },

    #[error("missing equipment identifier")]
    MissingIdentifier,
}

impl AnalysisError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMeasurementRecord {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed CSV in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("equipment identifier {0:?} cannot be used as a storage key")]
    InvalidKey(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read policy file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize policy: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid scoring policy: {0}")]
    Invalid(String),
}
