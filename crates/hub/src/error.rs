use std::path::PathBuf;

/// Failures surfaced by the station registry, the history store and the
/// collector's fetch path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection refused, timeout, or a non-2xx status from the node.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The node answered, but not with `{"temp": <number>, "hum": <number>}`.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The selected station has an empty address.
    #[error("station '{0}' has no address configured")]
    UnconfiguredStation(String),

    /// The name is not part of the configured station list.
    #[error("unknown station '{0}'")]
    UnknownStation(String),

    /// A backing file could not be read or written.
    #[error("storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
