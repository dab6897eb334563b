use std::fmt;

/// Result type for engram-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the engine layer
#[derive(Debug)]
pub enum Error {
    /// Store layer error
    Index(engram_index::Error),

    /// Malformed query or filter
    InvalidInput(String),

    /// Unknown chunk, session or project
    NotFound(String),

    /// Not enough data to run (benchmark below minimum corpus size)
    ThresholdNotMet(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Index(err) => write!(f, "Index error: {}", err),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::ThresholdNotMet(msg) => write!(f, "Threshold not met: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Index(err) => Some(err),
            Error::InvalidInput(_) | Error::NotFound(_) | Error::ThresholdNotMet(_) => None,
        }
    }
}

impl From<engram_index::Error> for Error {
    fn from(err: engram_index::Error) -> Self {
        Error::Index(err)
    }
}
