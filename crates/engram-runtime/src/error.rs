use std::fmt;

/// Result type for engram-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// Engine layer error
    Engine(engram_engine::Error),

    /// Store layer error
    Index(engram_index::Error),

    /// Transcript parsing error
    Provider(engram_providers::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Malformed request (bad filter, empty query, unknown capability)
    InvalidInput(String),

    /// The embedding backend could not be acquired
    EmbedderUnavailable(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Engine(err) => write!(f, "Engine error: {}", err),
            Error::Index(err) => write!(f, "Index error: {}", err),
            Error::Provider(err) => write!(f, "Provider error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::EmbedderUnavailable(msg) => write!(f, "Embedder unavailable: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Engine(err) => Some(err),
            Error::Index(err) => Some(err),
            Error::Provider(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Config(_) | Error::InvalidInput(_) | Error::EmbedderUnavailable(_) => None,
        }
    }
}

impl From<engram_engine::Error> for Error {
    fn from(err: engram_engine::Error) -> Self {
        Error::Engine(err)
    }
}

impl From<engram_index::Error> for Error {
    fn from(err: engram_index::Error) -> Self {
        Error::Index(err)
    }
}

impl From<engram_providers::Error> for Error {
    fn from(err: engram_providers::Error) -> Self {
        Error::Provider(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
