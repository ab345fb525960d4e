use thiserror::Error;

/// Failure reported by a fingerprint registry backend.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RegistryError::Backend(Box::new(err))
    }
}

#[derive(Error, Debug)]
pub enum MonitorError {
    /// A line carried a login or logout marker but did not match the full pattern.
    #[error("invalid event: {line}")]
    InvalidEvent { line: String },

    #[error("invalid authorized key: {reason}")]
    InvalidKey { reason: String },

    #[error("no users in the file")]
    NoUsers,

    #[error("missing fingerprint on line {line_number}")]
    MissingFingerprint { line_number: usize },

    #[error("duplicate fingerprint: {0}")]
    DuplicateFingerprint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Journal error: {0}")]
    Journal(String),
}

impl MonitorError {
    pub fn invalid_event(line: &str) -> Self {
        MonitorError::InvalidEvent {
            line: line.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
