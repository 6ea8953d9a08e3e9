use thiserror::Error;

/// Failures surfaced by the Beem API client, the stores and entry setup.
#[derive(Error, Debug)]
pub enum BeemError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("No password on file for this account")]
    MissingPassword,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Battery {0} not found")]
    DeviceNotFound(i64),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Beem API returned error status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("BeemBox data unavailable: {0}")]
    PartialDataUnavailable(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Entry not ready: {0}")]
    NotReady(#[from] UpdateFailed),
}

pub type BeemResult<T> = Result<T, BeemError>;

/// The single failure signal of a refresh cycle. Carries a human readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct UpdateFailed(pub String);

impl UpdateFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<BeemError> for UpdateFailed {
    fn from(err: BeemError) -> Self {
        Self(err.to_string())
    }
}
