use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("automation engine unavailable: {0}")]
    Connection(String),
    #[error("login failed: {0}")]
    Login(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("grade extraction failed: {0}")]
    Extraction(String),
    #[error("snapshot persistence failed: {0}")]
    Persistence(String),
    #[error("channel {channel} failed: {message}")]
    Channel { channel: String, message: String },
}

impl MonitorError {
    pub fn connection(error: impl std::fmt::Display) -> Self {
        Self::Connection(error.to_string())
    }

    pub fn navigation(error: impl std::fmt::Display) -> Self {
        Self::Navigation(error.to_string())
    }

    pub fn extraction(error: impl std::fmt::Display) -> Self {
        Self::Extraction(error.to_string())
    }

    pub fn persistence(error: impl std::fmt::Display) -> Self {
        Self::Persistence(error.to_string())
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
