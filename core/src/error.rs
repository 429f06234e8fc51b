use thiserror::Error;

/// Failure categories of a training run. All of them end the run except
/// [`TrainError::Logging`], which callers downgrade to a warning.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("dataset unavailable: {0}")]
    DataUnavailable(String),

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("metrics logging failed: {0}")]
    Logging(String),
}

impl TrainError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::DataUnavailable(message.into())
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical(message.into())
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging(message.into())
    }
}

pub type TrainResult<T> = std::result::Result<T, TrainError>;
