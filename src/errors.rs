use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION_FAILED: {0}")]
    Validation(String),
    #[error("STORE_FAILURE: {0}")]
    Store(String),
    #[error("AUTH_REQUIRED: {0}")]
    Auth(String),
    #[error("POLICY_DENIED: {0}")]
    Policy(String),
    #[error("GATEWAY_FAILURE: {0}")]
    Gateway(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Message without the code prefix, suitable for showing to a person.
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(message)
            | Self::Store(message)
            | Self::Auth(message)
            | Self::Policy(message)
            | Self::Gateway(message)
            | Self::NotFound(message)
            | Self::Internal(message) => message,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Store(_) => "STORE_FAILURE",
            Self::Auth(_) => "AUTH_REQUIRED",
            Self::Policy(_) => "POLICY_DENIED",
            Self::Gateway(_) => "GATEWAY_FAILURE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Store(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Gateway("SMS gateway timed out".to_string());
        }
        Self::Gateway(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
