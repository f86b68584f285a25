use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolyError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },
}

impl PolyError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }
}

pub type PolyResult<T> = Result<T, PolyError>;

impl From<sea_orm::DbErr> for PolyError {
    fn from(value: sea_orm::DbErr) -> Self {
        PolyError::storage(value.to_string())
    }
}

impl From<serde_json::Error> for PolyError {
    fn from(value: serde_json::Error) -> Self {
        PolyError::storage(format!("malformed poly json: {value}"))
    }
}
