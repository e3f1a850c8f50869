use thiserror::Error;

/// Failure taxonomy shared by every service.
///
/// `NotFound` covers both "no such record" and "record owned by somebody
/// else"; callers must not be able to tell the two apart.
#[derive(Debug, Error, PartialEq)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn todo_not_found() -> Self {
        ServiceError::NotFound("Todo not found.".to_string())
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ServiceError::InternalError(_))
    }
}

impl From<diesel::result::Error> for ServiceError {
    fn from(err: diesel::result::Error) -> Self {
        ServiceError::InternalError(format!("DB error: {}", err))
    }
}

impl From<diesel::r2d2::PoolError> for ServiceError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        ServiceError::InternalError(format!("DB Connection error: {}", err))
    }
}

impl From<bcrypt::BcryptError> for ServiceError {
    fn from(err: bcrypt::BcryptError) -> Self {
        ServiceError::InternalError(format!("Password hashing error: {}", err))
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::InternalError(format!("File system error: {}", err))
    }
}
