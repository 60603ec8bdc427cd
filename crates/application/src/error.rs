use domain::{DomainError, RepositoryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("validation failed: {0}")]
    Validation(#[from] DomainError),
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl ApplicationError {
    pub fn persistence(message: impl Into<String>) -> Self {
        ApplicationError::Persistence(message.into())
    }

    /// 回报给客户端 `error` 事件时使用的范围
    pub fn scope(&self) -> ErrorScope {
        match self {
            ApplicationError::Authentication(_) => ErrorScope::Auth,
            ApplicationError::Validation(_) => ErrorScope::Validation,
            ApplicationError::Persistence(_) => ErrorScope::Persistence,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

/// `error` 事件的范围字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorScope {
    Validation,
    Persistence,
    Auth,
}
