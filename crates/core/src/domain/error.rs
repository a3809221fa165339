// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid action: {0:?}")]
    InvalidAction(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
