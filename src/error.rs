use thiserror::Error;

use crate::storage::StorageError;

pub type ServiceResult<T> = core::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("User not authenticated")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Storage(StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateRoadmap(_) => {
                ServiceError::AlreadyExists("Roadmap already exists. Use /update to modify.".into())
            }
            StorageError::RoadmapNotFound(_) => ServiceError::NotFound("No roadmap found".into()),
            StorageError::NodeNotFound(_) => ServiceError::NotFound("Node not found".into()),
            other => ServiceError::Storage(other),
        }
    }
}
