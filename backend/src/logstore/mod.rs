pub mod dynamodb_backend;
pub mod models;
pub mod postgres_backend;
pub mod store;

use async_trait::async_trait;
use shared::VisionLogRecord;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Write did not finish within {0:?}")]
    Timeout(Duration),
}

/// One persistence target for vision log records.
#[async_trait]
pub trait LogBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn append(&self, record: &VisionLogRecord) -> Result<(), StoreError>;
}
