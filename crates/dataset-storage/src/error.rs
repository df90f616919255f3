use thiserror::Error;
use uuid::Uuid;

use crate::csv_import::CsvImportError;
use crate::frame::FrameError;
use crate::relation::SchemaError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum DatasetError {
    /// Caller input is malformed; nothing was attempted.
    #[error("validation error: {0}")]
    Validation(String),
    /// Column definitions cannot form a backing relation.
    #[error("schema error: {0}")]
    Schema(SchemaError),
    /// The metadata row could not be written. The transaction was rolled back.
    #[error("failed to write metadata to 'file_contents' table; upload_file_id: {upload_file_id}")]
    MetadataPersist {
        upload_file_id: Uuid,
        #[source]
        source: StorageError,
    },
    /// The metadata row is committed but the backing relation is stale or
    /// missing. Calling `save` again retries the content load.
    #[error("failed to persist content to database for dataset {dataset_id}")]
    ContentPersist {
        dataset_id: Uuid,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Csv(#[from] CsvImportError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatasetError {
    /// Whether the error stems from caller input (client error) rather than
    /// from the store (server error).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DatasetError::Validation(_) | DatasetError::Schema(_) | DatasetError::Csv(_)
        )
    }
}

impl From<SchemaError> for DatasetError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::ReservedColumn(_) => DatasetError::Validation(err.to_string()),
            other => DatasetError::Schema(other),
        }
    }
}

impl From<FrameError> for DatasetError {
    fn from(err: FrameError) -> Self {
        DatasetError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DatasetError>;
