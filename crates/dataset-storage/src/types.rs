use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fields needed to register an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUpload {
    pub name: String,
    pub storage_path: String,
    pub file_size_bytes: i64,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub name: String,
    pub storage_path: String,
    pub file_size_bytes: i64,
    pub mime_type: Option<String>,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
}

/// Persisted summary of a dataset: its owner, shape, and header list.
///
/// The row content itself is not part of this record; it lives in the
/// dataset's backing relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: Uuid,
    pub upload_file_id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub number_of_columns: i64,
    pub record_count: i64,
    pub content_headers: Vec<String>,
    /// Populated by the database; ignored on save.
    pub created_at: Option<String>,
    /// Populated by the database; ignored on save.
    pub modified_at: Option<String>,
}
