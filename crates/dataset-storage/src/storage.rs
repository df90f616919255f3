use crate::config::StoreConfig;
use crate::relation::SchemaError;
use crate::schema;
use crate::types::{DatasetRecord, NewUpload, UploadRecord};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("upload not found: {0}")]
    UploadNotFound(Uuid),
    #[error("dataset not found: {0}")]
    DatasetNotFound(Uuid),
    #[error("content relation not found: {0}")]
    RelationNotFound(String),
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Shared handle to the SQLite database holding metadata and content tables.
///
/// Cloning is cheap; all clones talk to the same connection. Every operation
/// holds the connection for one statement or one transaction only.
#[derive(Debug, Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_uri(uri: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(uri, flags)?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open the database named by `config.database_path` (in-memory when unset).
    pub fn open_with_config(config: &StoreConfig) -> Result<Self> {
        let conn = match &config.database_path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        Self::from_connection(conn, Duration::from_millis(config.busy_timeout_ms))
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the connection. A panic while holding the lock leaves SQLite
    /// itself consistent, so a poisoned mutex is recovered rather than surfaced.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn create_upload(&self, upload: &NewUpload) -> Result<UploadRecord> {
        let id = Uuid::new_v4();
        {
            let conn = self.lock();
            conn.execute(
                r#"
                INSERT INTO upload_files (id, file_size_bytes, mime_type, name, storage_path)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    id.to_string(),
                    upload.file_size_bytes,
                    upload.mime_type.as_deref(),
                    &upload.name,
                    &upload.storage_path
                ],
            )?;
        }
        self.get_upload(id)
    }

    pub fn get_upload(&self, id: Uuid) -> Result<UploadRecord> {
        let conn = self.lock();
        let row = conn
            .query_row(
                r#"
                SELECT id, name, storage_path, file_size_bytes, mime_type, created_at, modified_at
                FROM upload_files
                WHERE id = ?1
                "#,
                params![id.to_string()],
                upload_from_row,
            )
            .optional()?;

        row.ok_or(StorageError::UploadNotFound(id))
    }

    pub fn list_uploads(&self) -> Result<Vec<UploadRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, storage_path, file_size_bytes, mime_type, created_at, modified_at
            FROM upload_files
            ORDER BY created_at, id
            "#,
        )?;
        let rows = stmt.query_map([], upload_from_row)?;

        let mut uploads = Vec::new();
        for upload in rows {
            uploads.push(upload?);
        }
        Ok(uploads)
    }

    /// Delete an upload together with the metadata rows of its datasets.
    ///
    /// Backing content relations are not touched; drop them through
    /// `Dataset::delete` first.
    pub fn delete_upload(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let outcome = delete_upload_tx(&tx, id);
        finish(tx, outcome)
    }

    /// Insert or update a dataset's metadata row.
    ///
    /// Runs in its own transaction. On failure the transaction is rolled back
    /// before the error is returned, so a retry starts from a clean slate and
    /// never leaves a duplicate row behind.
    pub fn save_dataset_record(&self, record: &DatasetRecord) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let outcome = upsert_dataset_record_tx(&tx, record);
        finish(tx, outcome)
    }

    pub fn get_dataset_record(&self, id: Uuid) -> Result<DatasetRecord> {
        let conn = self.lock();
        let row = conn
            .query_row(
                r#"
                SELECT id, upload_file_id, name, category, number_of_columns, record_count,
                       content_headers, created_at, modified_at
                FROM file_contents
                WHERE id = ?1
                "#,
                params![id.to_string()],
                dataset_from_row,
            )
            .optional()?;

        row.ok_or(StorageError::DatasetNotFound(id))
    }

    pub fn list_dataset_records(&self, upload_file_id: Uuid) -> Result<Vec<DatasetRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, upload_file_id, name, category, number_of_columns, record_count,
                   content_headers, created_at, modified_at
            FROM file_contents
            WHERE upload_file_id = ?1
            ORDER BY created_at, id
            "#,
        )?;
        let rows = stmt.query_map(params![upload_file_id.to_string()], dataset_from_row)?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    pub fn delete_dataset_record(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let outcome = tx
            .execute("DELETE FROM file_contents WHERE id = ?1", params![id.to_string()])
            .map(|n| n > 0)
            .map_err(StorageError::from);
        finish(tx, outcome)
    }
}

/// Commit on success, roll back explicitly on failure.
pub(crate) fn finish<T>(tx: Transaction<'_>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                log::warn!("rollback failed after error ({err}): {rollback_err}");
            }
            Err(err)
        }
    }
}

fn delete_upload_tx(tx: &Transaction<'_>, id: Uuid) -> Result<bool> {
    tx.execute(
        "DELETE FROM file_contents WHERE upload_file_id = ?1",
        params![id.to_string()],
    )?;
    let removed = tx.execute("DELETE FROM upload_files WHERE id = ?1", params![id.to_string()])?;
    Ok(removed > 0)
}

fn upsert_dataset_record_tx(tx: &Transaction<'_>, record: &DatasetRecord) -> Result<()> {
    let headers = serde_json::to_value(&record.content_headers)?;
    tx.execute(
        r#"
        INSERT INTO file_contents (
          id, upload_file_id, category, name, number_of_columns, record_count, content_headers
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(id) DO UPDATE SET
          upload_file_id = excluded.upload_file_id,
          category = excluded.category,
          name = excluded.name,
          number_of_columns = excluded.number_of_columns,
          record_count = excluded.record_count,
          content_headers = excluded.content_headers,
          modified_at = CURRENT_TIMESTAMP
        "#,
        params![
            record.id.to_string(),
            record.upload_file_id.to_string(),
            record.category.as_deref(),
            &record.name,
            record.number_of_columns,
            record.record_count,
            headers
        ],
    )?;
    Ok(())
}

fn parse_uuid(raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|_| rusqlite::Error::InvalidQuery)
}

fn upload_from_row(r: &Row<'_>) -> rusqlite::Result<UploadRecord> {
    Ok(UploadRecord {
        id: parse_uuid(r.get(0)?)?,
        name: r.get(1)?,
        storage_path: r.get(2)?,
        file_size_bytes: r.get(3)?,
        mime_type: r.get(4)?,
        created_at: r.get(5)?,
        modified_at: r.get(6)?,
    })
}

fn dataset_from_row(r: &Row<'_>) -> rusqlite::Result<DatasetRecord> {
    let id = parse_uuid(r.get(0)?)?;
    let headers: String = r.get(6)?;
    // A corrupted header column reads back empty instead of failing the row.
    let content_headers = match serde_json::from_str(&headers) {
        Ok(headers) => headers,
        Err(err) => {
            log::warn!("dataset {id} has unreadable content_headers ({err}); reading as empty");
            Vec::new()
        }
    };
    Ok(DatasetRecord {
        id,
        upload_file_id: parse_uuid(r.get(1)?)?,
        name: r.get(2)?,
        category: r.get(3)?,
        number_of_columns: r.get(4)?,
        record_count: r.get(5)?,
        content_headers,
        created_at: r.get(7)?,
        modified_at: r.get(8)?,
    })
}
