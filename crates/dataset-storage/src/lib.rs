//! SQLite-backed storage for uploaded CSV datasets.
//!
//! Each dataset has a metadata row (`file_contents`) and a dynamically created
//! backing relation named after its id that holds the rows. The crate exposes:
//! - Metadata tables for uploads and datasets
//! - Deterministic per-row record ids (UUIDv5 namespaced by dataset id)
//! - Reconciliation of in-memory columns against the live backing relation
//! - Chunked bulk load and chunked streaming read-back
//! - A dataset entity that tracks unsynced changes and resyncs lazily
//! - CSV import and an ingest pipeline for raw uploads

pub mod config;
pub mod content;
mod csv_import;
pub mod dataset;
mod error;
mod frame;
pub mod identity;
pub mod ingest;
pub mod relation;
mod schema;
pub mod storage;
mod types;

pub use config::{ConfigError, StoreConfig};
pub use content::{ContentChunks, ContentOptions, ContentStore, MaterializeReport, RowChunk};
pub use csv_import::{import_csv_to_frame, CsvImportError, CsvOptions, CsvTextEncoding};
pub use dataset::{Dataset, ReadOptions, SaveOutcome};
pub use error::DatasetError;
pub use frame::{Frame, FrameError, RowIndex, Value};
pub use identity::{assign_record_ids, record_id};
pub use ingest::{detect_mime_type, ingest, UploadSource};
pub use relation::{reconcile, ColumnDef, ColumnKind, Reconcile, Schema, SchemaError};
pub use storage::{Storage, StorageError};
pub use types::{DatasetRecord, NewUpload, UploadRecord};

/// Raw cell value as read back from SQLite.
pub use rusqlite::types::Value as SqlValue;
