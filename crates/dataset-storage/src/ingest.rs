use std::fs;
use std::path::Path;

use uuid::Uuid;

use crate::config::StoreConfig;
use crate::content::{ContentOptions, ContentStore};
use crate::csv_import::{import_csv_to_frame, CsvOptions};
use crate::dataset::Dataset;
use crate::error::{DatasetError, Result};
use crate::relation::Schema;
use crate::storage::Storage;
use crate::types::{NewUpload, UploadRecord};

pub const CSV_MIME_TYPE: &str = "text/csv";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Raw bytes of an uploaded file.
#[derive(Debug, Clone, Copy)]
pub struct UploadSource<'a> {
    pub file_name: &'a str,
    pub bytes: &'a [u8],
    pub category: Option<&'a str>,
}

/// Best-effort content type: `.csv` names holding text are CSV.
pub fn detect_mime_type(file_name: &str, bytes: &[u8]) -> &'static str {
    let is_csv_name = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv_name && !bytes.contains(&0) {
        CSV_MIME_TYPE
    } else {
        FALLBACK_MIME_TYPE
    }
}

/// Store an uploaded CSV: raw bytes on disk, an upload row, and a saved dataset.
///
/// Input is parsed and its headers validated before anything is written. If the dataset
/// save fails, the upload row and file stay behind and the error is returned.
pub fn ingest(
    storage: &Storage,
    config: &StoreConfig,
    source: UploadSource<'_>,
) -> Result<(UploadRecord, Dataset)> {
    let file_name = Path::new(source.file_name.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DatasetError::Validation("No file selected".into()))?;

    let mime_type = detect_mime_type(file_name, source.bytes);
    if mime_type != CSV_MIME_TYPE {
        return Err(DatasetError::Validation(format!(
            "Not an accepted mimetype: {mime_type}"
        )));
    }

    let frame = import_csv_to_frame(source.bytes, &CsvOptions::default())?;
    Schema::for_content(frame.columns())?;

    fs::create_dir_all(&config.storage_dir)?;
    let stored_path = config
        .storage_dir
        .join(format!("{}-{file_name}", Uuid::new_v4().simple()));
    fs::write(&stored_path, source.bytes)?;

    let upload = storage.create_upload(&NewUpload {
        name: file_name.to_string(),
        storage_path: stored_path.to_string_lossy().into_owned(),
        file_size_bytes: i64::try_from(source.bytes.len()).unwrap_or(i64::MAX),
        mime_type: Some(mime_type.to_string()),
    })?;

    let store = ContentStore::new(storage.clone(), ContentOptions::from(config))?;
    let mut dataset = Dataset::create(store, upload.id, file_name, frame)?;
    dataset.set_category(source.category.map(str::to_string));
    dataset.save()?;

    log::info!(
        "ingested {file_name}: upload {} dataset {} ({} rows)",
        upload.id,
        dataset.id(),
        dataset.record().record_count
    );
    Ok((upload, dataset))
}
