use dataset_storage::{
    detect_mime_type, ingest, DatasetError, Storage, StoreConfig, UploadSource,
};
use pretty_assertions::assert_eq;
use std::fs;

const PEOPLE: &[u8] = b"name,age\nAlice,30\nBob,25\nCara,41\n";

fn setup() -> (tempfile::TempDir, StoreConfig, Storage) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig {
        storage_dir: dir.path().join("processed"),
        ..StoreConfig::default()
    };
    let storage = Storage::open_with_config(&config).expect("open storage");
    (dir, config, storage)
}

#[test]
fn csv_upload_is_stored_and_materialized() {
    let (_dir, config, storage) = setup();
    let (upload, mut dataset) = ingest(
        &storage,
        &config,
        UploadSource {
            file_name: "employees.csv",
            bytes: PEOPLE,
            category: Some("employee"),
        },
    )
    .expect("ingest");

    assert_eq!(upload.name, "employees.csv");
    assert_eq!(upload.mime_type.as_deref(), Some("text/csv"));
    assert_eq!(upload.file_size_bytes, PEOPLE.len() as i64);
    assert_eq!(fs::read(&upload.storage_path).expect("stored file"), PEOPLE);
    assert!(upload.storage_path.ends_with("-employees.csv"));

    assert_eq!(dataset.upload_file_id(), upload.id);
    assert_eq!(dataset.category(), Some("employee"));
    assert!(!dataset.is_dirty());
    assert_eq!(dataset.content().unwrap().cell(1, "name"), Some("Bob"));

    let records = storage.list_dataset_records(upload.id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content_headers, vec!["name", "age"]);
    assert_eq!(records[0].record_count, 3);
}

#[test]
fn missing_file_name_is_rejected() {
    let (_dir, config, storage) = setup();
    for name in ["", "   "] {
        let err = ingest(
            &storage,
            &config,
            UploadSource {
                file_name: name,
                bytes: PEOPLE,
                category: None,
            },
        )
        .unwrap_err();
        assert!(matches!(&err, DatasetError::Validation(msg) if msg == "No file selected"));
    }
    assert!(storage.list_uploads().unwrap().is_empty());
}

#[test]
fn non_csv_upload_is_rejected_before_anything_is_written() {
    let (_dir, config, storage) = setup();
    let err = ingest(
        &storage,
        &config,
        UploadSource {
            file_name: "report.xlsx",
            bytes: b"PK\x03\x04",
            category: None,
        },
    )
    .unwrap_err();

    assert!(err.is_client_error());
    assert!(
        matches!(&err, DatasetError::Validation(msg) if msg == "Not an accepted mimetype: application/octet-stream")
    );
    assert!(storage.list_uploads().unwrap().is_empty());
    assert!(!config.storage_dir.exists());
}

#[test]
fn empty_csv_is_a_client_error() {
    let (_dir, config, storage) = setup();
    let err = ingest(
        &storage,
        &config,
        UploadSource {
            file_name: "empty.csv",
            bytes: b"",
            category: None,
        },
    )
    .unwrap_err();
    assert!(matches!(err, DatasetError::Csv(_)));
    assert!(err.is_client_error());
    assert!(storage.list_uploads().unwrap().is_empty());
}

#[test]
fn invalid_headers_are_rejected_before_anything_is_written() {
    let (_dir, config, storage) = setup();
    let reject = |bytes: &[u8]| {
        ingest(
            &storage,
            &config,
            UploadSource {
                file_name: "bad.csv",
                bytes,
                category: None,
            },
        )
        .unwrap_err()
    };

    let err = reject(b"a,a\n1,2\n");
    assert!(matches!(err, DatasetError::Schema(_)), "{err:?}");
    // SQLite column names ignore ASCII case.
    let err = reject(b"Name,name\n1,2\n");
    assert!(matches!(err, DatasetError::Schema(_)), "{err:?}");
    assert!(err.is_client_error());
    let err = reject(b"name,__index__\n1,2\n");
    assert!(matches!(err, DatasetError::Validation(_)), "{err:?}");

    assert!(storage.list_uploads().unwrap().is_empty());
    assert!(!config.storage_dir.exists());
}

#[test]
fn mime_detection_needs_a_csv_name_and_text_bytes() {
    assert_eq!(detect_mime_type("a.csv", b"x,y\n"), "text/csv");
    assert_eq!(detect_mime_type("A.CSV", b"x,y\n"), "text/csv");
    assert_eq!(detect_mime_type("a.csv", b"x\0y"), "application/octet-stream");
    assert_eq!(detect_mime_type("a.txt", b"x,y\n"), "application/octet-stream");
    assert_eq!(detect_mime_type("csv", b"x,y\n"), "application/octet-stream");
}
