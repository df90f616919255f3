use dataset_storage::{
    record_id, ContentOptions, ContentStore, Dataset, DatasetError, Frame, NewUpload, ReadOptions,
    Reconcile, RowIndex, Storage, StorageError, Value,
};
use pretty_assertions::assert_eq;
use uuid::Uuid;

struct Fixture {
    storage: Storage,
    store: ContentStore,
    upload_id: Uuid,
}

fn fixture() -> Fixture {
    let storage = Storage::open_in_memory().expect("open storage");
    let upload = storage
        .create_upload(&NewUpload {
            name: "people.csv".into(),
            storage_path: "data/processed/people.csv".into(),
            file_size_bytes: 42,
            mime_type: Some("text/csv".into()),
        })
        .expect("create upload");
    let store = ContentStore::new(storage.clone(), ContentOptions::default()).expect("store");
    Fixture {
        storage,
        store,
        upload_id: upload.id,
    }
}

fn people() -> Frame {
    Frame::from_values(
        vec!["name".into(), "age".into()],
        vec![
            vec!["Alice".into(), Value::Integer(30)],
            vec!["Bob".into(), Value::Integer(25)],
            vec!["Cara".into(), Value::Integer(41)],
        ],
    )
    .expect("frame")
}

fn ids_for(dataset_id: Uuid, n: usize) -> Vec<String> {
    (0..n).map(|i| record_id(dataset_id, i).to_string()).collect()
}

#[test]
fn create_and_save_materializes_people() {
    let fx = fixture();
    let id = Uuid::new_v4();
    let mut dataset =
        Dataset::create_with_id(fx.store.clone(), id, fx.upload_id, "people.csv", people())
            .expect("create dataset");

    assert!(dataset.is_dirty());
    assert_eq!(dataset.record().record_count, 3);
    assert_eq!(dataset.record().number_of_columns, 2);
    assert_eq!(dataset.record().content_headers, vec!["name", "age"]);
    assert_eq!(dataset.content().unwrap().record_ids().unwrap(), ids_for(id, 3));

    let outcome = dataset.save().expect("save");
    let report = outcome.content.expect("content was resynced");
    assert_eq!(report.decision, Reconcile::Create);
    assert_eq!(report.rows_written, 3);
    assert!(!dataset.is_dirty());

    assert_eq!(
        fx.store.columns(&dataset.relation_name()).unwrap().unwrap(),
        vec!["__index__", "__record_ids__", "name", "age", "__metadata__"]
    );

    let saved = fx.storage.get_dataset_record(id).expect("metadata row");
    assert_eq!(saved.record_count, 3);
    assert_eq!(saved.content_headers, vec!["name", "age"]);
    assert_eq!(saved.upload_file_id, fx.upload_id);

    let count = dataset
        .exec_sql_read("SELECT COUNT(*) AS n FROM {table}", ReadOptions::default())
        .unwrap();
    assert_eq!(count.cell(0, "n"), Some("3"));
}

#[test]
fn loaded_dataset_reads_back_the_saved_content() {
    let fx = fixture();
    let mut original =
        Dataset::create(fx.store.clone(), fx.upload_id, "people.csv", people()).unwrap();
    original.save().unwrap();
    let expected = original.content().unwrap().clone();

    let mut loaded = Dataset::load(fx.store.clone(), original.id()).expect("load");
    assert!(!loaded.is_loaded());
    assert!(!loaded.is_dirty());
    assert_eq!(loaded.name(), "people.csv");

    let content = loaded.content().expect("read back");
    assert_eq!(content, &expected);
    assert_eq!(content.get(&record_id(original.id(), 1).to_string(), "name"), Some("Bob"));
    assert_eq!(content.cell(2, "age"), Some("41"));
    assert!(loaded.is_loaded());
}

#[test]
fn read_options_control_reserved_columns() {
    let fx = fixture();
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", people()).unwrap();
    dataset.save().unwrap();

    let with_metadata = dataset
        .content_with(ReadOptions {
            index_by_record_ids: true,
            include_metadata: true,
        })
        .unwrap();
    assert_eq!(with_metadata.columns(), ["name", "age", "__metadata__"]);
    assert_eq!(with_metadata.cell(0, "__metadata__"), Some("{}"));

    let physical = dataset
        .content_with(ReadOptions {
            index_by_record_ids: false,
            include_metadata: false,
        })
        .unwrap();
    assert_eq!(physical.columns(), ["__record_ids__", "name", "age"]);
    assert_eq!(physical.index(), &RowIndex::Physical(vec![0, 1, 2]));
    assert_eq!(
        physical.column("__record_ids__").unwrap(),
        ids_for(dataset.id(), 3)
    );
}

#[test]
fn saving_a_clean_dataset_only_touches_metadata() {
    let fx = fixture();
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", people()).unwrap();
    dataset.save().unwrap();

    let changed = dataset
        .exec_sql_write("UPDATE {table} SET age = '31' WHERE name = 'Alice'")
        .unwrap();
    assert_eq!(changed, 1);
    assert!(!dataset.is_loaded());

    dataset.set_category(Some("employee".into()));
    let outcome = dataset.save().unwrap();
    assert_eq!(outcome.content, None);

    // The relation was not rewritten from a stale copy.
    assert_eq!(dataset.content().unwrap().cell(0, "age"), Some("31"));
    assert_eq!(
        fx.storage.get_dataset_record(dataset.id()).unwrap().category.as_deref(),
        Some("employee")
    );
    assert_eq!(fx.storage.list_dataset_records(fx.upload_id).unwrap().len(), 1);
}

#[test]
fn saving_after_write_fragments_records_the_relation_shape() {
    let fx = fixture();
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", people()).unwrap();
    dataset.save().unwrap();

    let changed = dataset
        .exec_sql_write("DELETE FROM {table} WHERE name = 'Alice'")
        .unwrap();
    assert_eq!(changed, 1);
    dataset.save().unwrap();
    let record = fx.storage.get_dataset_record(dataset.id()).unwrap();
    assert_eq!(record.record_count, 2);
    assert_eq!(record.content_headers, vec!["name", "age"]);

    dataset
        .exec_sql_write("ALTER TABLE {table} ADD COLUMN city TEXT")
        .unwrap();
    dataset.save().unwrap();
    let record = fx.storage.get_dataset_record(dataset.id()).unwrap();
    assert_eq!(record.content_headers, vec!["name", "age", "city"]);
    assert_eq!(record.number_of_columns, 3);
    assert_eq!(record.record_count, 2);
}

#[test]
fn update_content_writes_by_record_id_and_reuses_the_relation() {
    let fx = fixture();
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", people()).unwrap();
    dataset.save().unwrap();
    let bob = record_id(dataset.id(), 1).to_string();

    let patch = Frame::new(
        vec!["__record_ids__".into(), "age".into(), "unknown".into()],
        vec![
            vec![bob.clone(), "26".into(), "ignored".into()],
            vec![Uuid::new_v4().to_string(), "99".into(), "ignored".into()],
        ],
    )
    .unwrap();
    let written = dataset.update_content(patch).expect("update");
    assert_eq!(written, 1);
    assert!(dataset.is_dirty());

    let report = dataset.save().unwrap().content.expect("resynced");
    assert_eq!(report.decision, Reconcile::Reuse);

    let mut reloaded = Dataset::load(fx.store.clone(), dataset.id()).unwrap();
    let content = reloaded.content().unwrap();
    assert_eq!(content.get(&bob, "age"), Some("26"));
    assert_eq!(content.columns(), ["name", "age"]);
    assert_eq!(content.len(), 3);

    let physical = reloaded
        .content_with(ReadOptions {
            index_by_record_ids: false,
            include_metadata: false,
        })
        .unwrap();
    assert_eq!(physical.index(), &RowIndex::Physical(vec![0, 1, 2]));
}

#[test]
fn update_content_accepts_a_record_id_index() {
    let fx = fixture();
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", people()).unwrap();
    let cara = record_id(dataset.id(), 2).to_string();

    let patch = Frame::new(vec!["name".into()], vec![vec!["Carla".into()]])
        .unwrap()
        .with_index(RowIndex::RecordIds(vec![cara.clone()]))
        .unwrap();
    assert_eq!(dataset.update_content(patch).unwrap(), 1);
    assert_eq!(dataset.content().unwrap().get(&cara, "name"), Some("Carla"));
}

#[test]
fn update_content_without_record_ids_is_rejected() {
    let fx = fixture();
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", people()).unwrap();
    dataset.save().unwrap();

    let patch = Frame::new(vec!["age".into()], vec![vec!["1".into()]]).unwrap();
    let err = dataset.update_content(patch).unwrap_err();
    assert!(err.is_client_error());
    assert!(
        matches!(&err, DatasetError::Validation(msg) if msg == "expected other frame to have record ids, none found")
    );
    assert!(!dataset.is_dirty());
}

#[test]
fn replacing_columns_recreates_the_relation() {
    let fx = fixture();
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", people()).unwrap();
    dataset.save().unwrap();

    let cities = Frame::new(
        vec!["name".into(), "city".into()],
        vec![vec!["Alice".into(), "Oslo".into()]],
    )
    .unwrap();
    dataset.replace_content(cities).unwrap();
    assert_eq!(dataset.record().content_headers, vec!["name", "city"]);
    assert_eq!(dataset.record().record_count, 1);

    let report = dataset.save().unwrap().content.expect("resynced");
    assert_eq!(report.decision, Reconcile::Recreate);
    assert_eq!(
        fx.store.columns(&dataset.relation_name()).unwrap().unwrap(),
        vec!["__index__", "__record_ids__", "name", "city", "__metadata__"]
    );
    assert_eq!(fx.storage.get_dataset_record(dataset.id()).unwrap().record_count, 1);
}

#[test]
fn reading_sql_resyncs_pending_content_first() {
    let fx = fixture();
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", people()).unwrap();
    assert!(!fx.store.exists(&dataset.relation_name()).unwrap());

    let names = dataset
        .exec_sql_read(
            "SELECT name FROM {table} ORDER BY \"__index__\"",
            ReadOptions::default(),
        )
        .unwrap();
    assert_eq!(names.column("name").unwrap(), vec!["Alice", "Bob", "Cara"]);
    assert_eq!(names.index(), &RowIndex::Positional);
    assert!(!dataset.is_dirty());
}

#[test]
fn reserved_column_names_are_validation_errors() {
    let fx = fixture();
    let frame = Frame::new(
        vec!["name".into(), "__metadata__".into()],
        vec![vec!["Alice".into(), "{}".into()]],
    )
    .unwrap();
    let err = Dataset::create(fx.store.clone(), fx.upload_id, "p", frame).unwrap_err();
    assert!(matches!(err, DatasetError::Validation(_)));
    assert!(err.is_client_error());
}

#[test]
fn duplicate_columns_are_schema_errors() {
    let fx = fixture();
    let frame = Frame::new(vec!["a".into(), "a".into()], vec![]).unwrap();
    let err = Dataset::create(fx.store.clone(), fx.upload_id, "p", frame).unwrap_err();
    assert!(matches!(err, DatasetError::Schema(_)));
}

#[test]
fn unknown_upload_fails_metadata_persist_and_skips_content() {
    let fx = fixture();
    let orphan = Uuid::new_v4();
    let mut dataset = Dataset::create(fx.store.clone(), orphan, "p", people()).unwrap();

    let err = dataset.save().unwrap_err();
    assert!(
        matches!(err, DatasetError::MetadataPersist { upload_file_id, .. } if upload_file_id == orphan)
    );
    assert!(!err.is_client_error());
    assert!(dataset.is_dirty());
    assert!(!fx.store.exists(&dataset.relation_name()).unwrap());
}

#[test]
fn empty_content_round_trips_with_headers() {
    let fx = fixture();
    let frame = Frame::empty(vec!["name".into(), "age".into()]);
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", frame).unwrap();
    let report = dataset.save().unwrap().content.unwrap();
    assert!(report.chunk_sizes.is_empty());

    let mut loaded = Dataset::load(fx.store.clone(), dataset.id()).unwrap();
    let content = loaded.content().unwrap();
    assert!(content.is_empty());
    assert_eq!(content.columns(), ["name", "age"]);
}

#[test]
fn delete_removes_metadata_and_relation() {
    let fx = fixture();
    let mut dataset = Dataset::create(fx.store.clone(), fx.upload_id, "p", people()).unwrap();
    dataset.save().unwrap();
    let id = dataset.id();
    let relation = dataset.relation_name();

    dataset.delete().expect("delete");
    assert!(matches!(
        fx.storage.get_dataset_record(id),
        Err(StorageError::DatasetNotFound(_))
    ));
    assert!(!fx.store.exists(&relation).unwrap());
    assert!(!fx.store.drop(&relation).unwrap());

    let err = Dataset::load(fx.store.clone(), id).unwrap_err();
    assert!(matches!(err, DatasetError::Storage(StorageError::DatasetNotFound(_))));
}

#[test]
fn distinct_datasets_save_concurrently() {
    let fx = fixture();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = fx.store.clone();
            let upload_id = fx.upload_id;
            std::thread::spawn(move || {
                let mut dataset =
                    Dataset::create(store, upload_id, format!("part-{i}"), people())?;
                dataset.save()?;
                Ok::<_, DatasetError>(dataset.id())
            })
        })
        .collect();

    let ids: Vec<Uuid> = handles
        .into_iter()
        .map(|h| h.join().expect("thread").expect("save"))
        .collect();
    assert_eq!(fx.storage.list_dataset_records(fx.upload_id).unwrap().len(), 4);
    for id in ids {
        let mut loaded = Dataset::load(fx.store.clone(), id).unwrap();
        assert_eq!(loaded.content().unwrap().len(), 3);
    }
}
