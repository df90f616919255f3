//! The dataset entity: in-memory content, its metadata row, and the lazy
//! synchronisation between the two and the backing relation.

use std::mem;

use rusqlite::types::Value as SqlValue;
use uuid::Uuid;

use crate::content::{ContentStore, MaterializeReport};
use crate::error::{DatasetError, Result};
use crate::frame::{Frame, RowIndex};
use crate::identity::assign_record_ids;
use crate::relation::{is_reserved, Schema, INDEX_COLUMN, METADATA_COLUMN, RECORD_ID_COLUMN};
use crate::storage::StorageError;
use crate::types::DatasetRecord;

/// Placeholder in SQL fragments replaced by the quoted backing relation name.
pub const TABLE_PLACEHOLDER: &str = "{table}";

/// How rows read back from the backing relation are turned into a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Key rows by record id. When false the frame is keyed by the physical
    /// index (shifted to start at zero) and the record-id column stays a
    /// regular column.
    pub index_by_record_ids: bool,
    /// Keep the per-row metadata column.
    pub include_metadata: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            index_by_record_ids: true,
            include_metadata: false,
        }
    }
}

#[derive(Debug)]
enum ContentState {
    /// Content not in memory; the backing relation is authoritative.
    Unloaded,
    /// Content in memory and identical to the backing relation.
    Clean(Frame),
    /// Content in memory with changes the backing relation has not seen.
    Dirty(Frame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Present when the save had to resync the backing relation.
    pub content: Option<MaterializeReport>,
}

/// One uploaded file's tabular content.
///
/// Concurrent mutation of the same dataset id from several handles is a race
/// (last materialize wins); callers serialize access per id.
#[derive(Debug)]
pub struct Dataset {
    store: ContentStore,
    record: DatasetRecord,
    state: ContentState,
}

impl Dataset {
    pub fn create(
        store: ContentStore,
        upload_file_id: Uuid,
        name: impl Into<String>,
        content: Frame,
    ) -> Result<Self> {
        Self::create_with_id(store, Uuid::new_v4(), upload_file_id, name, content)
    }

    /// Like [`Dataset::create`] with a caller-chosen id. Record ids derive
    /// from this id, so equal ids and row order reproduce equal record ids.
    pub fn create_with_id(
        store: ContentStore,
        id: Uuid,
        upload_file_id: Uuid,
        name: impl Into<String>,
        content: Frame,
    ) -> Result<Self> {
        Schema::for_content(content.columns())?;
        let content = assign_record_ids(id, content);
        let record = DatasetRecord {
            id,
            upload_file_id,
            name: name.into(),
            category: None,
            number_of_columns: count(content.width()),
            record_count: count(content.len()),
            content_headers: content.columns().to_vec(),
            created_at: None,
            modified_at: None,
        };
        Ok(Self {
            store,
            record,
            state: ContentState::Dirty(content),
        })
    }

    /// Open a saved dataset. Content is read from the backing relation on first access.
    pub fn load(store: ContentStore, id: Uuid) -> Result<Self> {
        let record = store.storage().get_dataset_record(id)?;
        Ok(Self {
            store,
            record,
            state: ContentState::Unloaded,
        })
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn upload_file_id(&self) -> Uuid {
        self.record.upload_file_id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn category(&self) -> Option<&str> {
        self.record.category.as_deref()
    }

    pub fn set_category(&mut self, category: Option<String>) {
        self.record.category = category;
    }

    /// Metadata summary as of the last construction, update, or save.
    pub fn record(&self) -> &DatasetRecord {
        &self.record
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, ContentState::Dirty(_))
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self.state, ContentState::Unloaded)
    }

    pub fn relation_name(&self) -> String {
        self.store.relation_name(self.id())
    }

    /// Quoted backing relation name, ready to splice into SQL.
    pub fn content_table_name(&self) -> String {
        self.store.quoted_relation(self.id())
    }

    /// The dataset's rows keyed by record id, streamed from the backing
    /// relation if not already in memory.
    pub fn content(&mut self) -> Result<&Frame> {
        if !self.is_loaded() {
            let frame = self.read_back(ReadOptions::default())?;
            self.state = ContentState::Clean(frame);
        }
        self.loaded()
            .ok_or_else(|| StorageError::RelationNotFound(self.relation_name()).into())
    }

    /// Read the backing relation with explicit index/metadata handling.
    ///
    /// Pending changes are resynced first. The in-memory cache is left as is.
    pub fn content_with(&mut self, options: ReadOptions) -> Result<Frame> {
        self.resync()?;
        self.read_back(options)
    }

    /// Merge `other` into the content by record id.
    ///
    /// `other` must be indexed by record ids or carry a `__record_ids__`
    /// column. Only existing rows and columns are written. Returns the number
    /// of cells written.
    pub fn update_content(&mut self, mut other: Frame) -> Result<usize> {
        if other.record_ids().is_none() {
            if other.column_position(RECORD_ID_COLUMN).is_none() {
                return Err(DatasetError::Validation(
                    "expected other frame to have record ids, none found".into(),
                ));
            }
            other.set_index_from_column(RECORD_ID_COLUMN)?;
        }

        self.content()?;
        let written = match &mut self.state {
            ContentState::Clean(frame) | ContentState::Dirty(frame) => frame.update_from(&other)?,
            ContentState::Unloaded => 0,
        };
        self.mark_dirty();
        Ok(written)
    }

    /// Replace the content wholesale. Record ids are derived afresh.
    pub fn replace_content(&mut self, content: Frame) -> Result<()> {
        Schema::for_content(content.columns())?;
        let content = assign_record_ids(self.id(), content);
        self.state = ContentState::Dirty(content);
        self.sync_record_shape()
    }

    /// Persist the metadata row, then resync the backing relation if the
    /// content changed.
    ///
    /// A [`DatasetError::ContentPersist`] leaves the metadata committed and
    /// the dataset still dirty; calling `save` again retries the resync.
    pub fn save(&mut self) -> Result<SaveOutcome> {
        self.sync_record_shape()?;
        self.store
            .storage()
            .save_dataset_record(&self.record)
            .map_err(|source| DatasetError::MetadataPersist {
                upload_file_id: self.record.upload_file_id,
                source,
            })?;

        let content = self.resync()?;
        Ok(SaveOutcome { content })
    }

    /// Run a read fragment against the backing relation.
    ///
    /// `{table}` in `sql` is replaced by the quoted relation name. Pending
    /// changes are resynced first so the query sees current content.
    pub fn exec_sql_read(&mut self, sql: &str, options: ReadOptions) -> Result<Frame> {
        self.resync()?;
        let chunk = self.store.read_fragment(&self.expand_fragment(sql))?;
        frame_from_rows(chunk.columns, chunk.rows, options)
    }

    /// Run a write fragment against the backing relation and drop the
    /// in-memory cache. Returns the number of rows changed.
    pub fn exec_sql_write(&mut self, sql: &str) -> Result<usize> {
        self.resync()?;
        let changed = self.store.exec_fragment(&self.expand_fragment(sql))?;
        self.state = ContentState::Unloaded;
        Ok(changed)
    }

    /// Delete the metadata row, then drop the backing relation.
    ///
    /// The two steps are not atomic: if the drop fails the metadata is
    /// already gone and the relation is orphaned.
    pub fn delete(self) -> Result<()> {
        let id = self.id();
        let relation = self.relation_name();
        let removed = self.store.storage().delete_dataset_record(id)?;
        let dropped = self.store.drop(&relation)?;
        log::info!("deleted dataset {id} (metadata: {removed}, relation: {dropped})");
        Ok(())
    }

    fn loaded(&self) -> Option<&Frame> {
        match &self.state {
            ContentState::Clean(frame) | ContentState::Dirty(frame) => Some(frame),
            ContentState::Unloaded => None,
        }
    }

    fn mark_dirty(&mut self) {
        self.state = match mem::replace(&mut self.state, ContentState::Unloaded) {
            ContentState::Clean(frame) => ContentState::Dirty(frame),
            other => other,
        };
    }

    fn mark_clean(&mut self) {
        self.state = match mem::replace(&mut self.state, ContentState::Unloaded) {
            ContentState::Dirty(frame) => ContentState::Clean(frame),
            other => other,
        };
    }

    /// Copy headers and counts into the metadata record from the loaded
    /// frame, or from the relation when a write fragment dropped the cache.
    fn sync_record_shape(&mut self) -> Result<()> {
        let (headers, rows) = match self.loaded() {
            Some(frame) => (frame.columns().to_vec(), frame.len()),
            None => {
                let relation = self.relation_name();
                let Some(columns) = self.store.columns(&relation)? else {
                    return Ok(());
                };
                let rows = self.store.count(&relation)?.unwrap_or(0);
                let headers = columns.into_iter().filter(|c| !is_reserved(c)).collect();
                (headers, rows)
            }
        };
        self.record.number_of_columns = count(headers.len());
        self.record.record_count = count(rows);
        self.record.content_headers = headers;
        Ok(())
    }

    /// Materialize dirty content into the backing relation. No-op when clean.
    fn resync(&mut self) -> Result<Option<MaterializeReport>> {
        let ContentState::Dirty(frame) = &self.state else {
            return Ok(None);
        };
        let relation = self.store.relation_name(self.record.id);
        let report = materialize_frame(&self.store, &relation, frame).map_err(|source| {
            log::warn!(
                "dataset {} metadata is committed but content failed to persist: {source}",
                self.record.id
            );
            DatasetError::ContentPersist {
                dataset_id: self.record.id,
                source,
            }
        })?;
        self.mark_clean();
        Ok(Some(report))
    }

    fn read_back(&self, options: ReadOptions) -> Result<Frame> {
        let relation = self.relation_name();
        let mut columns = None;
        let mut rows = Vec::new();
        for chunk in self.store.stream_read(&relation, None)? {
            let chunk = chunk?;
            if columns.is_none() {
                columns = Some(chunk.columns);
            }
            rows.extend(chunk.rows);
        }

        let columns = match columns {
            Some(columns) => columns,
            // An empty relation yields no chunks; take the names from the table.
            None => self
                .store
                .columns(&relation)?
                .ok_or(StorageError::RelationNotFound(relation))?,
        };
        frame_from_rows(columns, rows, options)
    }

    fn expand_fragment(&self, sql: &str) -> String {
        sql.replace(TABLE_PLACEHOLDER, &self.content_table_name())
    }
}

fn materialize_frame(
    store: &ContentStore,
    relation: &str,
    frame: &Frame,
) -> std::result::Result<MaterializeReport, StorageError> {
    let schema = Schema::for_content(frame.columns())?;
    let ids = frame
        .record_ids()
        .ok_or_else(|| StorageError::InvalidRow("content has no record ids".into()))?;
    let rows = ids
        .iter()
        .map(String::as_str)
        .zip(frame.rows().iter().map(Vec::as_slice));
    store.materialize(relation, &schema, rows)
}

/// Turn raw rows from the backing relation (or a fragment over it) into a
/// frame. Reserved columns are handled explicitly: the metadata column is
/// dropped unless requested, the index column never survives as data, and
/// record ids move into the index when keyed by record id.
fn frame_from_rows(
    mut columns: Vec<String>,
    mut rows: Vec<Vec<SqlValue>>,
    options: ReadOptions,
) -> Result<Frame> {
    if !options.include_metadata {
        take_column(&mut columns, &mut rows, METADATA_COLUMN);
    }
    let physical = take_column(&mut columns, &mut rows, INDEX_COLUMN);
    let record_ids = if options.index_by_record_ids {
        take_column(&mut columns, &mut rows, RECORD_ID_COLUMN)
    } else {
        None
    };

    let index = match (record_ids, physical) {
        (Some(ids), _) => RowIndex::RecordIds(ids.into_iter().map(sql_to_text).collect()),
        (None, Some(physical)) if !options.index_by_record_ids => {
            let mut positions = Vec::with_capacity(physical.len());
            for value in physical {
                match value {
                    SqlValue::Integer(n) => positions.push(n - 1),
                    other => {
                        return Err(DatasetError::Validation(format!(
                            "{INDEX_COLUMN} holds a non-integer value: {other:?}"
                        )))
                    }
                }
            }
            RowIndex::Physical(positions)
        }
        _ => RowIndex::Positional,
    };

    let rows = rows
        .into_iter()
        .map(|row| row.into_iter().map(sql_to_text).collect())
        .collect();
    Ok(Frame::new(columns, rows)?.with_index(index)?)
}

fn take_column(
    columns: &mut Vec<String>,
    rows: &mut [Vec<SqlValue>],
    name: &str,
) -> Option<Vec<SqlValue>> {
    let pos = columns.iter().position(|c| c == name)?;
    columns.remove(pos);
    Some(rows.iter_mut().map(|row| row.remove(pos)).collect())
}

fn sql_to_text(value: SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Integer(n) => n.to_string(),
        SqlValue::Real(n) => n.to_string(),
        SqlValue::Text(s) => s,
        SqlValue::Blob(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
