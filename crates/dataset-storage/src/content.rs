use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Statement};
use uuid::Uuid;

use crate::config::{StoreConfig, DEFAULT_CHUNK_SIZE, DEFAULT_TABLE_PREFIX};
use crate::relation::{quote_ident, reconcile, Reconcile, Schema, INDEX_COLUMN};
use crate::storage::{finish, Result, Storage, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentOptions {
    /// Max rows per insert transaction and per streamed read chunk.
    pub chunk_size: usize,
    /// Prefix prepended to the dataset id to name its backing relation.
    pub table_prefix: String,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }
}

impl From<&StoreConfig> for ContentOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            table_prefix: config.table_prefix.clone(),
        }
    }
}

/// One batch of rows read back from the database, with its column names.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChunk {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowChunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of loading content into a backing relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub decision: Reconcile,
    pub rows_written: usize,
    /// Size of every insert transaction, in order.
    pub chunk_sizes: Vec<usize>,
}

/// Row-level access to the per-dataset backing relations.
#[derive(Debug, Clone)]
pub struct ContentStore {
    storage: Storage,
    options: ContentOptions,
}

impl ContentStore {
    pub fn new(storage: Storage, options: ContentOptions) -> Result<Self> {
        if options.chunk_size == 0 {
            return Err(StorageError::InvalidChunkSize);
        }
        Ok(Self { storage, options })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn chunk_size(&self) -> usize {
        self.options.chunk_size
    }

    /// Backing relation name for a dataset. One dataset maps to exactly one relation.
    pub fn relation_name(&self, dataset_id: Uuid) -> String {
        format!("{}{}", self.options.table_prefix, dataset_id)
    }

    pub fn quoted_relation(&self, dataset_id: Uuid) -> String {
        quote_ident(&self.relation_name(dataset_id))
    }

    pub fn exists(&self, relation: &str) -> Result<bool> {
        let conn = self.storage.lock();
        table_exists(&conn, relation)
    }

    /// Column names of a live relation, in table order, or `None` if it does not exist.
    pub fn columns(&self, relation: &str) -> Result<Option<Vec<String>>> {
        let conn = self.storage.lock();
        table_columns(&conn, relation)
    }

    /// Row count of a live relation, or `None` if it does not exist.
    pub fn count(&self, relation: &str) -> Result<Option<usize>> {
        let conn = self.storage.lock();
        if !table_exists(&conn, relation)? {
            return Ok(None);
        }
        let rows: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(relation)),
            [],
            |r| r.get(0),
        )?;
        Ok(Some(usize::try_from(rows).unwrap_or(0)))
    }

    pub fn create(&self, relation: &str, schema: &Schema) -> Result<()> {
        let conn = self.storage.lock();
        conn.execute(&schema.create_table_sql(relation), [])?;
        Ok(())
    }

    /// Drop a relation. Dropping a missing relation is not an error.
    pub fn drop(&self, relation: &str) -> Result<bool> {
        let conn = self.storage.lock();
        let existed = table_exists(&conn, relation)?;
        conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(relation)), [])?;
        Ok(existed)
    }

    /// Insert `(record_id, cells)` rows in order, one transaction per chunk.
    ///
    /// Returns the size of every chunk written. A failing chunk aborts the
    /// whole insert; chunks committed before it stay in place.
    pub fn insert<'a, I>(&self, relation: &str, schema: &Schema, rows: I) -> Result<Vec<usize>>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let sql = schema.insert_sql(relation);
        let width = schema.user_columns().count();
        let mut chunk_sizes = Vec::new();
        let mut pending: Vec<(&str, &[String])> = Vec::with_capacity(self.options.chunk_size);

        for row in rows {
            if row.1.len() != width {
                return Err(StorageError::InvalidRow(format!(
                    "record {} has {} cells, expected {width}",
                    row.0,
                    row.1.len()
                )));
            }
            pending.push(row);
            if pending.len() == self.options.chunk_size {
                chunk_sizes.push(self.insert_chunk(&sql, &pending)?);
                pending.clear();
            }
        }
        if !pending.is_empty() {
            chunk_sizes.push(self.insert_chunk(&sql, &pending)?);
        }
        Ok(chunk_sizes)
    }

    fn insert_chunk(&self, sql: &str, rows: &[(&str, &[String])]) -> Result<usize> {
        let mut conn = self.storage.lock();
        let tx = conn.transaction()?;
        let outcome = (|| -> Result<usize> {
            let mut stmt = tx.prepare_cached(sql)?;
            for (record_id, cells) in rows {
                let values = std::iter::once(*record_id).chain(cells.iter().map(String::as_str));
                stmt.execute(params_from_iter(values))?;
            }
            Ok(rows.len())
        })();
        let written = finish(tx, outcome)?;
        log::debug!("inserted chunk of {written} rows");
        Ok(written)
    }

    /// Bring `relation` in line with `schema` and load `rows` into it.
    ///
    /// There is no partial-success contract: on error the relation may hold
    /// any prefix of the rows and the whole call must be retried.
    pub fn materialize<'a, I>(&self, relation: &str, schema: &Schema, rows: I) -> Result<MaterializeReport>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let decision = self.prepare_relation(relation, schema)?;
        log::debug!("reconciled {relation}: {decision:?}");

        let chunk_sizes = self.insert(relation, schema, rows)?;
        let rows_written = chunk_sizes.iter().sum();
        log::info!(
            "materialized {relation}: {rows_written} rows in {} chunks",
            chunk_sizes.len()
        );
        Ok(MaterializeReport {
            decision,
            rows_written,
            chunk_sizes,
        })
    }

    fn prepare_relation(&self, relation: &str, schema: &Schema) -> Result<Reconcile> {
        let mut conn = self.storage.lock();
        let existing = table_columns(&conn, relation)?;
        let decision = reconcile(schema, existing.as_deref());

        let tx = conn.transaction()?;
        let outcome = (|| -> Result<()> {
            let quoted = quote_ident(relation);
            match decision {
                Reconcile::Create => {
                    tx.execute(&schema.create_table_sql(relation), [])?;
                }
                Reconcile::Recreate => {
                    // Drop rather than delete rows so the auto-increment
                    // counter restarts and index stays 1..=n.
                    tx.execute(&format!("DROP TABLE {quoted}"), [])?;
                    tx.execute(&schema.create_table_sql(relation), [])?;
                }
                Reconcile::Reuse => {
                    tx.execute(&format!("DELETE FROM {quoted}"), [])?;
                    reset_sequence(&tx, relation)?;
                }
            }
            Ok(())
        })();
        finish(tx, outcome)?;
        Ok(decision)
    }

    /// Lazily read a relation in chunks of at most `chunk_size` rows, in index order.
    ///
    /// `filter` is an optional SQL boolean expression applied to every chunk.
    pub fn stream_read(&self, relation: &str, filter: Option<&str>) -> Result<ContentChunks> {
        if !self.exists(relation)? {
            return Err(StorageError::RelationNotFound(relation.to_string()));
        }
        let index = quote_ident(INDEX_COLUMN);
        let filter = filter.map(|f| format!("({f}) AND ")).unwrap_or_default();
        let sql = format!(
            "SELECT * FROM {} WHERE {filter}{index} > ?1 ORDER BY {index} LIMIT ?2",
            quote_ident(relation)
        );
        Ok(ContentChunks {
            storage: self.storage.clone(),
            sql,
            chunk_size: self.options.chunk_size,
            cursor: i64::MIN,
            done: false,
        })
    }

    /// Run a caller-supplied query and collect every row it returns.
    pub fn read_fragment(&self, sql: &str) -> Result<RowChunk> {
        let conn = self.storage.lock();
        let mut stmt = conn.prepare(sql)?;
        collect_chunk(&mut stmt, [])
    }

    /// Run a caller-supplied write. Returns the number of rows changed.
    pub fn exec_fragment(&self, sql: &str) -> Result<usize> {
        let conn = self.storage.lock();
        let changed = conn.execute(sql, [])?;
        Ok(changed)
    }
}

/// Lazy sequence of [`RowChunk`]s produced by [`ContentStore::stream_read`].
///
/// Each call to `next` takes the connection for one query only. The stream
/// is not resumable; restart by calling `stream_read` again.
#[derive(Debug)]
pub struct ContentChunks {
    storage: Storage,
    sql: String,
    chunk_size: usize,
    cursor: i64,
    done: bool,
}

impl ContentChunks {
    fn next_chunk(&mut self) -> Result<Option<RowChunk>> {
        let conn = self.storage.lock();
        // Not cached: `SELECT *` must see the current columns after a recreate.
        let mut stmt = conn.prepare(&self.sql)?;
        let limit = i64::try_from(self.chunk_size).unwrap_or(i64::MAX);
        let chunk = collect_chunk(&mut stmt, params![self.cursor, limit])?;

        if chunk.len() < self.chunk_size {
            self.done = true;
        }
        if chunk.is_empty() {
            return Ok(None);
        }

        let index_pos = chunk
            .columns
            .iter()
            .position(|c| c == INDEX_COLUMN)
            .ok_or_else(|| StorageError::InvalidRow(format!("missing {INDEX_COLUMN} column")))?;
        if let Some(SqlValue::Integer(last)) = chunk.rows.last().map(|r| &r[index_pos]) {
            self.cursor = *last;
        } else {
            self.done = true;
        }
        Ok(Some(chunk))
    }
}

impl Iterator for ContentChunks {
    type Item = Result<RowChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn collect_chunk<P: rusqlite::Params>(stmt: &mut Statement<'_>, params: P) -> Result<RowChunk> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let width = columns.len();
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, SqlValue>(i)?);
        }
        out.push(values);
    }
    Ok(RowChunk { columns, rows: out })
}

fn table_exists(conn: &Connection, relation: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![relation],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn table_columns(conn: &Connection, relation: &str) -> Result<Option<Vec<String>>> {
    if !table_exists(conn, relation)? {
        return Ok(None);
    }
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map(params![relation], |r| r.get::<_, String>(0))?;
    let mut columns = Vec::new();
    for name in rows {
        columns.push(name?);
    }
    Ok(Some(columns))
}

fn reset_sequence(conn: &Connection, relation: &str) -> Result<()> {
    // `sqlite_sequence` only exists once some AUTOINCREMENT table has been written.
    let has_sequence: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    if has_sequence.is_some() {
        conn.execute("DELETE FROM sqlite_sequence WHERE name = ?1", params![relation])?;
    }
    Ok(())
}
