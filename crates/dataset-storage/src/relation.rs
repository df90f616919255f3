//! Column layout of backing content relations and the reconcile decision
//! between an in-memory column set and an existing table.

use std::collections::BTreeSet;

use thiserror::Error;

/// Physical auto-increment primary key.
pub const INDEX_COLUMN: &str = "__index__";
/// Per-row JSON annotations, `{}` by default.
pub const METADATA_COLUMN: &str = "__metadata__";
/// Logical stable row key.
pub const RECORD_ID_COLUMN: &str = "__record_ids__";

pub const RESERVED_COLUMNS: [&str; 3] = [INDEX_COLUMN, METADATA_COLUMN, RECORD_ID_COLUMN];

/// SQLite matches identifiers ASCII case-insensitively, so `__INDEX__`
/// collides with `__index__`.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_COLUMNS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("column {position} has an empty name")]
    EmptyColumnName { position: usize },
    #[error("column {0:?} appears more than once")]
    DuplicateColumn(String),
    #[error("column {0:?} collides with a reserved column name")]
    ReservedColumn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Index,
    RecordId,
    Text,
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnDef {
    fn definition(&self) -> String {
        let name = quote_ident(&self.name);
        match self.kind {
            ColumnKind::Index => format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT"),
            ColumnKind::RecordId => format!("{name} TEXT NOT NULL UNIQUE"),
            ColumnKind::Text => format!("{name} TEXT"),
            ColumnKind::Metadata => format!("{name} JSON NOT NULL DEFAULT '{{}}'"),
        }
    }
}

/// Ordered column descriptors of a backing relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    /// Layout for a relation materialized from in-memory content:
    /// index, record id, the user columns in order, metadata.
    ///
    /// Names differing only in ASCII case count as duplicates, as they do
    /// in SQLite.
    pub fn for_content<S: AsRef<str>>(user_columns: &[S]) -> Result<Self, SchemaError> {
        let mut seen = BTreeSet::new();
        let mut columns = Vec::with_capacity(user_columns.len() + 3);
        columns.push(ColumnDef {
            name: INDEX_COLUMN.to_string(),
            kind: ColumnKind::Index,
        });
        columns.push(ColumnDef {
            name: RECORD_ID_COLUMN.to_string(),
            kind: ColumnKind::RecordId,
        });

        for (position, name) in user_columns.iter().enumerate() {
            let name = name.as_ref();
            if name.trim().is_empty() {
                return Err(SchemaError::EmptyColumnName { position });
            }
            if is_reserved(name) {
                return Err(SchemaError::ReservedColumn(name.to_string()));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateColumn(name.to_string()));
            }
            columns.push(ColumnDef {
                name: name.to_string(),
                kind: ColumnKind::Text,
            });
        }

        columns.push(ColumnDef {
            name: METADATA_COLUMN.to_string(),
            kind: ColumnKind::Metadata,
        });
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn user_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Text)
            .map(|c| c.name.as_str())
    }

    pub fn create_table_sql(&self, relation: &str) -> String {
        let defs: Vec<String> = self.columns.iter().map(ColumnDef::definition).collect();
        format!("CREATE TABLE {} ({})", quote_ident(relation), defs.join(", "))
    }

    /// Insert statement binding the record id followed by the user columns.
    ///
    /// Index and metadata are left to their column defaults.
    pub fn insert_sql(&self, relation: &str) -> String {
        let targets: Vec<String> = self
            .columns
            .iter()
            .filter(|c| matches!(c.kind, ColumnKind::RecordId | ColumnKind::Text))
            .map(|c| quote_ident(&c.name))
            .collect();
        let placeholders: Vec<String> = (1..=targets.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(relation),
            targets.join(", "),
            placeholders.join(", ")
        )
    }
}

/// What to do with the backing relation before loading content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// No relation exists yet.
    Create,
    /// The relation exists with a different column set; drop it and create anew.
    Recreate,
    /// The relation already has the right columns; keep the table, replace the rows.
    Reuse,
}

/// Decide how to bring `existing` (the live table's columns, if any) in line
/// with `target`.
///
/// User columns are compared as sets. Reserved columns the target needs must
/// also be present, otherwise a table hosting a bare read-through copy would
/// be reused without its record-id column.
pub fn reconcile<S: AsRef<str>>(target: &Schema, existing: Option<&[S]>) -> Reconcile {
    let Some(existing) = existing else {
        return Reconcile::Create;
    };

    let existing_user: BTreeSet<&str> = existing
        .iter()
        .map(AsRef::as_ref)
        .filter(|c| !is_reserved(c))
        .collect();
    let target_user: BTreeSet<&str> = target.user_columns().collect();
    if existing_user != target_user {
        return Reconcile::Recreate;
    }

    let has = |name: &str| existing.iter().any(|c| c.as_ref() == name);
    let reserved_ok = target.columns().iter().all(|c| match c.kind {
        ColumnKind::Text => true,
        _ => has(&c.name),
    });
    if reserved_ok {
        Reconcile::Reuse
    } else {
        Reconcile::Recreate
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
