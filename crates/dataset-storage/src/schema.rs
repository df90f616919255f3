use rusqlite::Connection;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    // Ensure foreign keys are enforced (disabled by default in SQLite).
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        r#"
        -- One row per uploaded file. The raw bytes live on disk at `storage_path`.
        CREATE TABLE IF NOT EXISTS upload_files (
          id TEXT PRIMARY KEY,
          created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
          modified_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
          file_size_bytes INTEGER NOT NULL,
          mime_type TEXT,
          name TEXT NOT NULL,
          storage_path TEXT NOT NULL
        );

        -- One row per dataset. Row content lives in a dynamically named
        -- `data_frame_content_<id>` table created on save.
        CREATE TABLE IF NOT EXISTS file_contents (
          id TEXT PRIMARY KEY,
          upload_file_id TEXT NOT NULL REFERENCES upload_files(id),
          created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
          modified_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
          category TEXT,
          name TEXT NOT NULL,
          number_of_columns INTEGER NOT NULL,
          record_count INTEGER NOT NULL,
          content_headers JSON NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_file_contents_upload ON file_contents(upload_file_id);
        "#,
    )?;

    // Databases created before categories were tracked lack the column.
    ensure_file_content_columns(conn)?;

    Ok(())
}

fn ensure_file_content_columns(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(file_contents)")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut existing = std::collections::HashSet::new();
    for name in rows {
        existing.insert(name?);
    }

    if !existing.contains("category") {
        conn.execute("ALTER TABLE file_contents ADD COLUMN category TEXT", [])?;
    }

    Ok(())
}
