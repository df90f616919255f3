use std::borrow::Cow;
use std::io::Read;

use csv::ByteRecord;
use encoding_rs::WINDOWS_1252;
use thiserror::Error;

use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Treat the first record as the header row.
    pub has_header: bool,
    /// How to decode raw CSV bytes into text fields.
    pub encoding: CsvTextEncoding,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            encoding: CsvTextEncoding::Auto,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsvTextEncoding {
    /// Attempt to decode as UTF-8; if a field contains invalid UTF-8, fall back to Windows-1252.
    Auto,
    /// Decode as UTF-8 and reject invalid byte sequences.
    Utf8,
    /// Decode as Windows-1252 (aka CP-1252).
    Windows1252,
}

#[derive(Debug, Error)]
pub enum CsvImportError {
    #[error("csv input was empty")]
    EmptyInput,
    #[error("csv parse error at row {row}, column {column}: {reason}")]
    Parse { row: u64, column: u64, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse CSV into a [`Frame`] of text cells.
///
/// Rows may vary in width; every row is padded to the widest one. Missing or
/// blank header names become `Column{n}` (1-based).
pub fn import_csv_to_frame<R: Read>(reader: R, options: &CsvOptions) -> Result<Frame, CsvImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        // Headers are handled here so row numbers in errors stay consistent.
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut record = ByteRecord::new();
    let mut record_index: u64 = 0;

    let has_first = csv_reader
        .read_byte_record(&mut record)
        .map_err(|e| map_csv_error(e, record_index + 1))?;
    if !has_first {
        return Err(CsvImportError::EmptyInput);
    }
    record_index += 1;

    let mut headers: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let first = decode_record_to_strings(&record, record_index, options.encoding)?;
    let mut column_count = first.len();
    if options.has_header {
        headers = first;
    } else {
        rows.push(first);
    }

    loop {
        record.clear();
        match csv_reader.read_byte_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                record_index += 1;
                let row = decode_record_to_strings(&record, record_index, options.encoding)?;
                column_count = column_count.max(row.len());
                rows.push(row);
            }
            Err(e) => return Err(map_csv_error(e, record_index + 1)),
        }
    }

    headers.resize(column_count, String::new());
    for (i, header) in headers.iter_mut().enumerate() {
        if header.trim().is_empty() {
            *header = format!("Column{}", i + 1);
        }
    }
    for row in &mut rows {
        row.resize(column_count, String::new());
    }

    Frame::new(headers, rows).map_err(|e| CsvImportError::Parse {
        row: 0,
        column: 0,
        reason: e.to_string(),
    })
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

impl CsvTextEncoding {
    fn decode<'a>(self, field: &'a [u8]) -> Result<Cow<'a, str>, std::str::Utf8Error> {
        match (self, std::str::from_utf8(field)) {
            (CsvTextEncoding::Windows1252, _) => Ok(WINDOWS_1252.decode(field).0),
            (_, Ok(text)) => Ok(Cow::Borrowed(text)),
            (CsvTextEncoding::Auto, Err(_)) => Ok(WINDOWS_1252.decode(field).0),
            (CsvTextEncoding::Utf8, Err(err)) => Err(err),
        }
    }
}

fn decode_record_to_strings(
    record: &ByteRecord,
    row: u64,
    encoding: CsvTextEncoding,
) -> Result<Vec<String>, CsvImportError> {
    record
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            // Excel-exported CSVs often start with a UTF-8 BOM.
            let field = match (row, idx) {
                (1, 0) => field.strip_prefix(UTF8_BOM).unwrap_or(field),
                _ => field,
            };
            encoding
                .decode(field)
                .map(Cow::into_owned)
                .map_err(|err| CsvImportError::Parse {
                    row,
                    column: idx as u64 + 1,
                    reason: format!("invalid UTF-8: {err}"),
                })
        })
        .collect()
}

/// Positioned parse error; I/O failures pass through untouched.
fn map_csv_error(err: csv::Error, fallback_row: u64) -> CsvImportError {
    let row = match err.position() {
        Some(pos) if pos.record() > 0 => pos.record(),
        _ => fallback_row,
    };
    let reason = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(io) => CsvImportError::Io(io),
        _ => CsvImportError::Parse {
            row,
            column: 0,
            reason,
        },
    }
}
