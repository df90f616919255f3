use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dataset_storage::{
    ingest, ContentOptions, ContentStore, Dataset, DatasetError, Frame, ReadOptions, Storage,
    StoreConfig, UploadSource,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "dataset-cli")]
#[command(about = "Ingest CSV uploads into per-dataset tables and inspect them.")]
struct Cli {
    /// JSON store config. Missing fields take their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file. Overrides `database_path` from the config.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a CSV file and materialize it as a dataset.
    Ingest {
        file: PathBuf,

        /// Category recorded on the dataset (e.g. `employee`).
        #[arg(long)]
        category: Option<String>,
    },
    /// Print a dataset's content.
    Show {
        dataset_id: Uuid,

        /// Print at most this many rows.
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Run SQL against a dataset's table. `{table}` expands to its quoted name.
    Query {
        dataset_id: Uuid,

        sql: String,

        /// Treat the statement as a write and print the number of changed rows.
        #[arg(long)]
        write: bool,
    },
    /// Delete a dataset's metadata and its table.
    Delete { dataset_id: Uuid },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct JsonContent<'a> {
    dataset_id: Uuid,
    name: &'a str,
    record_count: i64,
    columns: &'a [String],
    record_ids: Option<&'a [String]>,
    rows: &'a [Vec<String>],
}

fn main() -> ExitCode {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let client_error = err
                .downcast_ref::<DatasetError>()
                .is_some_and(DatasetError::is_client_error);
            if client_error {
                eprintln!("invalid input: {err:#}");
                ExitCode::from(2)
            } else {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    log::debug!("using store config {config:?}");
    let storage = Storage::open_with_config(&config).context("open database")?;
    let store = ContentStore::new(storage.clone(), ContentOptions::from(&config))?;

    let mut out = String::new();
    match cli.command {
        Command::Ingest { file, category } => {
            let bytes =
                std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let file_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            let (upload, dataset) = ingest(
                &storage,
                &config,
                UploadSource {
                    file_name,
                    bytes: &bytes,
                    category: category.as_deref(),
                },
            )?;
            let record = dataset.record();
            out.push_str(&format!("upload {}\n", upload.id));
            out.push_str(&format!("dataset {}\n", dataset.id()));
            out.push_str(&format!(
                "{} rows, {} columns: {}\n",
                record.record_count,
                record.number_of_columns,
                record.content_headers.join(", ")
            ));
        }
        Command::Show {
            dataset_id,
            limit,
            format,
        } => {
            let mut dataset = Dataset::load(store, dataset_id)?;
            let name = dataset.name().to_string();
            let record_count = dataset.record().record_count;
            let content = dataset.content()?;
            let shown = limit.unwrap_or(content.len()).min(content.len());
            match format {
                OutputFormat::Text => out.push_str(&render_text(content, shown)),
                OutputFormat::Json => {
                    let json = JsonContent {
                        dataset_id,
                        name: &name,
                        record_count,
                        columns: content.columns(),
                        record_ids: content.record_ids().map(|ids| &ids[..shown]),
                        rows: &content.rows()[..shown],
                    };
                    out.push_str(&serde_json::to_string(&json)?);
                    out.push('\n');
                }
            }
        }
        Command::Query {
            dataset_id,
            sql,
            write,
        } => {
            let mut dataset = Dataset::load(store, dataset_id)?;
            if write {
                let changed = dataset.exec_sql_write(&sql)?;
                out.push_str(&format!("{changed} rows changed\n"));
            } else {
                let frame = dataset.exec_sql_read(&sql, ReadOptions::default())?;
                out.push_str(&render_text(&frame, frame.len()));
            }
        }
        Command::Delete { dataset_id } => {
            Dataset::load(store, dataset_id)?.delete()?;
            out.push_str(&format!("deleted {dataset_id}\n"));
        }
    }

    write_stdout(&out)
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.database_path = Some(db.clone());
    }
    if config.database_path.is_none() {
        bail!("no database configured (pass --db or set database_path in --config)");
    }
    Ok(config)
}

/// Tab-separated rows under a header line. Rows keyed by record id lead with it.
fn render_text(frame: &Frame, limit: usize) -> String {
    let ids = frame.record_ids();
    let mut out = String::new();
    if ids.is_some() {
        out.push_str("record_id\t");
    }
    out.push_str(&frame.columns().join("\t"));
    out.push('\n');
    for (pos, row) in frame.rows().iter().take(limit).enumerate() {
        if let Some(ids) = ids {
            out.push_str(&ids[pos]);
            out.push('\t');
        }
        out.push_str(&row.join("\t"));
        out.push('\n');
    }
    out
}

fn write_stdout(out: &str) -> Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    // A closed pipe (e.g. `| head`) is not a failure.
    match handle.write_all(out.as_bytes()).and_then(|()| handle.flush()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}
