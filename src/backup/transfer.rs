//! Table export and import
//!
//! Export writes one CSV or JSON file per non-empty table into a staging
//! directory and packages them into `exports/export_{YYYYMMDD_HHMMSS}.zip`.
//! Import reads such files back (or a single loose file) and upserts the
//! columns shared with the target table.
//!
//! Value mapping: CSV cells are written as text, with NULL as an empty cell.
//! CSV cannot tell NULL from an empty string, so on import an empty cell
//! becomes `''` in a `NOT NULL` column and NULL everywhere else. Blobs are
//! written as base64 text in both formats and import back as text.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::archive;
use super::record::STAMP_FORMAT;
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::unique_path;
use crate::storage::{DataStore, TableRows};

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One CSV file per table with a header row
    #[default]
    Csv,
    /// One JSON array of row objects per table
    Json,
}

impl ExportFormat {
    /// File extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Table name to exported file, for the lifetime of one export
pub type ExportManifest = BTreeMap<String, PathBuf>;

/// Result of an export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSummary {
    /// The archive, if any table had rows
    pub archive: Option<PathBuf>,
    /// Tables written into the archive
    pub tables: Vec<String>,
    /// Tables skipped because they were empty
    pub skipped: Vec<String>,
}

/// Rows imported per table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub tables: BTreeMap<String, usize>,
}

impl ImportSummary {
    /// Total rows written across all tables
    pub fn total_rows(&self) -> usize {
        self.tables.values().sum()
    }
}

/// Export `tables` (all tables when `None`) into a timestamped archive
pub fn export_tables(
    store: &dyn DataStore,
    export_dir: &Path,
    format: ExportFormat,
    tables: Option<&[String]>,
    at: DateTime<Utc>,
) -> BackupResult<ExportSummary> {
    fs::create_dir_all(export_dir)?;

    let archive_path = unique_path(
        export_dir,
        &format!("export_{}", at.format(STAMP_FORMAT)),
        ".zip",
    );
    let staging = archive_path.with_extension("");
    fs::create_dir_all(&staging)?;

    let result = stage_and_package(store, &staging, &archive_path, format, tables);
    if let Err(e) = fs::remove_dir_all(&staging) {
        error!(dir = %staging.display(), error = %e, "Failed to clean up export staging");
    }
    result
}

fn stage_and_package(
    store: &dyn DataStore,
    staging: &Path,
    archive_path: &Path,
    format: ExportFormat,
    tables: Option<&[String]>,
) -> BackupResult<ExportSummary> {
    let tables = match tables {
        Some(list) if !list.is_empty() => list.to_vec(),
        _ => store.table_names()?,
    };

    let mut manifest = ExportManifest::new();
    let mut summary = ExportSummary::default();

    for table in tables {
        if store.table_schema(&table)?.is_none() {
            return Err(BackupError::table_not_found(table));
        }

        let rows = store.fetch_rows(&table, None)?;
        if rows.is_empty() {
            info!(table = %table, "Table is empty, skipping export");
            summary.skipped.push(table);
            continue;
        }

        let file = staging.join(format!("{}.{}", table, format.extension()));
        match format {
            ExportFormat::Csv => write_csv(&file, &rows)?,
            ExportFormat::Json => write_json(&file, &rows)?,
        }
        info!(table = %table, rows = rows.len(), file = %file.display(), "Table exported");
        manifest.insert(table, file);
    }

    if manifest.is_empty() {
        return Ok(summary);
    }

    let files: Vec<PathBuf> = manifest.values().cloned().collect();
    archive::compress_files(&files, archive_path)?;
    info!(archive = %archive_path.display(), tables = manifest.len(), "Export archive written");

    summary.tables = manifest.into_keys().collect();
    summary.archive = Some(archive_path.to_path_buf());
    Ok(summary)
}

fn write_csv(path: &Path, rows: &TableRows) -> BackupResult<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| BackupError::Export(format!("Failed to create {}: {}", path.display(), e)))?;

    writer
        .write_record(&rows.columns)
        .map_err(|e| BackupError::Export(e.to_string()))?;
    for row in &rows.rows {
        writer
            .write_record(row.iter().map(csv_field))
            .map_err(|e| BackupError::Export(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| BackupError::Export(e.to_string()))?;
    Ok(())
}

fn write_json(path: &Path, rows: &TableRows) -> BackupResult<()> {
    let objects: Vec<serde_json::Value> = rows
        .rows
        .iter()
        .map(|row| {
            let object = rows
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| (column.clone(), json_value(value)))
                .collect::<serde_json::Map<_, _>>();
            serde_json::Value::Object(object)
        })
        .collect();

    let file = File::create(path)
        .map_err(|e| BackupError::Export(format!("Failed to create {}: {}", path.display(), e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &objects)?;
    writer.flush()?;
    Ok(())
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => BASE64.encode(b),
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => serde_json::Value::String(BASE64.encode(b)),
    }
}

fn sql_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Import every file of an export archive, each into the table named by its
/// file stem. `scratch` is created for extraction and always removed.
pub fn import_archive(
    store: &dyn DataStore,
    archive_path: &Path,
    scratch: &Path,
) -> BackupResult<ImportSummary> {
    let result = archive::extract_all(archive_path, scratch).and_then(|files| {
        let mut summary = ImportSummary::default();
        let mut failures = Vec::new();

        for file in files {
            let Some(table) = file.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            match import_file(store, &file, &table) {
                Ok(count) => {
                    summary.tables.insert(table, count);
                }
                Err(e) => {
                    error!(file = %file.display(), error = %e, "Failed to import archive entry");
                    failures.push(format!("{}: {}", table, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(BackupError::Import(failures.join("; ")))
        }
    });

    if scratch.exists() {
        if let Err(e) = fs::remove_dir_all(scratch) {
            error!(dir = %scratch.display(), error = %e, "Failed to clean up import scratch");
        }
    }
    result
}

/// Import one CSV or JSON file into `table`
///
/// Only columns present both in the file and in the table are written; rows
/// replace existing rows with the same primary key.
pub fn import_file(store: &dyn DataStore, file: &Path, table: &str) -> BackupResult<usize> {
    if !file.exists() {
        return Err(BackupError::file_not_found(file));
    }

    let extension = file
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let incoming = match extension.as_str() {
        "json" => read_json_rows(file)?,
        "csv" => read_csv_rows(file)?,
        _ => {
            return Err(BackupError::Import(format!(
                "Unsupported file type: {}",
                file.display()
            )))
        }
    };

    if store.table_schema(table)?.is_none() {
        return Err(BackupError::table_not_found(table));
    }

    let table_columns = store.table_columns(table)?;
    let shared: Vec<(usize, bool)> = incoming
        .columns
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            table_columns
                .iter()
                .find(|c| c.name == *name)
                .map(|c| (i, c.not_null))
        })
        .collect();

    if shared.is_empty() {
        return Err(BackupError::Import(format!(
            "No columns of {} match table {}",
            file.display(),
            table
        )));
    }

    let empty_as_text = extension == "csv";
    let rows = TableRows {
        columns: shared
            .iter()
            .map(|&(i, _)| incoming.columns[i].clone())
            .collect(),
        rows: incoming
            .rows
            .into_iter()
            .map(|row| {
                shared
                    .iter()
                    .map(|&(i, not_null)| match &row[i] {
                        Value::Null if not_null && empty_as_text => Value::Text(String::new()),
                        value => value.clone(),
                    })
                    .collect()
            })
            .collect(),
    };

    let written = store.upsert_rows(table, &rows)?;
    info!(file = %file.display(), table, rows = written, "Data imported");
    Ok(written)
}

fn read_json_rows(file: &Path) -> BackupResult<TableRows> {
    let reader = BufReader::new(File::open(file)?);
    let data: serde_json::Value = serde_json::from_reader(reader)
        .map_err(|e| BackupError::Import(format!("Invalid JSON in {}: {}", file.display(), e)))?;

    let objects = match data.as_array() {
        Some(items) if !items.is_empty() => items,
        _ => {
            return Err(BackupError::Import(format!(
                "{} must contain a non-empty array of objects",
                file.display()
            )))
        }
    };

    let mut records = Vec::with_capacity(objects.len());
    let mut columns: Vec<String> = Vec::new();
    for item in objects {
        let object = item.as_object().ok_or_else(|| {
            BackupError::Import(format!("{} contains a non-object row", file.display()))
        })?;
        // Union of keys, in first-seen order
        for key in object.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        records.push(object);
    }

    let mut rows = Vec::with_capacity(records.len());
    for object in records {
        rows.push(
            columns
                .iter()
                .map(|c| object.get(c).map(sql_value).unwrap_or(Value::Null))
                .collect(),
        );
    }

    Ok(TableRows { columns, rows })
}

fn read_csv_rows(file: &Path) -> BackupResult<TableRows> {
    let mut reader = csv::Reader::from_path(file)?;
    let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            (0..columns.len())
                .map(|i| match record.get(i) {
                    None | Some("") => Value::Null,
                    Some(cell) => Value::Text(cell.to_string()),
                })
                .collect(),
        );
    }

    Ok(TableRows { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::fixtures::create_ledger_db;
    use crate::storage::SqliteStore;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn export_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_json_export_skips_empty_tables() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("live.db"));
        let export_dir = temp_dir.path().join("exports");
        let only = vec!["notes".to_string(), "transactions".to_string()];

        let summary =
            export_tables(&store, &export_dir, ExportFormat::Json, Some(&only), export_time())
                .unwrap();

        let archive_path = summary.archive.unwrap();
        assert_eq!(archive_path, export_dir.join("export_20240301_093000.zip"));
        assert_eq!(
            archive::entry_names(&archive_path).unwrap(),
            vec!["transactions.json"]
        );
        assert_eq!(summary.skipped, vec!["notes"]);
        // Staging directory is gone
        assert!(!export_dir.join("export_20240301_093000").exists());
    }

    #[test]
    fn test_export_with_only_empty_tables_produces_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("live.db"));
        let export_dir = temp_dir.path().join("exports");
        let only = vec!["notes".to_string()];

        let summary =
            export_tables(&store, &export_dir, ExportFormat::Csv, Some(&only), export_time())
                .unwrap();

        assert!(summary.archive.is_none());
        assert_eq!(fs::read_dir(&export_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_export_unknown_table_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("live.db"));
        let only = vec!["budgets".to_string()];

        let err = export_tables(
            &store,
            &temp_dir.path().join("exports"),
            ExportFormat::Csv,
            Some(&only),
            export_time(),
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_csv_round_trip_into_fresh_database() {
        let temp_dir = TempDir::new().unwrap();
        let source = create_ledger_db(&temp_dir.path().join("live.db"));
        let summary = export_tables(
            &source,
            &temp_dir.path().join("exports"),
            ExportFormat::Csv,
            None,
            export_time(),
        )
        .unwrap();
        assert_eq!(summary.tables, vec!["categories", "transactions"]);

        let target = SqliteStore::create(temp_dir.path().join("target.db")).unwrap();
        for table in ["transactions", "categories"] {
            target
                .create_table(&source.table_schema(table).unwrap().unwrap())
                .unwrap();
        }

        let imported = import_archive(
            &target,
            summary.archive.as_ref().unwrap(),
            &temp_dir.path().join("scratch"),
        )
        .unwrap();

        assert_eq!(imported.total_rows(), 5);
        assert_eq!(
            target.fetch_rows("transactions", None).unwrap(),
            source.fetch_rows("transactions", None).unwrap()
        );
        assert!(!temp_dir.path().join("scratch").exists());
    }

    #[test]
    fn test_import_json_intersects_columns_and_upserts() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("live.db"));
        let file = temp_dir.path().join("categories.json");
        fs::write(
            &file,
            r#"[{"id": 2, "name": "Rent", "colour": "red"}, {"id": 9, "name": "Travel"}]"#,
        )
        .unwrap();

        assert_eq!(import_file(&store, &file, "categories").unwrap(), 2);

        let rows = store.fetch_rows("categories", None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.rows[1][1], Value::Text("Rent".into()));
    }

    #[test]
    fn test_import_json_takes_keys_from_every_row() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("live.db"));
        let file = temp_dir.path().join("notes.json");
        fs::write(&file, r#"[{"id": 1}, {"id": 2, "body": "call the bank"}]"#).unwrap();

        assert_eq!(import_file(&store, &file, "notes").unwrap(), 2);

        let rows = store.fetch_rows("notes", None).unwrap();
        assert_eq!(rows.rows[0][1], Value::Null);
        assert_eq!(rows.rows[1][1], Value::Text("call the bank".into()));
    }

    #[test]
    fn test_csv_keeps_empty_strings_in_not_null_columns() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::create(temp_dir.path().join("memos.db")).unwrap();
        store
            .create_table(
                "CREATE TABLE memos (id INTEGER PRIMARY KEY, title TEXT NOT NULL, detail TEXT)",
            )
            .unwrap();
        let original = TableRows {
            columns: vec!["id".into(), "title".into(), "detail".into()],
            rows: vec![
                vec![Value::Integer(1), Value::Text(String::new()), Value::Null],
                vec![
                    Value::Integer(2),
                    Value::Text("Rent".into()),
                    Value::Text("due friday".into()),
                ],
            ],
        };
        store.upsert_rows("memos", &original).unwrap();

        let summary = export_tables(
            &store,
            &temp_dir.path().join("exports"),
            ExportFormat::Csv,
            None,
            export_time(),
        )
        .unwrap();
        rusqlite::Connection::open(store.path())
            .unwrap()
            .execute("DELETE FROM memos", [])
            .unwrap();

        import_archive(
            &store,
            summary.archive.as_ref().unwrap(),
            &temp_dir.path().join("scratch"),
        )
        .unwrap();

        assert_eq!(store.fetch_rows("memos", None).unwrap(), original);
    }

    #[test]
    fn test_import_rejects_bad_input() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("live.db"));

        let empty = temp_dir.path().join("categories.json");
        fs::write(&empty, "[]").unwrap();
        assert!(import_file(&store, &empty, "categories").is_err());

        let unrelated = temp_dir.path().join("other.csv");
        fs::write(&unrelated, "foo,bar\n1,2\n").unwrap();
        assert!(import_file(&store, &unrelated, "categories").is_err());

        let text = temp_dir.path().join("notes.txt");
        fs::write(&text, "hello").unwrap();
        assert!(import_file(&store, &text, "notes").is_err());

        let good = temp_dir.path().join("good.csv");
        fs::write(&good, "id,name\n5,Misc\n").unwrap();
        assert!(import_file(&store, &good, "budgets").unwrap_err().is_not_found());
    }

    #[test]
    fn test_value_mapping() {
        assert_eq!(csv_field(&Value::Null), "");
        assert_eq!(csv_field(&Value::Blob(vec![1, 2, 3])), "AQID");
        assert_eq!(json_value(&Value::Integer(7)), serde_json::json!(7));
        assert_eq!(sql_value(&serde_json::json!(true)), Value::Integer(1));
        assert_eq!(sql_value(&serde_json::json!(1.5)), Value::Real(1.5));
    }
}
