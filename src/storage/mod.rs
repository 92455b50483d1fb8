//! Storage layer for ledger-backup
//!
//! Provides atomic file helpers and the SQLite-backed [`DataStore`].

pub mod file_io;
pub mod sqlite;

pub use file_io::{read_json, replace_file_atomic, write_json_atomic};
pub use sqlite::{quote_ident, ColumnInfo, DataStore, RowFilter, SqliteStore, TableRows};
