//! SQLite data store
//!
//! The backup engine treats the live database through the [`DataStore`]
//! trait: table enumeration, schema introspection, row fetch/upsert, and a
//! consistent full snapshot. [`SqliteStore`] is the implementation over a
//! single SQLite file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags, OptionalExtension};

use crate::error::{BackupError, BackupResult};

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Column metadata from `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Declared type (may be empty)
    pub decl_type: String,
    /// Whether the column is declared `NOT NULL`
    pub not_null: bool,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
}

/// Restricts a fetch to rows whose `column >= since`
#[derive(Debug, Clone)]
pub struct RowFilter {
    /// Column to compare against
    pub column: String,
    /// Inclusive lower bound, compared as SQLite values
    pub since: String,
}

/// A batch of rows with their column names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRows {
    /// Column names, in row order
    pub columns: Vec<String>,
    /// Row values
    pub rows: Vec<Vec<Value>>,
}

impl TableRows {
    /// Number of rows in the batch
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Access to the live relational database
pub trait DataStore: Send + Sync {
    /// Path of the database file
    fn path(&self) -> &Path;

    /// Whether the database file exists
    fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Names of all user tables
    ///
    /// Virtual tables are listed; their shadow tables are not, since
    /// recreating a virtual table recreates its shadows.
    fn table_names(&self) -> BackupResult<Vec<String>>;

    /// `CREATE TABLE` statement for a table, if it exists
    fn table_schema(&self, table: &str) -> BackupResult<Option<String>>;

    /// Column metadata for a table
    fn table_columns(&self, table: &str) -> BackupResult<Vec<ColumnInfo>>;

    /// Fetch rows from a table, optionally restricted by a filter
    fn fetch_rows(&self, table: &str, filter: Option<&RowFilter>) -> BackupResult<TableRows>;

    /// Execute a `CREATE TABLE` statement
    fn create_table(&self, schema_sql: &str) -> BackupResult<()>;

    /// Insert rows, replacing any existing row with the same key
    ///
    /// All rows are written in a single transaction.
    fn upsert_rows(&self, table: &str, rows: &TableRows) -> BackupResult<usize>;

    /// Write a consistent full copy of the database to `dest`
    fn snapshot_to(&self, dest: &Path) -> BackupResult<()>;
}

/// [`DataStore`] over a single SQLite file
///
/// Holds only the path; every call opens its own connection, so the store is
/// cheap to clone and safe to share across threads.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Point a store at an existing (or future) database file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create the database file if it does not exist yet
    pub fn create(path: impl Into<PathBuf>) -> BackupResult<Self> {
        let store = Self::new(path);
        store.connect(true)?;
        Ok(store)
    }

    /// Check that a file is a healthy SQLite database
    pub fn quick_check(path: &Path) -> BackupResult<()> {
        if !path.exists() {
            return Err(BackupError::file_not_found(path));
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| {
                BackupError::Verification(format!("{} is not readable: {}", path.display(), e))
            })?;

        let status: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|e| {
                BackupError::Verification(format!(
                    "{} is not a valid database: {}",
                    path.display(),
                    e
                ))
            })?;

        if status == "ok" {
            Ok(())
        } else {
            Err(BackupError::Verification(format!(
                "{} failed integrity check: {}",
                path.display(),
                status
            )))
        }
    }

    /// Count rows in a table
    pub fn row_count(&self, table: &str) -> BackupResult<i64> {
        let conn = self.connect(false)?;
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn connect(&self, create: bool) -> BackupResult<Connection> {
        if !create && !self.path.exists() {
            return Err(BackupError::file_not_found(&self.path));
        }

        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| {
            BackupError::Database(format!("Failed to open {}: {}", self.path.display(), e))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl DataStore for SqliteStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn table_names(&self) -> BackupResult<Vec<String>> {
        let conn = self.connect(false)?;
        let mut stmt = conn.prepare(
            "SELECT name FROM pragma_table_list \
             WHERE schema = 'main' AND type IN ('table', 'virtual') \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn table_schema(&self, table: &str) -> BackupResult<Option<String>> {
        let conn = self.connect(false)?;
        let sql = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(sql.flatten())
    }

    fn table_columns(&self, table: &str) -> BackupResult<Vec<ColumnInfo>> {
        let conn = self.connect(false)?;
        let mut stmt =
            conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)")?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    decl_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    not_null: row.get::<_, i64>(2)? != 0,
                    primary_key: row.get::<_, i64>(3)? > 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn fetch_rows(&self, table: &str, filter: Option<&RowFilter>) -> BackupResult<TableRows> {
        let conn = self.connect(false)?;

        let mut sql = format!("SELECT * FROM {}", quote_ident(table));
        let mut bind = Vec::new();
        if let Some(filter) = filter {
            sql.push_str(&format!(" WHERE {} >= ?1", quote_ident(&filter.column)));
            bind.push(Value::Text(filter.since.clone()));
        }

        let mut stmt = conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query(params_from_iter(bind.iter()))?;
        while let Some(row) = cursor.next()? {
            let values = (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(values);
        }

        Ok(TableRows { columns, rows })
    }

    fn create_table(&self, schema_sql: &str) -> BackupResult<()> {
        let conn = self.connect(true)?;
        conn.execute_batch(schema_sql)?;
        Ok(())
    }

    fn upsert_rows(&self, table: &str, rows: &TableRows) -> BackupResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect(false)?;
        let column_list = rows
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=rows.columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(table),
            column_list,
            placeholders
        );

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in &rows.rows {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        Ok(rows.len())
    }

    fn snapshot_to(&self, dest: &Path) -> BackupResult<()> {
        let src = self.connect(false)?;
        let mut dst = Connection::open(dest).map_err(|e| {
            BackupError::Creation(format!("Failed to create {}: {}", dest.display(), e))
        })?;

        let backup = Backup::new(&src, &mut dst)
            .map_err(|e| BackupError::Creation(format!("Failed to initialize snapshot: {}", e)))?;
        backup
            .step(-1)
            .map_err(|e| BackupError::Creation(format!("Snapshot failed: {}", e)))?;

        Ok(())
    }
}

/// Quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}


#[cfg(test)]
mod tests {
    use super::fixtures::create_ledger_db;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_table_introspection() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("ledger.db"));

        assert_eq!(
            store.table_names().unwrap(),
            vec!["categories", "notes", "transactions"]
        );

        let columns = store.table_columns("transactions").unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "payee", "amount", "updated_at"]);
        assert!(columns[0].primary_key);
        assert!(!columns[1].primary_key);
        assert!(columns[1].not_null);
        assert!(!store.table_columns("notes").unwrap()[1].not_null);

        let schema = store.table_schema("categories").unwrap().unwrap();
        assert!(schema.starts_with("CREATE TABLE categories"));
        assert!(store.table_schema("missing").unwrap().is_none());
    }

    #[test]
    fn test_table_names_skip_fts_shadow_tables() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("ledger.db"));
        Connection::open(store.path())
            .unwrap()
            .execute_batch(
                "CREATE VIRTUAL TABLE search USING fts5(body);
                 INSERT INTO search (body) VALUES ('rent for march');",
            )
            .unwrap();

        assert_eq!(
            store.table_names().unwrap(),
            vec!["categories", "notes", "search", "transactions"]
        );
        let schema = store.table_schema("search").unwrap().unwrap();
        assert!(schema.starts_with("CREATE VIRTUAL TABLE search"));
    }

    #[test]
    fn test_fetch_rows_with_filter() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("ledger.db"));

        let conn = Connection::open(store.path()).unwrap();
        conn.execute(
            "UPDATE transactions SET updated_at = '2030-06-01 12:00:00' WHERE id = 2",
            [],
        )
        .unwrap();

        let all = store.fetch_rows("transactions", None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.columns[1], "payee");

        let filter = RowFilter {
            column: "updated_at".into(),
            since: "2030-01-01 00:00:00".into(),
        };
        let changed = store.fetch_rows("transactions", Some(&filter)).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed.rows[0][0], Value::Integer(2));
    }

    #[test]
    fn test_upsert_replaces_by_primary_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("ledger.db"));

        let rows = TableRows {
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                vec![Value::Integer(2), Value::Text("Rent".into())],
                vec![Value::Integer(3), Value::Text("Fun".into())],
            ],
        };
        assert_eq!(store.upsert_rows("categories", &rows).unwrap(), 2);

        let fetched = store.fetch_rows("categories", None).unwrap();
        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched.rows[1][1], Value::Text("Rent".into()));
    }

    #[test]
    fn test_snapshot_and_quick_check() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_ledger_db(&temp_dir.path().join("ledger.db"));
        let copy = temp_dir.path().join("copy.db");

        store.snapshot_to(&copy).unwrap();

        SqliteStore::quick_check(&copy).unwrap();
        assert_eq!(SqliteStore::new(&copy).row_count("transactions").unwrap(), 3);
    }

    #[test]
    fn test_quick_check_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("garbage.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

        let err = SqliteStore::quick_check(&path).unwrap_err();
        assert!(err.is_verification());
    }

    #[test]
    fn test_missing_database_is_not_created() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.db");
        let store = SqliteStore::new(&path);

        assert!(store.table_names().unwrap_err().is_not_found());
        assert!(!path.exists());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
