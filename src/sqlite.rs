//! The database handle: one SQLite connection plus the `self` meta table convention.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, params_from_iter, Connection, ErrorCode, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::schema::{quote_identifier, Schema, TableDefinition};
use crate::value::{Row, Value};

/// Name of the key/value meta table every database carries.
pub const META_TABLE: &str = "self";
/// Meta key holding the schema version.
pub const VERSION_KEY: &str = "version";

/// Rows keyed by their first column, remaining columns keyed by label.
pub type TableDict = HashMap<Value, HashMap<String, Value>>;

/// An open database file stamped with a schema version.
///
/// Mutating helpers other than [`Database::create_table`], [`Database::insert_row`]
/// and [`Database::insert_rows`] commit before returning. Once [`Database::disconnect`] has run every operation
/// fails with [`Error::Closed`]. Dropping an open handle closes the connection and
/// rolls back anything not yet committed.
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    version: String,
    conn: Option<Connection>,
}

impl Database {
    /// Open `path`, or create it from scratch when `create_new` is set.
    pub fn open(path: impl AsRef<Path>, version: &str, create_new: bool) -> Result<Self> {
        let config = DatabaseConfig::new(path.as_ref(), version).with_create_new(create_new);
        Self::open_with_config(&config)
    }

    /// Open or create the database described by `config`.
    pub fn open_with_config(config: &DatabaseConfig) -> Result<Self> {
        let path = config.path.clone();
        if config.create_new {
            // Reject a bad schema before the old file is gone.
            for table in &config.schema.tables {
                table.create_statement()?;
            }
            remove_existing(&path)?;
            let conn = Connection::open(&path)?;
            conn.busy_timeout(config.busy_timeout())?;
            set_journal_mode(&conn, config)?;

            let mut db = Self {
                path,
                version: config.version.clone(),
                conn: Some(conn),
            };
            db.initialize(&config.schema)?;
            info!(path = %db.path.display(), version = %db.version, "created database");
            return Ok(db);
        }

        if !path.exists() {
            return Err(Error::not_a_database(&path, "file does not exist"));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&path, flags)?;
        conn.busy_timeout(config.busy_timeout())?;

        let found = read_stored_version(&conn, &path)?;
        if found != config.version {
            return Err(Error::IncompatibleVersion {
                expected: config.version.clone(),
                found,
            });
        }
        set_journal_mode(&conn, config)?;

        info!(path = %path.display(), version = %found, "opened database");
        Ok(Self {
            path,
            version: found,
            conn: Some(conn),
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The schema version cached at open.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// True once [`Database::disconnect`] has run.
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::Closed)
    }

    fn initialize(&mut self, schema: &Schema) -> Result<()> {
        self.begin_pending()?;
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "CREATE TABLE {} (key TEXT, value TEXT)",
            quote_identifier(META_TABLE)?
        ))?;
        conn.execute(
            "INSERT INTO \"self\" (key, value) VALUES (?1, ?2)",
            params![VERSION_KEY, self.version],
        )?;
        for table in &schema.tables {
            self.create_table_from(table)?;
        }
        self.commit()
    }

    /// Opens a write transaction unless one is already pending.
    fn begin_pending(&self) -> Result<()> {
        let conn = self.conn()?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Create a table from paired field names and types.
    ///
    /// The statement joins the pending transaction; nothing is committed until
    /// [`Database::commit`] or the next committing helper.
    pub fn create_table<N, T>(&mut self, name: &str, field_names: &[N], field_types: &[T]) -> Result<()>
    where
        N: AsRef<str>,
        T: AsRef<str>,
    {
        let table = TableDefinition::from_fields(name, field_names, field_types)?;
        self.create_table_from(&table)
    }

    pub fn create_table_from(&mut self, table: &TableDefinition) -> Result<()> {
        let sql = table.create_statement()?;
        self.begin_pending()?;
        self.conn()?.execute_batch(&sql)?;
        debug!(table = %table.name, columns = table.columns.len(), "created table");
        Ok(())
    }

    /// Append a `(key, value)` row to the meta table and commit.
    ///
    /// Repeated keys accumulate rows; see [`Database::replace_meta_value`] for upsert.
    pub fn set_meta_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO \"self\" (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        self.commit()
    }

    /// Value of the first meta row for `key`, in engine order.
    pub fn get_meta_value(&self, key: &str) -> Result<String> {
        let value: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT CAST(value AS TEXT) FROM \"self\" WHERE key = ?1 LIMIT 1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        value.flatten().ok_or_else(|| Error::NotFound {
            key: key.to_string(),
        })
    }

    /// Every value stored under `key`, in engine order.
    pub fn get_meta_values(&self, key: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT CAST(value AS TEXT) FROM \"self\" WHERE key = ?1")?;
        let values = stmt
            .query_map([key], |row| row.get::<_, Option<String>>(0))?
            .filter_map(|v| v.transpose())
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values)
    }

    /// Replace every row for `key` with a single row and commit.
    pub fn replace_meta_value(&mut self, key: &str, value: &str) -> Result<()> {
        guard_version_key(key)?;
        self.begin_pending()?;
        let conn = self.conn()?;
        conn.execute("DELETE FROM \"self\" WHERE key = ?1", [key])?;
        conn.execute(
            "INSERT INTO \"self\" (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        self.commit()
    }

    /// Remove every row for `key` and commit. Returns the number of rows removed.
    pub fn delete_meta_value(&mut self, key: &str) -> Result<usize> {
        guard_version_key(key)?;
        let removed = self
            .conn()?
            .execute("DELETE FROM \"self\" WHERE key = ?1", [key])?;
        self.commit()?;
        Ok(removed)
    }

    /// Append a row to a user table. Pending until the next commit.
    pub fn insert_row(&mut self, table: &str, values: &[Value]) -> Result<()> {
        if values.is_empty() {
            return Err(Error::Schema(format!("insert into {table} with no values")));
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} VALUES ({placeholders})",
            quote_identifier(table)?
        );
        self.begin_pending()?;
        self.conn()?.execute(&sql, params_from_iter(values.iter()))?;
        Ok(())
    }

    /// Append many rows to a user table through one prepared statement.
    ///
    /// Every row must have the width of the first. Pending until the next commit.
    pub fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let width = first.len();
        if width == 0 {
            return Err(Error::Schema(format!("insert into {table} with no values")));
        }
        if let Some(bad) = rows.iter().position(|row| row.len() != width) {
            return Err(Error::Schema(format!(
                "insert into {table}: row {bad} has {} values, expected {width}",
                rows[bad].len()
            )));
        }
        let placeholders = vec!["?"; width].join(", ");
        let sql = format!(
            "INSERT INTO {} VALUES ({placeholders})",
            quote_identifier(table)?
        );
        self.begin_pending()?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        for row in rows {
            stmt.execute(params_from_iter(row.iter()))?;
        }
        debug!(table = %table, rows = rows.len(), "inserted rows");
        Ok(())
    }

    /// Flush pending writes. A no-op when nothing is pending.
    pub fn commit(&mut self) -> Result<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
            debug!(path = %self.path.display(), "committed");
        }
        Ok(())
    }

    /// Commit and release the connection.
    pub fn disconnect(&mut self) -> Result<()> {
        self.commit()?;
        let conn = self.conn.take().ok_or(Error::Closed)?;
        conn.close().map_err(|(_, err)| Error::Sqlite(err))?;
        info!(path = %self.path.display(), "disconnected");
        Ok(())
    }

    /// Every row of `table`, in storage order.
    pub fn get_all_rows(&self, table: &str) -> Result<Vec<Row>> {
        let (_, rows) = self.select_all(table)?;
        Ok(rows)
    }

    /// Rows of `table` keyed by their first column.
    ///
    /// `column_names[0]` labels the key column and is otherwise unused; the
    /// remaining labels name the other columns in order. With fewer labels than
    /// columns the trailing columns are left out. Later rows with a repeated key
    /// replace earlier ones.
    pub fn get_table_as_dict<S: AsRef<str>>(&self, table: &str, column_names: &[S]) -> Result<TableDict> {
        let (width, rows) = self.select_all(table)?;
        if column_names.is_empty() || column_names.len() > width {
            return Err(Error::Schema(format!(
                "table {table} has {width} columns but {} labels were given",
                column_names.len()
            )));
        }

        let mut dict = TableDict::with_capacity(rows.len());
        for row in rows {
            let mut cells = row.into_iter();
            let Some(key) = cells.next() else { continue };
            let named = column_names[1..]
                .iter()
                .map(|n| n.as_ref().to_string())
                .zip(cells)
                .collect();
            dict.insert(key, named);
        }
        Ok(dict)
    }

    fn select_all(&self, table: &str) -> Result<(usize, Vec<Row>)> {
        let sql = format!("SELECT * FROM {}", quote_identifier(table)?);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let width = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Row>>()
            })?
            .collect::<rusqlite::Result<Vec<Row>>>()?;
        Ok((width, rows))
    }

    /// Names of user tables, the meta table included, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        table_exists(self.conn()?, name).map_err(Error::from)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(conn) = &self.conn {
            if !conn.is_autocommit() {
                warn!(path = %self.path.display(), "database dropped with uncommitted writes; rolling back");
            }
        }
    }
}

fn remove_existing(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed existing database file");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn set_journal_mode(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
    // journal_mode answers with the resulting mode, so it has to be read as a row.
    let _mode: String = conn.query_row(
        &format!("PRAGMA journal_mode = {}", config.journal_mode.pragma_value()),
        [],
        |row| row.get(0),
    )?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )
}

fn read_stored_version(conn: &Connection, path: &Path) -> Result<String> {
    let has_meta = table_exists(conn, META_TABLE).map_err(|err| classify_open_error(path, err))?;
    if !has_meta {
        return Err(Error::not_a_database(path, "missing `self` meta table"));
    }
    let version: Option<Option<String>> = conn
        .query_row(
            "SELECT CAST(value AS TEXT) FROM \"self\" WHERE key = ?1 LIMIT 1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| classify_open_error(path, err))?;
    version
        .flatten()
        .ok_or_else(|| Error::not_a_database(path, "no version row in `self`"))
}

fn classify_open_error(path: &Path, err: rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) => Error::not_a_database(path, err.to_string()),
        _ => Error::Sqlite(err),
    }
}

fn guard_version_key(key: &str) -> Result<()> {
    if key == VERSION_KEY {
        return Err(Error::Schema(format!(
            "meta key {VERSION_KEY:?} is written only when the database is created"
        )));
    }
    Ok(())
}
