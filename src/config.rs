use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::schema::Schema;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite journal mode applied at open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    #[default]
    Delete,
    Wal,
}

impl JournalMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Delete => "delete",
            JournalMode::Wal => "wal",
        }
    }
}

/// Database handle configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Version stamped into (or expected from) the `self` meta table
    #[serde(deserialize_with = "version_string")]
    pub version: String,
    /// Delete any existing file and start fresh
    #[serde(default)]
    pub create_new: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// Tables created alongside the meta table when `create_new` is set
    #[serde(default)]
    pub schema: Schema,
}

impl DatabaseConfig {
    /// Create a config that opens an existing database
    pub fn new(path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
            create_new: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
            schema: Schema::default(),
        }
    }

    pub fn with_create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// Versions may be written as strings or bare numbers; both compare as text.
fn version_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}
