//! Persistence settings for the service registry.

use std::path::PathBuf;

use serde::Deserialize;

/// Which datastore backs the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// A SQLite database file inside `data_dir`.
    #[default]
    Sqlite,
    /// Process-local tables, lost on exit.
    Memory,
}

/// Registry persistence configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// The datastore implementation.
    pub kind: StoreKind,
    /// Directory holding the database and the PID file.
    pub data_dir: PathBuf,
    /// Database file name, relative to `data_dir`.
    pub database: String,
}

impl StoreConfig {
    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Sqlite,
            data_dir: PathBuf::from("./data"),
            database: "aog.db".to_string(),
        }
    }
}
