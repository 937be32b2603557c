use std::path::PathBuf;

/// Connection settings for the SQLite store.
///
/// Services parse these from command-line arguments, then hand them to
/// [`crate::SqliteStore::open_with_config`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the database file.
    pub data_dir: Option<PathBuf>,

    /// Path to the SQLite database file.
    /// Defaults to `{data_dir}/data.sqlite` if not specified.
    pub sqlite_path: Option<PathBuf>,

    /// Value for `PRAGMA journal_mode`.
    pub journal_mode: String,

    /// How long a statement waits on a locked database.
    pub busy_timeout_ms: u64,

    /// Enforce declared foreign keys.
    pub foreign_keys: bool,

    /// Capacity of the compiled statement cache.
    pub statement_cache: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sqlite_path: None,
            journal_mode: "WAL".to_string(),
            busy_timeout_ms: 5000,
            foreign_keys: true,
            statement_cache: 128,
        }
    }
}

impl StoreConfig {
    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--data-dir=PATH`
    /// - `--sqlite=PATH`
    /// - `--journal-mode=MODE`
    /// - `--busy-timeout-ms=N`
    /// - `--foreign-keys=true|false`
    /// - `--statement-cache=N`
    ///
    /// Unknown flags and unparsable numbers are ignored.
    pub fn from_args(args: &[String]) -> Self {
        let mut config = StoreConfig::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--data-dir=") {
                config.data_dir = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--sqlite=") {
                config.sqlite_path = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--journal-mode=") {
                config.journal_mode = val.to_ascii_uppercase();
            } else if let Some(val) = arg.strip_prefix("--busy-timeout-ms=") {
                if let Ok(ms) = val.parse() {
                    config.busy_timeout_ms = ms;
                }
            } else if let Some(val) = arg.strip_prefix("--foreign-keys=") {
                if let Ok(on) = val.parse() {
                    config.foreign_keys = on;
                }
            } else if let Some(val) = arg.strip_prefix("--statement-cache=") {
                if let Ok(n) = val.parse() {
                    config.statement_cache = n;
                }
            }
        }

        config
    }

    /// Resolve the SQLite database path, falling back to `{data_dir}/data.sqlite`.
    pub fn resolve_sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| self.resolve_data_subpath("data.sqlite"))
    }

    fn resolve_data_subpath(&self, name: &str) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(|d| d.join(name))
            .unwrap_or_else(|| PathBuf::from(name))
    }
}
