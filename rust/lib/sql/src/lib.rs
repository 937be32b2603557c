pub mod config;
pub mod error;
pub mod sqlite;
pub mod traits;

pub use config::StoreConfig;
pub use error::SQLError;
pub use sqlite::SqliteStore;
pub use traits::{ExecResult, Executor, Row, SQLStore, Statement, Transaction, Value};
