//! Structured query bridge: natural-language questions answered by an agent
//! that writes and runs SQL against a fixed schema.
//!
//! - [`schema`]: the static [`SchemaDescriptor`] given to the agent.
//! - [`executor`]: the [`QueryExecutor`] capability and its SQLite backend.
//! - [`agent`]: the bounded [`SqlAgent`] loop behind [`StructuredQuery`].

pub mod agent;
pub mod executor;
pub mod schema;

use std::sync::Arc;

pub use agent::{AgentConfig, SqlAgent, StructuredQuery};
pub use executor::{QueryExecutor, QueryOutcome, SqliteExecutor};
pub use schema::SchemaDescriptor;

use crate::config::DatabaseConfig;
use crate::error::{RagError, RagResult};

/// Open the executor for the configured backend.
///
/// Only SQLite ships an executor; a complete MySQL configuration is still
/// rejected.
pub async fn open_executor(config: &DatabaseConfig) -> RagResult<Arc<dyn QueryExecutor>> {
    match config.backend.as_str() {
        "sqlite" => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| RagError::config("database.path is required for the sqlite backend"))?;
            let executor = SqliteExecutor::open(path, config.read_only, config.max_rows)
                .await
                .map_err(|e| RagError::config(format!("cannot open database: {:#}", e)))?;
            Ok(Arc::new(executor))
        }
        "mysql" => Err(RagError::config(
            "no query executor is available for the mysql backend",
        )),
        other => Err(RagError::config(format!(
            "unknown database backend '{}'",
            other
        ))),
    }
}
