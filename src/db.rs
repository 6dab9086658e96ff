use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open a pool on an existing SQLite database. The file is never created:
/// a missing database is a configuration mistake, not an empty one.
pub async fn connect_existing(db_path: &Path, read_only: bool) -> Result<SqlitePool> {
    if !db_path.is_file() {
        bail!("database file not found: {}", db_path.display());
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(false)
        .read_only(read_only)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
