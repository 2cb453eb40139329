use crate::core::error::StateError;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const SETTINGS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS settings (
        namespace TEXT NOT NULL,
        key TEXT NOT NULL,
        value BLOB NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (namespace, key)
    )
";

const BUSY_TIMEOUT_SECS: u64 = 5;

pub fn db_connect(db_path: &Path) -> Result<Connection, StateError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    Ok(conn)
}

pub fn initialize_settings_db(db_path: &Path) -> Result<(), StateError> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = db_connect(db_path)?;
    conn.execute(SETTINGS_DB_SCHEMA, [])?;
    Ok(())
}
