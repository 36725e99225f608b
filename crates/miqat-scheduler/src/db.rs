use rusqlite::Connection;

use crate::error::Result;

/// Initialise the shared-state schema in `conn`.
///
/// Both scheduler contexts open their own connection to the same file; this
/// is idempotent so whichever starts first creates the table.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv_state (
            key         TEXT    NOT NULL PRIMARY KEY,
            value       TEXT    NOT NULL,   -- JSON-encoded value
            updated_at  TEXT    NOT NULL    -- ISO-8601
        ) STRICT;
        ",
    )?;
    Ok(())
}
