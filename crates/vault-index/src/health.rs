//! Index health reporting, backing the vault's status/diagnostics surface.

use rusqlite::{params, OptionalExtension};

use crate::db::IndexDb;
use crate::error::IndexError;

pub struct IndexHealth {
    pub note_count: i64,
    pub last_full_rebuild: Option<String>,
    pub last_incremental_update: Option<String>,
}

pub fn get(db: &IndexDb, tenant: &str) -> Result<IndexHealth, IndexError> {
    let conn = db.lock();
    let row = conn
        .query_row(
            "SELECT note_count, last_full_rebuild, last_incremental_update
             FROM index_health WHERE tenant = ?1",
            params![tenant],
            |row| {
                Ok(IndexHealth {
                    note_count: row.get(0)?,
                    last_full_rebuild: row.get(1)?,
                    last_incremental_update: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(row.unwrap_or(IndexHealth {
        note_count: 0,
        last_full_rebuild: None,
        last_incremental_update: None,
    }))
}
