/// Guideline store: CRUD over named, reusable guideline texts.
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::StorageError;
use crate::model::{Guideline, MAX_GUIDELINE_NAME_CHARS};

const GUIDELINE_COLUMNS: &str = "id, name, text, created_at";

#[derive(Clone)]
pub struct GuidelineStore {
    db: Database,
}

impl GuidelineStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All guidelines, newest first.
    pub async fn list_guidelines(&self) -> Result<Vec<Guideline>, StorageError> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {GUIDELINE_COLUMNS} FROM guidelines ORDER BY created_at DESC, id DESC"
                ))?;
                let rows = stmt.query_map([], guideline_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    /// Guidelines whose id is in `ids`, newest first. Ids with no row are
    /// skipped. An empty slice returns immediately without a query.
    pub async fn list_guidelines_by_ids(&self, ids: &[i64]) -> Result<Vec<Guideline>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = ids.to_vec();
        self.db
            .call(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT {GUIDELINE_COLUMNS} FROM guidelines WHERE id IN ({placeholders}) \
                     ORDER BY created_at DESC, id DESC"
                ))?;
                let rows = stmt.query_map(params_from_iter(ids.iter()), guideline_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    pub async fn create_guideline(&self, name: &str, text: &str) -> Result<Guideline, StorageError> {
        let name = truncate_name(name);
        let text = text.to_string();
        let guideline = self
            .db
            .call(move |conn| insert_guideline(conn, &name, &text))
            .await?;
        info!(id = guideline.id, "guideline created");
        Ok(guideline)
    }

    /// Delete by id. Deleting an id that does not exist is not an error.
    pub async fn delete_guideline(&self, id: i64) -> Result<(), StorageError> {
        let deleted = self
            .db
            .call(move |conn| {
                match conn.execute("DELETE FROM guidelines WHERE id = ?1", params![id]) {
                    Ok(n) => Ok(n),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
                    {
                        Err(StorageError::GuidelineInUse(id))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        if deleted == 0 {
            debug!(id, "delete of missing guideline ignored");
        } else {
            info!(id, "guideline deleted");
        }
        Ok(())
    }
}

/// Truncate to at most 255 characters (not bytes).
pub(crate) fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_GUIDELINE_NAME_CHARS).collect()
}

/// Insert a guideline row. `name` must already be within the length limit.
pub(crate) fn insert_guideline(
    conn: &Connection,
    name: &str,
    text: &str,
) -> Result<Guideline, StorageError> {
    Ok(conn.query_row(
        &format!(
            "INSERT INTO guidelines (name, text, created_at) VALUES (?1, ?2, ?3) \
             RETURNING {GUIDELINE_COLUMNS}"
        ),
        params![name, text, Utc::now()],
        guideline_from_row,
    )?)
}

fn guideline_from_row(row: &Row<'_>) -> rusqlite::Result<Guideline> {
    Ok(Guideline {
        id: row.get("id")?,
        name: row.get("name")?,
        text: row.get("text")?,
        created_at: row.get("created_at")?,
    })
}
