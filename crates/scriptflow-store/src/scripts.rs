//! Script catalog: the registry that turns a script id into a file on disk.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use scriptflow_core::ScriptId;
use tracing::{info, instrument};

use crate::db::{parse_ts, ts};
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{NewScript, ScriptEntry};

const SELECT_COLUMNS: &str =
    "SELECT id, name, path, description, interpreter, created_at FROM scripts";

impl Store {
    /// Register a script file. The path must exist and is stored absolute.
    ///
    /// # Errors
    ///
    /// `InvalidScript` when the path does not exist, is not a file, or is
    /// already registered.
    #[instrument(skip(self, new), fields(path = %new.path.display()))]
    pub fn register_script(&self, new: NewScript) -> Result<ScriptEntry> {
        let path = std::fs::canonicalize(&new.path).map_err(|e| {
            StoreError::InvalidScript(format!("{}: {e}", new.path.display()))
        })?;
        if !path.is_file() {
            return Err(StoreError::InvalidScript(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let name = new
            .name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                path.file_name()
                    .map(|f| f.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| path.display().to_string());

        let entry = ScriptEntry {
            id: ScriptId::new(),
            name,
            path,
            description: new.description,
            interpreter: new.interpreter.filter(|i| !i.trim().is_empty()),
            created_at: Utc::now(),
        };

        let db = self.conn()?;
        let inserted = db.execute(
            "INSERT INTO scripts (id, name, path, description, interpreter, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id.as_str(),
                entry.name,
                entry.path.to_string_lossy().into_owned(),
                entry.description,
                entry.interpreter,
                ts(&entry.created_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::InvalidScript(format!(
                    "{} is already registered",
                    entry.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }
        info!(script_id = %entry.id, name = %entry.name, "script registered");
        Ok(entry)
    }

    #[instrument(skip(self), fields(script_id = %id))]
    pub fn get_script(&self, id: &ScriptId) -> Result<Option<ScriptEntry>> {
        let db = self.conn()?;
        let entry = db
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
                row_to_script,
            )
            .optional()?;
        Ok(entry)
    }

    #[instrument(skip(self))]
    pub fn list_scripts(&self) -> Result<Vec<ScriptEntry>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("{SELECT_COLUMNS} ORDER BY name ASC"))?;
        let rows = stmt.query_map([], row_to_script)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Remove a script from the catalog. Existing execution records and
    /// schedules keep the dangling id; schedules fail when they next fire.
    #[instrument(skip(self), fields(script_id = %id))]
    pub fn remove_script(&self, id: &ScriptId) -> Result<()> {
        let db = self.conn()?;
        let changed = db.execute("DELETE FROM scripts WHERE id = ?1", params![id.as_str()])?;
        if changed == 0 {
            return Err(StoreError::ScriptNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

fn row_to_script(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScriptEntry> {
    let path: String = row.get(2)?;
    let created_at: String = row.get(5)?;
    Ok(ScriptEntry {
        id: row.get::<_, String>(0)?.into(),
        name: row.get(1)?,
        path: path.into(),
        description: row.get(3)?,
        interpreter: row.get(4)?,
        created_at: parse_ts(5, &created_at)?,
    })
}
