//! Schedule definition persistence.
//!
//! The scheduling loop and the management API write to the same rows. The
//! loop owns `next_due`, `last_run` and the failure streak. API updates
//! rewrite the editable columns and `next_due`, but only ever reset the
//! streak inside the same statement, never write it from an earlier read.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use scriptflow_core::{ExecutionState, ScheduleDefinition, ScheduleId, ScheduleRule};
use tracing::{debug, instrument};

use crate::db::{opt_ts, parse_opt_ts, parse_ts, ts};
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::ScheduleStats;

const SELECT_COLUMNS: &str = "SELECT id, script_id, name, description, rule, active,
        consecutive_failures, next_due, last_run, created_at, updated_at
     FROM schedules";

impl Store {
    #[instrument(skip(self, def), fields(schedule_id = %def.id, script_id = %def.script_id))]
    pub fn insert_schedule(&self, def: &ScheduleDefinition) -> Result<()> {
        let rule = serde_json::to_string(&def.rule)?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO schedules
             (id, script_id, name, description, rule, active, consecutive_failures,
              next_due, last_run, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                def.id.as_str(),
                def.script_id.as_str(),
                def.name,
                def.description,
                rule,
                def.active,
                def.consecutive_failures,
                opt_ts(&def.next_due),
                opt_ts(&def.last_run),
                ts(&def.created_at),
                ts(&def.updated_at),
            ],
        )?;
        debug!("schedule inserted");
        Ok(())
    }

    /// Overwrite the user-editable fields of a schedule together with the
    /// recomputed `next_due`, and return the stored row.
    ///
    /// `def.consecutive_failures` is ignored. The counter is zeroed when
    /// `reset_failures` is set or when the update turns an inactive row
    /// active; otherwise the value last written by the loop is kept.
    #[instrument(skip(self, def), fields(schedule_id = %def.id))]
    pub fn update_schedule(
        &self,
        def: &ScheduleDefinition,
        reset_failures: bool,
    ) -> Result<ScheduleDefinition> {
        let rule = serde_json::to_string(&def.rule)?;
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE schedules
             SET script_id            = ?1,
                 name                 = ?2,
                 description          = ?3,
                 rule                 = ?4,
                 consecutive_failures = CASE WHEN ?6 OR (?5 AND active = 0)
                                             THEN 0 ELSE consecutive_failures END,
                 active               = ?5,
                 next_due             = ?7,
                 updated_at           = ?8
             WHERE id = ?9",
            params![
                def.script_id.as_str(),
                def.name,
                def.description,
                rule,
                def.active,
                reset_failures,
                opt_ts(&def.next_due),
                ts(&def.updated_at),
                def.id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::ScheduleNotFound {
                id: def.id.to_string(),
            });
        }
        let stored = db.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![def.id.as_str()],
            row_to_schedule,
        )?;
        Ok(stored)
    }

    /// Returns `false` when no such schedule existed.
    #[instrument(skip(self), fields(schedule_id = %id))]
    pub fn delete_schedule(&self, id: &ScheduleId) -> Result<bool> {
        let db = self.conn()?;
        let changed = db.execute("DELETE FROM schedules WHERE id = ?1", params![id.as_str()])?;
        Ok(changed > 0)
    }

    #[instrument(skip(self), fields(schedule_id = %id))]
    pub fn get_schedule(&self, id: &ScheduleId) -> Result<Option<ScheduleDefinition>> {
        let db = self.conn()?;
        let def = db
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
                row_to_schedule,
            )
            .optional()?;
        Ok(def)
    }

    /// All schedules, ordered by creation time.
    #[instrument(skip(self))]
    pub fn list_schedules(&self) -> Result<Vec<ScheduleDefinition>> {
        self.query_schedules(&format!("{SELECT_COLUMNS} ORDER BY created_at ASC"))
    }

    /// Active schedules, soonest due first.
    #[instrument(skip(self))]
    pub fn list_active_schedules(&self) -> Result<Vec<ScheduleDefinition>> {
        self.query_schedules(&format!(
            "{SELECT_COLUMNS} WHERE active = 1 ORDER BY next_due ASC"
        ))
    }

    /// Record that the schedule fired at `last_run` and is next due at
    /// `next_due`.
    #[instrument(skip(self), fields(schedule_id = %id))]
    pub fn record_firing(
        &self,
        id: &ScheduleId,
        last_run: DateTime<Utc>,
        next_due: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "UPDATE schedules SET last_run = ?1, next_due = ?2 WHERE id = ?3",
            params![ts(&last_run), opt_ts(&next_due), id.as_str()],
        )?;
        Ok(())
    }

    /// Move `next_due` without recording a run (startup recompute).
    #[instrument(skip(self), fields(schedule_id = %id))]
    pub fn set_next_due(&self, id: &ScheduleId, next_due: Option<DateTime<Utc>>) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "UPDATE schedules SET next_due = ?1 WHERE id = ?2",
            params![opt_ts(&next_due), id.as_str()],
        )?;
        Ok(())
    }

    /// Persist the failure streak after a firing resolves. Deactivation
    /// clears `next_due` and keeps the counter.
    #[instrument(skip(self), fields(schedule_id = %id))]
    pub fn record_failure_streak(
        &self,
        id: &ScheduleId,
        consecutive_failures: u32,
        active: bool,
    ) -> Result<()> {
        let db = self.conn()?;
        if active {
            db.execute(
                "UPDATE schedules SET consecutive_failures = ?1 WHERE id = ?2",
                params![consecutive_failures, id.as_str()],
            )?;
        } else {
            db.execute(
                "UPDATE schedules
                 SET consecutive_failures = ?1, active = 0, next_due = NULL, updated_at = ?2
                 WHERE id = ?3",
                params![consecutive_failures, ts(&Utc::now()), id.as_str()],
            )?;
        }
        Ok(())
    }

    /// Execution counts for a schedule since `since`.
    #[instrument(skip(self), fields(schedule_id = %id))]
    pub fn schedule_stats(
        &self,
        id: &ScheduleId,
        since: DateTime<Utc>,
        window_days: u32,
    ) -> Result<ScheduleStats> {
        let db = self.conn()?;
        let (total, completed, finished): (i64, i64, i64) = db.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(state = 'completed'), 0),
                    COALESCE(SUM(state NOT IN ('pending', 'running')), 0)
             FROM executions
             WHERE schedule_id = ?1 AND created_at >= ?2",
            params![id.as_str(), ts(&since)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let last_state: Option<String> = db
            .query_row(
                "SELECT state FROM executions WHERE schedule_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let success_rate = if finished > 0 {
            (completed as f64 / finished as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Ok(ScheduleStats {
            total: total as u64,
            completed: completed as u64,
            success_rate,
            last_state: last_state.and_then(|s| s.parse::<ExecutionState>().ok()),
            window_days,
        })
    }

    fn query_schedules(&self, sql: &str) -> Result<Vec<ScheduleDefinition>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map([], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleDefinition> {
    let rule_json: String = row.get(4)?;
    let rule: ScheduleRule = serde_json::from_str(&rule_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(ScheduleDefinition {
        id: row.get::<_, String>(0)?.into(),
        script_id: row.get::<_, String>(1)?.into(),
        name: row.get(2)?,
        description: row.get(3)?,
        rule,
        active: row.get(5)?,
        consecutive_failures: row.get::<_, i64>(6)? as u32,
        next_due: parse_opt_ts(7, row.get(7)?)?,
        last_run: parse_opt_ts(8, row.get(8)?)?,
        created_at: parse_ts(9, &created_at)?,
        updated_at: parse_ts(10, &updated_at)?,
    })
}
