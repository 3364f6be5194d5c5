//! Execution record persistence and the state machine guard.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};
use scriptflow_core::{ExecutionId, ExecutionRecord, ExecutionState, TriggerCause};
use tracing::{debug, error, instrument};

use crate::db::{conversion_error, opt_ts, parse_opt_ts, parse_ts, ts};
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{ExecutionFilter, NewExecution, TransitionFields};

const DEFAULT_LIST_LIMIT: usize = 100;

const SELECT_COLUMNS: &str = "SELECT id, script_id, schedule_id, cause, attempt, state,
        created_at, started_at, finished_at, duration_ms, exit_code,
        stdout, stderr, truncated, working_dir, note
     FROM executions";

impl Store {
    /// Insert a new `pending` record.
    ///
    /// # Errors
    ///
    /// `ScheduledInFlight` when `new` is scheduled and another scheduled
    /// record for the same script is still pending or running.
    #[instrument(skip(self, new), fields(script_id = %new.script_id, trigger = %new.trigger))]
    pub fn create_execution(&self, new: NewExecution) -> Result<ExecutionRecord> {
        let record = ExecutionRecord {
            id: ExecutionId::new(),
            script_id: new.script_id,
            schedule_id: new.schedule_id,
            trigger: new.trigger,
            attempt: new.attempt,
            state: ExecutionState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            working_dir: None,
            note: None,
        };

        let db = self.conn()?;
        let inserted = db.execute(
            "INSERT INTO executions
             (id, script_id, schedule_id, cause, attempt, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.as_str(),
                record.script_id.as_str(),
                record.schedule_id.as_ref().map(|s| s.as_str()),
                record.trigger.as_str(),
                record.attempt,
                record.state.as_str(),
                ts(&record.created_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && record.trigger == TriggerCause::Scheduled =>
            {
                return Err(StoreError::ScheduledInFlight {
                    script_id: record.script_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        debug!(execution_id = %record.id, "execution record created");
        Ok(record)
    }

    /// Move a record to `to`, writing `fields` in the same transaction.
    ///
    /// Leaving a terminal state or skipping `pending -> running` fails with
    /// `InvalidTransition`. On a terminal transition `finished_at` defaults to
    /// now, is clamped to be no earlier than `started_at`, and `duration_ms`
    /// is derived.
    #[instrument(skip(self, fields), fields(execution_id = %id, to = %to))]
    pub fn transition(
        &self,
        id: &ExecutionId,
        to: ExecutionState,
        fields: TransitionFields,
    ) -> Result<ExecutionRecord> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        let current = tx
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
                row_to_record,
            )
            .optional()?
            .ok_or_else(|| StoreError::ExecutionNotFound { id: id.to_string() })?;

        if !current.state.can_transition_to(to) {
            error!(
                critical = true,
                execution_id = %id,
                from = %current.state,
                to = %to,
                "invalid execution state transition"
            );
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current.state,
                to,
            });
        }

        let started_at = fields.started_at.or(current.started_at);
        let (finished_at, duration_ms) = if to.is_terminal() {
            let mut end = fields.finished_at.unwrap_or_else(Utc::now);
            if let Some(start) = started_at {
                if end < start {
                    end = start;
                }
            }
            let duration = started_at.map(|start| (end - start).num_milliseconds());
            (Some(end), duration)
        } else {
            (current.finished_at, current.duration_ms)
        };

        tx.execute(
            "UPDATE executions
             SET state       = ?1,
                 started_at  = ?2,
                 finished_at = ?3,
                 duration_ms = ?4,
                 exit_code   = COALESCE(?5, exit_code),
                 stdout      = COALESCE(?6, stdout),
                 stderr      = COALESCE(?7, stderr),
                 truncated   = COALESCE(?8, truncated),
                 working_dir = COALESCE(?9, working_dir),
                 note        = COALESCE(?10, note)
             WHERE id = ?11",
            params![
                to.as_str(),
                opt_ts(&started_at),
                opt_ts(&finished_at),
                duration_ms,
                fields.exit_code,
                fields.stdout,
                fields.stderr,
                fields.truncated,
                fields.working_dir,
                fields.note,
                id.as_str(),
            ],
        )?;

        let updated = tx.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id.as_str()],
            row_to_record,
        )?;
        tx.commit()?;

        debug!(from = %current.state, "execution transitioned");
        Ok(updated)
    }

    /// Fetch one record, `None` if it does not exist.
    #[instrument(skip(self), fields(execution_id = %id))]
    pub fn get_execution(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>> {
        let db = self.conn()?;
        let record = db
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Records matching `filter`, newest first.
    #[instrument(skip(self, filter))]
    pub fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(ref script_id) = filter.script_id {
            clauses.push("script_id = ?");
            values.push(Value::Text(script_id.to_string()));
        }
        if let Some(ref schedule_id) = filter.schedule_id {
            clauses.push("schedule_id = ?");
            values.push(Value::Text(schedule_id.to_string()));
        }
        if let Some(state) = filter.state {
            clauses.push("state = ?");
            values.push(Value::Text(state.as_str().to_string()));
        }
        if let Some(ref since) = filter.since {
            clauses.push("created_at >= ?");
            values.push(Value::Text(ts(since)));
        }
        if let Some(ref until) = filter.until {
            clauses.push("created_at < ?");
            values.push(Value::Text(ts(until)));
        }

        let mut sql = SELECT_COLUMNS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
        values.push(Value::Integer(
            filter.limit.unwrap_or(DEFAULT_LIST_LIMIT) as i64,
        ));

        let db = self.conn()?;
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Records still `pending` or `running`, oldest first.
    #[instrument(skip(self))]
    pub fn unfinished_executions(&self) -> Result<Vec<ExecutionRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLUMNS} WHERE state IN ('pending', 'running') ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete terminal records created before `older_than`. Live records are
    /// never pruned. Returns the number of rows removed.
    #[instrument(skip(self), fields(older_than = %older_than))]
    pub fn prune_executions(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let db = self.conn()?;
        let removed = db.execute(
            "DELETE FROM executions
             WHERE created_at < ?1 AND state NOT IN ('pending', 'running')",
            params![ts(&older_than)],
        )?;
        debug!(removed, "pruned execution records");
        Ok(removed)
    }
}

/// Map a SQLite row (in `SELECT_COLUMNS` order) to an `ExecutionRecord`.
pub(crate) fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let trigger: String = row.get(3)?;
    let state: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(ExecutionRecord {
        id: ExecutionId::from(row.get::<_, String>(0)?),
        script_id: row.get::<_, String>(1)?.into(),
        schedule_id: row.get::<_, Option<String>>(2)?.map(Into::into),
        trigger: trigger.parse().map_err(|e| conversion_error(3, e))?,
        attempt: row.get::<_, i64>(4)? as u32,
        state: state.parse().map_err(|e| conversion_error(5, e))?,
        created_at: parse_ts(6, &created_at)?,
        started_at: parse_opt_ts(7, row.get(7)?)?,
        finished_at: parse_opt_ts(8, row.get(8)?)?,
        duration_ms: row.get(9)?,
        exit_code: row.get(10)?,
        stdout: row.get(11)?,
        stderr: row.get(12)?,
        truncated: row.get::<_, i64>(13)? != 0,
        working_dir: row.get(14)?,
        note: row.get(15)?,
    })
}
