//! Events published by the execution engine for outside collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExecutionId, ExecutionRecord, ExecutionState, ScheduleId, ScriptId, TriggerCause};

/// Emitted once for every execution record that reaches a terminal state.
///
/// The notification collaborator decides what to do with it (email, chat …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFinished {
    pub execution_id: ExecutionId,
    pub script_id: ScriptId,
    pub schedule_id: Option<ScheduleId>,
    pub trigger: TriggerCause,
    pub attempt: u32,
    pub state: ExecutionState,
    pub exit_code: Option<i32>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

impl ExecutionFinished {
    /// Build the event from a terminal record. Returns `None` for records
    /// that are still pending or running.
    pub fn from_record(record: &ExecutionRecord) -> Option<Self> {
        if !record.state.is_terminal() {
            return None;
        }
        Some(Self {
            execution_id: record.id.clone(),
            script_id: record.script_id.clone(),
            schedule_id: record.schedule_id.clone(),
            trigger: record.trigger,
            attempt: record.attempt,
            state: record.state,
            exit_code: record.exit_code,
            finished_at: record.finished_at.unwrap_or(record.created_at),
            duration_ms: record.duration_ms,
        })
    }

    /// Event name used on the wire.
    pub const NAME: &'static str = "executionFinished";
}
