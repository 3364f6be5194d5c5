use std::path::PathBuf;

use chrono::{DateTime, Utc};
use scriptflow_core::{ExecutionState, ScheduleId, ScriptId, TriggerCause};
use serde::{Deserialize, Serialize};

/// A script registered in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub id: ScriptId,
    pub name: String,
    pub path: PathBuf,
    pub description: String,
    /// Explicit interpreter; `None` means "decide from the file extension".
    pub interpreter: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`crate::Store::register_script`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewScript {
    /// Defaults to the file name.
    #[serde(default)]
    pub name: Option<String>,
    pub path: PathBuf,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub interpreter: Option<String>,
}

/// Input for [`crate::Store::create_execution`]. New records start `pending`.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub script_id: ScriptId,
    pub schedule_id: Option<ScheduleId>,
    pub trigger: TriggerCause,
    pub attempt: u32,
}

impl NewExecution {
    pub fn manual(script_id: ScriptId) -> Self {
        Self {
            script_id,
            schedule_id: None,
            trigger: TriggerCause::Manual,
            attempt: 1,
        }
    }

    pub fn scheduled(script_id: ScriptId, schedule_id: ScheduleId, attempt: u32) -> Self {
        Self {
            script_id,
            schedule_id: Some(schedule_id),
            trigger: TriggerCause::Scheduled,
            attempt,
        }
    }
}

/// Fields written alongside a state transition. `None` leaves the column
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub truncated: Option<bool>,
    pub working_dir: Option<String>,
    pub note: Option<String>,
}

/// Filter for [`crate::Store::list_executions`]. Empty filter lists the most
/// recent records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionFilter {
    pub script_id: Option<ScriptId>,
    pub schedule_id: Option<ScheduleId>,
    pub state: Option<ExecutionState>,
    /// Created at or after.
    pub since: Option<DateTime<Utc>>,
    /// Created strictly before.
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Execution counts for one schedule over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleStats {
    pub total: u64,
    pub completed: u64,
    /// Percentage of finished runs that completed, 0 when nothing finished.
    pub success_rate: f64,
    pub last_state: Option<ExecutionState>,
    pub window_days: u32,
}
