use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Defines an opaque string identifier backed by a UUIDv7 (time-sortable, so
/// ids line up with log timestamps).
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifies a registered script in the catalog.
    ScriptId
);
string_id!(
    /// Identifies one execution attempt.
    ExecutionId
);
string_id!(
    /// Identifies a recurring schedule.
    ScheduleId
);

// ---------------------------------------------------------------------------
// ScriptRef
// ---------------------------------------------------------------------------

/// How a script file is launched. Resolved once when the script is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptKind {
    /// Run as `<interpreter> <path>` (python, bash, cmd …).
    Interpreted { interpreter: String },
    /// The file itself is the program.
    Executable,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Interpreted { .. } => "interpreted",
            ScriptKind::Executable => "executable",
        }
    }
}

/// An executable artifact owned by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRef {
    pub id: ScriptId,
    pub name: String,
    /// Absolute path to the script file.
    pub path: PathBuf,
    #[serde(flatten)]
    pub kind: ScriptKind,
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// What caused an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCause {
    Manual,
    Scheduled,
}

impl TriggerCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerCause::Manual => "manual",
            TriggerCause::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for TriggerCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerCause {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerCause::Manual),
            "scheduled" => Ok(TriggerCause::Scheduled),
            other => Err(format!("unknown trigger cause: {other}")),
        }
    }
}

/// Lifecycle state of an [`ExecutionRecord`].
///
/// ```text
/// pending ──► running ──► completed | failed | timeout | cancelled | launch_error
///    │
///    └──────► skipped_no_capacity
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    LaunchError,
    /// A scheduled firing found no free slot at its due instant.
    SkippedNoCapacity,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 8] = [
        ExecutionState::Pending,
        ExecutionState::Running,
        ExecutionState::Completed,
        ExecutionState::Failed,
        ExecutionState::Timeout,
        ExecutionState::Cancelled,
        ExecutionState::LaunchError,
        ExecutionState::SkippedNoCapacity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Timeout => "timeout",
            ExecutionState::Cancelled => "cancelled",
            ExecutionState::LaunchError => "launch_error",
            ExecutionState::SkippedNoCapacity => "skipped_no_capacity",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Pending | ExecutionState::Running)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        match self {
            ExecutionState::Pending => matches!(
                next,
                ExecutionState::Running | ExecutionState::SkippedNoCapacity
            ),
            ExecutionState::Running => matches!(
                next,
                ExecutionState::Completed
                    | ExecutionState::Failed
                    | ExecutionState::Timeout
                    | ExecutionState::Cancelled
                    | ExecutionState::LaunchError
            ),
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ExecutionState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown execution state: {s}"))
    }
}

/// One attempt to run a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub script_id: ScriptId,
    /// Set for scheduled attempts.
    pub schedule_id: Option<ScheduleId>,
    pub trigger: TriggerCause,
    /// 1 for the original firing, 2 for its retry. Always 1 for manual runs.
    pub attempt: u32,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Only present when the process exited on its own.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream hit the capture cap.
    pub truncated: bool,
    pub working_dir: Option<String>,
    /// Launch error message, kill reason or reconciliation note.
    pub note: Option<String>,
}

impl ExecutionRecord {
    /// First and last lines of stdout, with an ellipsis line between them
    /// when the output is longer than `max_lines`.
    pub fn output_preview(&self, max_lines: usize) -> String {
        if self.stdout.is_empty() {
            return "No output".to_string();
        }
        let lines: Vec<&str> = self.stdout.lines().collect();
        if lines.len() <= max_lines {
            return self.stdout.clone();
        }
        let half = max_lines / 2;
        let mut preview: Vec<&str> = lines[..half].to_vec();
        preview.push("...");
        preview.extend_from_slice(&lines[lines.len() - half..]);
        preview.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// Day selector for monthly schedules.
///
/// Serialised as the day number (`15`) or the string `"last"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MonthDayRepr", into = "MonthDayRepr")]
pub enum MonthDay {
    /// Fixed day 1–31. Months without that day are skipped.
    Day(u8),
    /// Last day of every month.
    Last,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MonthDayRepr {
    Number(u8),
    Keyword(String),
}

impl TryFrom<MonthDayRepr> for MonthDay {
    type Error = String;

    fn try_from(repr: MonthDayRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            MonthDayRepr::Number(n) => Ok(MonthDay::Day(n)),
            MonthDayRepr::Keyword(s) if s.eq_ignore_ascii_case("last") => Ok(MonthDay::Last),
            MonthDayRepr::Keyword(s) => Err(format!("invalid day of month: {s}")),
        }
    }
}

impl From<MonthDay> for MonthDayRepr {
    fn from(day: MonthDay) -> Self {
        match day {
            MonthDay::Day(n) => MonthDayRepr::Number(n),
            MonthDay::Last => MonthDayRepr::Keyword("last".to_string()),
        }
    }
}

/// Recurrence frequency plus its day selector and time of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "snake_case")]
pub enum Recurrence {
    /// Every hour at `minute`.
    Hourly { minute: u8 },
    Daily { hour: u8, minute: u8 },
    /// Weekdays serialise as `"Mon"`, `"Tue"`, …
    Weekly {
        days: Vec<Weekday>,
        hour: u8,
        minute: u8,
    },
    Monthly { day: MonthDay, hour: u8, minute: u8 },
}

impl Recurrence {
    pub fn frequency(&self) -> &'static str {
        match self {
            Recurrence::Hourly { .. } => "hourly",
            Recurrence::Daily { .. } => "daily",
            Recurrence::Weekly { .. } => "weekly",
            Recurrence::Monthly { .. } => "monthly",
        }
    }
}

/// A recurrence evaluated in an IANA timezone (e.g. `"Europe/Lisbon"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRule {
    #[serde(flatten)]
    pub recurrence: Recurrence,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl ScheduleRule {
    pub fn new(recurrence: Recurrence) -> Self {
        Self {
            recurrence,
            timezone: default_timezone(),
        }
    }

    pub fn in_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }
}

impl fmt::Display for ScheduleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.recurrence {
            Recurrence::Hourly { minute } => write!(f, "Every hour at :{minute:02}"),
            Recurrence::Daily { hour, minute } => {
                write!(f, "Daily at {hour:02}:{minute:02}")
            }
            Recurrence::Weekly { days, hour, minute } => {
                let names: Vec<String> = days.iter().map(|d| d.to_string()).collect();
                write!(
                    f,
                    "Weekly on {} at {hour:02}:{minute:02}",
                    names.join(", ")
                )
            }
            Recurrence::Monthly { day, hour, minute } => match day {
                MonthDay::Day(n) => write!(f, "Monthly on day {n} at {hour:02}:{minute:02}"),
                MonthDay::Last => write!(f, "Monthly on the last day at {hour:02}:{minute:02}"),
            },
        }?;
        write!(f, " ({})", self.timezone)
    }
}

/// Caller-supplied fields for creating or replacing a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDraft {
    pub script_id: ScriptId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rule: ScheduleRule,
    #[serde(default = "bool_true")]
    pub active: bool,
}

fn bool_true() -> bool {
    true
}

/// A recurrence rule bound to a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub id: ScheduleId,
    pub script_id: ScriptId,
    pub name: String,
    pub description: String,
    pub rule: ScheduleRule,
    pub active: bool,
    /// Failed firings in a row (a firing fails when its retry fails too).
    pub consecutive_failures: u32,
    /// `None` whenever the schedule is inactive.
    pub next_due: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ExecutionState::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ExecutionState::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn pending_cannot_skip_running() {
        assert!(!ExecutionState::Pending.can_transition_to(ExecutionState::Completed));
        assert!(!ExecutionState::Pending.can_transition_to(ExecutionState::Failed));
        assert!(ExecutionState::Pending.can_transition_to(ExecutionState::Running));
        assert!(ExecutionState::Running.can_transition_to(ExecutionState::LaunchError));
    }

    #[test]
    fn state_parse_matches_as_str() {
        for state in ExecutionState::ALL {
            assert_eq!(state.as_str().parse::<ExecutionState>().unwrap(), state);
        }
        assert!("exploded".parse::<ExecutionState>().is_err());
    }

    #[test]
    fn rule_json_shape() {
        let json = r#"{"frequency":"weekly","days":["Mon","Fri"],"hour":9,"minute":30,"timezone":"Europe/Lisbon"}"#;
        let rule: ScheduleRule = serde_json::from_str(json).unwrap();
        assert_eq!(
            rule.recurrence,
            Recurrence::Weekly {
                days: vec![Weekday::Mon, Weekday::Fri],
                hour: 9,
                minute: 30
            }
        );
        assert_eq!(rule.timezone, "Europe/Lisbon");
    }

    #[test]
    fn month_day_accepts_number_or_last() {
        let rule: ScheduleRule =
            serde_json::from_str(r#"{"frequency":"monthly","day":"last","hour":0,"minute":0}"#)
                .unwrap();
        assert_eq!(rule.timezone, "UTC");
        assert!(matches!(
            rule.recurrence,
            Recurrence::Monthly { day: MonthDay::Last, .. }
        ));

        let rule: ScheduleRule =
            serde_json::from_str(r#"{"frequency":"monthly","day":31,"hour":6,"minute":0}"#)
                .unwrap();
        assert!(matches!(
            rule.recurrence,
            Recurrence::Monthly { day: MonthDay::Day(31), .. }
        ));

        let bad = serde_json::from_str::<ScheduleRule>(
            r#"{"frequency":"monthly","day":"first","hour":6,"minute":0}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn rule_display_is_human_readable() {
        let rule = ScheduleRule::new(Recurrence::Daily { hour: 22, minute: 0 });
        assert_eq!(rule.to_string(), "Daily at 22:00 (UTC)");
    }

    #[test]
    fn output_preview_elides_middle() {
        let mut record = ExecutionRecord {
            id: ExecutionId::new(),
            script_id: ScriptId::from("s"),
            schedule_id: None,
            trigger: TriggerCause::Manual,
            attempt: 1,
            state: ExecutionState::Completed,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            exit_code: Some(0),
            stdout: (1..=20).map(|n| n.to_string()).collect::<Vec<_>>().join("\n"),
            stderr: String::new(),
            truncated: false,
            working_dir: None,
            note: None,
        };
        assert_eq!(record.output_preview(4), "1\n2\n...\n19\n20");

        record.stdout.clear();
        assert_eq!(record.output_preview(4), "No output");
    }
}
