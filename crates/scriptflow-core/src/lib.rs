//! `scriptflow-core`: types shared by every scriptflow crate.
//!
//! Nothing in here performs I/O except [`config::ScriptflowConfig::load`].

pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use error::{Result, ScriptflowError};
pub use event::ExecutionFinished;
pub use types::{
    ExecutionId, ExecutionRecord, ExecutionState, MonthDay, Recurrence, ScheduleDefinition,
    ScheduleDraft, ScheduleId, ScheduleRule, ScriptId, ScriptKind, ScriptRef, TriggerCause,
};
