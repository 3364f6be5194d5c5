//! scriptflow-store: SQLite persistence for scripts, execution records and
//! schedule definitions.
//!
//! One [`Store`] owns one connection. Every write commits before the call
//! returns, so a caller that has seen `Ok` can rely on the row surviving a
//! crash.

pub mod db;
pub mod error;
pub mod executions;
pub mod schedules;
pub mod scripts;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::Store;
pub use types::{ExecutionFilter, NewExecution, NewScript, ScheduleStats, ScriptEntry, TransitionFields};
