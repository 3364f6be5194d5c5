//! `scriptflow-scheduler`: runs scripts on demand and on recurring schedules.
//!
//! # Overview
//!
//! [`executor::ExecutionService`] is the single entry point for starting an
//! attempt: it resolves the script, takes a slot, writes the record through
//! its lifecycle and publishes an [`ExecutionFinished`] event at the end.
//!
//! [`engine::SchedulerService`] owns the working set of active schedules and
//! sleeps until the next due instant (or a wake-up from the
//! [`engine::SchedulerHandle`]). Firings go through the executor; outcomes
//! come back to the loop, which applies the [`policy::FailurePolicy`].
//!
//! # Recurrences
//!
//! | Frequency | Fires                                                   |
//! |-----------|---------------------------------------------------------|
//! | `hourly`  | every hour at MM                                        |
//! | `daily`   | every day at HH:MM in the rule's timezone               |
//! | `weekly`  | at HH:MM on each listed weekday                         |
//! | `monthly` | at HH:MM on day N (months without day N are skipped) or on the last day |
//!
//! [`ExecutionFinished`]: scriptflow_core::ExecutionFinished

pub mod clock;
pub mod engine;
pub mod error;
pub mod executor;
pub mod policy;
pub mod schedule;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{SchedulerHandle, SchedulerService};
pub use error::{Result, SchedulerError};
pub use executor::{ExecutionService, ExecutionSettings, ScheduledStart};
pub use policy::{FailurePolicy, Verdict};
