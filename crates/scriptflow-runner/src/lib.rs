//! scriptflow-runner: isolated script processes and the global slot budget.
//!
//! - [`runner::ProcessRunner`] spawns one script in its own working directory
//!   and process group, captures both streams line by line, and funnels every
//!   exit path (exit, timeout, cancel, launch failure) into one [`RunReport`].
//! - [`slots::SlotManager`] bounds how many scripts run at once. A [`Slot`]
//!   is released when dropped, so no exit path can leak one.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use scriptflow_core::{ScriptId, ScriptKind, ScriptRef};
//! use scriptflow_runner::{ProcessRunner, RunOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let script = ScriptRef {
//!         id: ScriptId::from("backup"),
//!         name: "backup.sh".into(),
//!         path: "/srv/scripts/backup.sh".into(),
//!         kind: ScriptKind::Interpreted { interpreter: "bash".into() },
//!     };
//!     let report = ProcessRunner::new()
//!         .run(&script, "/tmp/run-1".as_ref(), &RunOptions::default(), CancellationToken::new())
//!         .await;
//!     println!("{:?} {}", report.outcome, report.stdout.render());
//! }
//! ```

pub mod capture;
pub mod error;
pub mod kind;
pub mod runner;
pub mod slots;
pub mod types;
pub mod workdir;

pub use error::{Result, RunnerError};
pub use kind::{resolve_kind, Interpreters};
pub use runner::ProcessRunner;
pub use slots::{Slot, SlotManager};
pub use types::{CapturedOutput, OutputLine, RunOptions, RunOutcome, RunReport};
