//! `ExecutionService`: the one place an execution attempt is started and
//! finished.
//!
//! Every attempt follows the same path: take a slot, write `pending`, prepare
//! a working directory, write `running` (durable before spawn), run the
//! process, write the terminal state, give the slot back, clean up, publish
//! [`ExecutionFinished`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use scriptflow_core::config::RunnerConfig;
use scriptflow_core::{
    ExecutionFinished, ExecutionId, ExecutionRecord, ExecutionState, ScheduleId, ScriptId,
    ScriptRef,
};
use scriptflow_runner::{
    resolve_kind, workdir, Interpreters, ProcessRunner, RunOptions, Slot, SlotManager,
};
use scriptflow_store::{NewExecution, Store, StoreError, TransitionFields};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, SchedulerError};

const EVENT_CAPACITY: usize = 256;

pub const ENV_EXECUTION_ID: &str = "SCRIPTFLOW_EXECUTION_ID";
pub const ENV_WORKING_DIR: &str = "SCRIPTFLOW_WORKING_DIR";

/// Limits and locations applied to every attempt.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub max_concurrent: usize,
    pub manual_acquire_wait: Duration,
    pub timeout: Duration,
    pub output_cap_bytes: usize,
    pub work_root: PathBuf,
    pub keep_working_dirs: bool,
    pub interpreters: Interpreters,
}

impl ExecutionSettings {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            manual_acquire_wait: Duration::from_millis(config.manual_acquire_wait_ms),
            timeout: Duration::from_secs(config.timeout_secs),
            output_cap_bytes: config.output_cap_bytes,
            work_root: PathBuf::from(&config.work_root),
            keep_working_dirs: config.keep_working_dirs,
            interpreters: Interpreters::from_config(config),
        }
    }
}

/// Result of a scheduled trigger.
#[derive(Debug)]
pub enum ScheduledStart {
    /// The attempt is running; `completion` resolves to its terminal state.
    Started {
        execution_id: ExecutionId,
        completion: JoinHandle<ExecutionState>,
    },
    /// No slot was free; the record was written as `skipped_no_capacity`.
    Skipped { execution_id: ExecutionId },
}

pub struct ExecutionService {
    store: Arc<Store>,
    slots: SlotManager,
    runner: ProcessRunner,
    settings: ExecutionSettings,
    /// Cancellation tokens of attempts that have not finished yet.
    live: DashMap<ExecutionId, CancellationToken>,
    events: broadcast::Sender<ExecutionFinished>,
}

impl ExecutionService {
    pub fn new(store: Arc<Store>, settings: ExecutionSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            slots: SlotManager::new(settings.max_concurrent, settings.manual_acquire_wait),
            store,
            runner: ProcessRunner::new(),
            settings,
            live: DashMap::new(),
            events,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    /// Every terminal record is published here.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionFinished> {
        self.events.subscribe()
    }

    /// Start a manual run of `script_id`.
    ///
    /// # Errors
    ///
    /// - `ScriptNotFound` when the catalog has no such script.
    /// - `Runner(CapacityExceeded)` when no slot frees up within the bounded
    ///   wait. No record is written in that case.
    pub async fn trigger_manual(self: &Arc<Self>, script_id: &ScriptId) -> Result<ExecutionId> {
        let script = self.resolve(script_id)?;
        // slot before record: a refused trigger leaves no pending row behind
        let slot = self.slots.acquire().await?;
        let record = self.store.create_execution(NewExecution::manual(script.id.clone()))?;
        info!(execution_id = %record.id, script_id = %script.id, "manual execution requested");

        let id = record.id.clone();
        self.spawn_attempt(record, script, slot);
        Ok(id)
    }

    /// Start attempt `attempt` of a scheduled firing without waiting for a
    /// slot.
    ///
    /// # Errors
    ///
    /// `ScriptNotFound`, or `Store(ScheduledInFlight)` when a scheduled run of
    /// the same script is still live.
    pub fn trigger_scheduled(
        self: &Arc<Self>,
        script_id: &ScriptId,
        schedule_id: &ScheduleId,
        attempt: u32,
    ) -> Result<ScheduledStart> {
        let script = self.resolve(script_id)?;
        let new = NewExecution::scheduled(script.id.clone(), schedule_id.clone(), attempt);

        let Some(slot) = self.slots.try_acquire() else {
            let record = self.store.create_execution(new)?;
            let skipped = self.store.transition(
                &record.id,
                ExecutionState::SkippedNoCapacity,
                TransitionFields {
                    note: Some(format!(
                        "all {} execution slots busy at due time",
                        self.slots.capacity()
                    )),
                    ..Default::default()
                },
            )?;
            warn!(
                execution_id = %skipped.id,
                schedule_id = %schedule_id,
                script_id = %script.id,
                "scheduled firing skipped: no free slot"
            );
            self.publish(&skipped);
            return Ok(ScheduledStart::Skipped {
                execution_id: skipped.id,
            });
        };

        let record = self.store.create_execution(new)?;
        info!(
            execution_id = %record.id,
            schedule_id = %schedule_id,
            script_id = %script.id,
            attempt,
            "scheduled execution started"
        );
        let execution_id = record.id.clone();
        let completion = self.spawn_attempt(record, script, slot);
        Ok(ScheduledStart::Started {
            execution_id,
            completion,
        })
    }

    /// Ask a live attempt to stop. Returns `false` when the record is already
    /// terminal (or no longer owned by this process).
    pub fn cancel(&self, id: &ExecutionId) -> Result<bool> {
        if let Some(token) = self.live.get(id) {
            token.cancel();
            info!(execution_id = %id, "cancellation requested");
            return Ok(true);
        }
        match self.store.get_execution(id)? {
            Some(_) => Ok(false),
            None => Err(SchedulerError::ExecutionNotFound { id: id.to_string() }),
        }
    }

    pub fn get(&self, id: &ExecutionId) -> Result<ExecutionRecord> {
        self.store
            .get_execution(id)?
            .ok_or_else(|| SchedulerError::ExecutionNotFound { id: id.to_string() })
    }

    /// Fail every record left `pending` or `running` by a previous process.
    /// Call once at startup, before any new attempt is started.
    pub fn reconcile_stale(&self) -> Result<usize> {
        let stale = self.store.unfinished_executions()?;
        let mut reconciled = 0;
        for record in stale {
            if self.live.contains_key(&record.id) {
                continue;
            }
            let now = Utc::now();
            if record.state == ExecutionState::Pending {
                self.store.transition(
                    &record.id,
                    ExecutionState::Running,
                    TransitionFields {
                        started_at: Some(now),
                        ..Default::default()
                    },
                )?;
            }
            let failed = self.store.transition(
                &record.id,
                ExecutionState::Failed,
                TransitionFields {
                    finished_at: Some(now),
                    note: Some(format!(
                        "no live process at startup (was {}); marked failed",
                        record.state
                    )),
                    ..Default::default()
                },
            )?;
            warn!(
                execution_id = %failed.id,
                script_id = %failed.script_id,
                previous = %record.state,
                "stale execution reconciled to failed"
            );
            self.publish(&failed);
            reconciled += 1;
        }
        Ok(reconciled)
    }

    /// Build a [`ScriptRef`] from the catalog entry.
    pub fn resolve(&self, script_id: &ScriptId) -> Result<ScriptRef> {
        let entry = self
            .store
            .get_script(script_id)?
            .ok_or_else(|| SchedulerError::ScriptNotFound {
                id: script_id.to_string(),
            })?;
        let kind = resolve_kind(
            &entry.path,
            entry.interpreter.as_deref(),
            &self.settings.interpreters,
        );
        Ok(ScriptRef {
            id: entry.id,
            name: entry.name,
            path: entry.path,
            kind,
        })
    }

    // --- private helpers ---------------------------------------------------

    fn spawn_attempt(
        self: &Arc<Self>,
        record: ExecutionRecord,
        script: ScriptRef,
        slot: Slot,
    ) -> JoinHandle<ExecutionState> {
        let token = CancellationToken::new();
        self.live.insert(record.id.clone(), token.clone());
        let svc = Arc::clone(self);
        tokio::spawn(async move { svc.run_attempt(record, script, slot, token).await })
    }

    async fn run_attempt(
        self: Arc<Self>,
        record: ExecutionRecord,
        script: ScriptRef,
        slot: Slot,
        token: CancellationToken,
    ) -> ExecutionState {
        let id = record.id.clone();
        let state = match self.drive(&record, &script, slot, token).await {
            Ok(done) => {
                self.publish(&done);
                done.state
            }
            Err(e) => {
                error!(execution_id = %id, script_id = %script.id, error = %e, "execution attempt could not be recorded");
                ExecutionState::Failed
            }
        };
        self.live.remove(&id);
        state
    }

    async fn drive(
        &self,
        record: &ExecutionRecord,
        script: &ScriptRef,
        slot: Slot,
        token: CancellationToken,
    ) -> std::result::Result<ExecutionRecord, StoreError> {
        let dir = match workdir::prepare(&self.settings.work_root, &record.id).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(execution_id = %record.id, error = %e, "working directory unavailable");
                self.store.transition(
                    &record.id,
                    ExecutionState::Running,
                    TransitionFields {
                        started_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )?;
                return self.store.transition(
                    &record.id,
                    ExecutionState::LaunchError,
                    TransitionFields {
                        note: Some(e.to_string()),
                        ..Default::default()
                    },
                );
            }
        };
        let dir_str = dir.display().to_string();

        let started_at = Utc::now();
        let running = self.store.transition(
            &record.id,
            ExecutionState::Running,
            TransitionFields {
                started_at: Some(started_at),
                working_dir: Some(dir_str.clone()),
                ..Default::default()
            },
        );
        if let Err(e) = running {
            drop(slot);
            workdir::remove(&dir).await;
            return Err(e);
        }

        let options = RunOptions {
            timeout: self.settings.timeout,
            output_cap_bytes: self.settings.output_cap_bytes,
            env: vec![
                (ENV_EXECUTION_ID.to_string(), record.id.to_string()),
                (ENV_WORKING_DIR.to_string(), dir_str),
            ],
        };
        let report = self.runner.run(script, &dir, &options, token).await;

        // slot outlives the terminal write: running records never exceed slots
        let done = self.store.transition(
            &record.id,
            report.outcome.state(),
            TransitionFields {
                finished_at: Some(report.finished_at.max(started_at)),
                exit_code: report.exit_code,
                stdout: Some(report.stdout.render()),
                stderr: Some(report.stderr.render()),
                truncated: Some(report.truncated()),
                note: report.note.clone(),
                ..Default::default()
            },
        );
        drop(slot);

        if !self.settings.keep_working_dirs {
            workdir::remove(&dir).await;
        }

        let done = done?;
        info!(
            execution_id = %done.id,
            script_id = %done.script_id,
            state = %done.state,
            exit_code = ?done.exit_code,
            duration_ms = ?done.duration_ms,
            "execution finished"
        );
        Ok(done)
    }

    fn publish(&self, record: &ExecutionRecord) {
        if let Some(event) = ExecutionFinished::from_record(record) {
            // no subscribers is fine
            let _ = self.events.send(event);
        }
    }
}
