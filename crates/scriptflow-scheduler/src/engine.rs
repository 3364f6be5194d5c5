use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scriptflow_core::config::SchedulerConfig;
use scriptflow_core::{
    ExecutionState, ScheduleDefinition, ScheduleDraft, ScheduleId, ScheduleRule, ScriptId,
};
use scriptflow_store::{ScheduleStats, Store};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    error::{Result, SchedulerError},
    executor::{ExecutionService, ScheduledStart},
    policy::{FailurePolicy, Verdict},
    schedule::{next_occurrence, next_occurrences, validate},
};

/// Window used by [`SchedulerHandle::stats`].
pub const STATS_WINDOW_DAYS: u32 = 30;

/// Messages from the handle to the loop.
#[derive(Debug)]
enum Command {
    /// The schedule was created or changed; re-read it from the store.
    Reload(ScheduleId),
    Removed(ScheduleId),
    /// Re-evaluate due times now (e.g. after a clock jump in tests).
    Wake,
}

/// Reported back to the loop when a scheduled attempt ends.
#[derive(Debug)]
struct AttemptFinished {
    schedule_id: ScheduleId,
    script_id: ScriptId,
    generation: u64,
    attempt: u32,
    state: ExecutionState,
}

#[derive(Debug)]
struct Entry {
    def: ScheduleDefinition,
    /// Bumped on every edit so outcomes of superseded firings are ignored.
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct PendingRetry {
    due: DateTime<Utc>,
    generation: u64,
}

// ---------------------------------------------------------------------------
// SchedulerHandle
// ---------------------------------------------------------------------------

/// Schedule management while the loop runs.
///
/// Every mutation is validated, written to the store, and then announced to
/// the loop, which re-reads the row. The store stays the single source of
/// truth.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    commands: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Create a schedule. Its first `next_due` is computed from now.
    ///
    /// # Errors
    ///
    /// `InvalidSchedule` for an impossible rule, `ScriptNotFound` for an
    /// unknown script.
    pub fn create(&self, draft: ScheduleDraft) -> Result<ScheduleDefinition> {
        self.check_draft(&draft)?;
        let now = self.clock.now();
        let next_due = if draft.active {
            next_occurrence(&draft.rule, now)?
        } else {
            None
        };
        let def = ScheduleDefinition {
            id: ScheduleId::new(),
            script_id: draft.script_id,
            name: draft.name,
            description: draft.description,
            rule: draft.rule,
            active: draft.active,
            consecutive_failures: 0,
            next_due,
            last_run: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_schedule(&def)?;
        info!(schedule_id = %def.id, script_id = %def.script_id, rule = %def.rule, next_due = ?def.next_due, "schedule created");
        self.notify(Command::Reload(def.id.clone()));
        Ok(def)
    }

    /// Replace a schedule's definition. `next_due` is recomputed from now and
    /// any pending retry is dropped. Turning an inactive schedule active
    /// resets its failure counter.
    pub fn update(&self, id: &ScheduleId, draft: ScheduleDraft) -> Result<ScheduleDefinition> {
        let existing = self.get(id)?;
        self.check_draft(&draft)?;
        let now = self.clock.now();
        let next_due = if draft.active {
            next_occurrence(&draft.rule, now)?
        } else {
            None
        };
        let def = ScheduleDefinition {
            script_id: draft.script_id,
            name: draft.name,
            description: draft.description,
            rule: draft.rule,
            active: draft.active,
            next_due,
            updated_at: now,
            ..existing
        };
        let def = self.store.update_schedule(&def, false)?;
        info!(schedule_id = %id, rule = %def.rule, next_due = ?def.next_due, "schedule updated");
        self.notify(Command::Reload(id.clone()));
        Ok(def)
    }

    pub fn delete(&self, id: &ScheduleId) -> Result<()> {
        if !self.store.delete_schedule(id)? {
            return Err(SchedulerError::ScheduleNotFound { id: id.to_string() });
        }
        info!(schedule_id = %id, "schedule deleted");
        self.notify(Command::Removed(id.clone()));
        Ok(())
    }

    /// Activate (resetting the failure counter) or deactivate a schedule.
    pub fn set_active(&self, id: &ScheduleId, active: bool) -> Result<ScheduleDefinition> {
        let existing = self.get(id)?;
        let now = self.clock.now();
        let def = if active {
            ScheduleDefinition {
                active: true,
                consecutive_failures: 0,
                next_due: next_occurrence(&existing.rule, now)?,
                updated_at: now,
                ..existing
            }
        } else {
            ScheduleDefinition {
                active: false,
                next_due: None,
                updated_at: now,
                ..existing
            }
        };
        let def = self.store.update_schedule(&def, active)?;
        info!(schedule_id = %id, active, "schedule activation changed");
        self.notify(Command::Reload(id.clone()));
        Ok(def)
    }

    pub fn get(&self, id: &ScheduleId) -> Result<ScheduleDefinition> {
        self.store
            .get_schedule(id)?
            .ok_or_else(|| SchedulerError::ScheduleNotFound { id: id.to_string() })
    }

    pub fn list(&self) -> Result<Vec<ScheduleDefinition>> {
        Ok(self.store.list_schedules()?)
    }

    /// The next `count` run times of `rule` from now, without saving it.
    pub fn preview_next_runs(&self, rule: &ScheduleRule, count: usize) -> Result<Vec<DateTime<Utc>>> {
        next_occurrences(rule, self.clock.now(), count)
    }

    pub fn stats(&self, id: &ScheduleId) -> Result<ScheduleStats> {
        self.get(id)?;
        let since = self.clock.now() - chrono::Duration::days(STATS_WINDOW_DAYS as i64);
        Ok(self.store.schedule_stats(id, since, STATS_WINDOW_DAYS)?)
    }

    /// Make the loop re-check due times immediately.
    pub fn wake(&self) {
        self.notify(Command::Wake);
    }

    fn check_draft(&self, draft: &ScheduleDraft) -> Result<()> {
        if draft.name.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule("name must not be empty".into()));
        }
        validate(&draft.rule)?;
        if self.store.get_script(&draft.script_id)?.is_none() {
            return Err(SchedulerError::ScriptNotFound {
                id: draft.script_id.to_string(),
            });
        }
        Ok(())
    }

    fn notify(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            debug!("scheduler loop not running; change will be picked up at startup");
        }
    }
}

// ---------------------------------------------------------------------------
// SchedulerService
// ---------------------------------------------------------------------------

/// The scheduling loop. Owns the working set of active schedules.
pub struct SchedulerService {
    store: Arc<Store>,
    executor: Arc<ExecutionService>,
    clock: Arc<dyn Clock>,
    policy: FailurePolicy,
    max_sleep: Duration,

    entries: HashMap<ScheduleId, Entry>,
    generations: HashMap<ScheduleId, u64>,
    retries: HashMap<ScheduleId, PendingRetry>,
    /// Scripts with a live scheduled attempt.
    in_flight: HashSet<ScriptId>,

    commands: mpsc::UnboundedReceiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<AttemptFinished>,
    outcomes_rx: mpsc::UnboundedReceiver<AttemptFinished>,
}

impl SchedulerService {
    /// Build the loop and the handle that manages it.
    pub fn new(
        executor: Arc<ExecutionService>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> (Self, SchedulerHandle) {
        let store = Arc::clone(executor.store());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let handle = SchedulerHandle {
            store: Arc::clone(&store),
            clock: Arc::clone(&clock),
            commands: cmd_tx,
        };
        let service = Self {
            store,
            executor,
            clock,
            policy: FailurePolicy::from_config(config),
            max_sleep: Duration::from_secs(config.max_sleep_secs.max(1)),
            entries: HashMap::new(),
            generations: HashMap::new(),
            retries: HashMap::new(),
            in_flight: HashSet::new(),
            commands: cmd_rx,
            outcomes_tx,
            outcomes_rx,
        };
        (service, handle)
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Main loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler started");
        if let Err(e) = self.startup() {
            error!(error = %e, "scheduler startup failed");
        }

        loop {
            self.fire_due();
            let sleep_for = self.sleep_duration();
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                Some(cmd) = self.commands.recv() => self.handle_command(cmd),
                Some(done) = self.outcomes_rx.recv() => self.handle_outcome(done),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    /// Reconcile stale records, then load active schedules. Past-due
    /// schedules keep their `next_due` and fire once on the first pass.
    fn startup(&mut self) -> Result<()> {
        let reconciled = self.executor.reconcile_stale()?;
        if reconciled > 0 {
            warn!(count = reconciled, "stale executions marked failed on startup");
        }

        let now = self.clock.now();
        let mut overdue = 0;
        for mut def in self.store.list_active_schedules()? {
            match def.next_due {
                Some(due) if due <= now => overdue += 1,
                Some(_) => {}
                None => {
                    def.next_due = next_occurrence(&def.rule, now).unwrap_or_else(|e| {
                        warn!(schedule_id = %def.id, error = %e, "cannot compute next run");
                        None
                    });
                    self.store.set_next_due(&def.id, def.next_due)?;
                }
            }
            let generation = self.bump_generation(&def.id);
            self.entries.insert(def.id.clone(), Entry { def, generation });
        }
        info!(schedules = self.entries.len(), overdue, "schedules loaded");
        Ok(())
    }

    fn fire_due(&mut self) {
        let now = self.clock.now();

        let due_retries: Vec<ScheduleId> = self
            .retries
            .iter()
            .filter(|(_, r)| r.due <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due_retries {
            let Some(retry) = self.retries.remove(&id) else {
                continue;
            };
            match self.entries.get(&id) {
                Some(entry) if entry.generation == retry.generation => {
                    if self.in_flight.contains(&entry.def.script_id) {
                        debug!(schedule_id = %id, script_id = %entry.def.script_id, "retry waiting for script to finish");
                        self.retries.insert(id, retry);
                        continue;
                    }
                    info!(schedule_id = %id, "running retry");
                    self.launch(&id, 2);
                }
                _ => debug!(schedule_id = %id, "retry dropped: schedule changed"),
            }
        }

        let due: Vec<ScheduleId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.def.next_due.is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.fire(&id, now);
        }
    }

    /// Advance `next_due` first, then launch attempt 1.
    fn fire(&mut self, id: &ScheduleId, now: DateTime<Utc>) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        let next = next_occurrence(&entry.def.rule, now).unwrap_or_else(|e| {
            error!(schedule_id = %id, error = %e, "cannot compute next run");
            None
        });
        entry.def.next_due = next;
        entry.def.last_run = Some(now);
        if let Err(e) = self.store.record_firing(id, now, next) {
            error!(schedule_id = %id, error = %e, "failed to persist firing");
        }
        if self.retries.remove(id).is_some() {
            debug!(schedule_id = %id, "pending retry superseded by regular firing");
        }
        info!(schedule_id = %id, next_due = ?next, "schedule fired");
        self.launch(id, 1);
    }

    fn launch(&mut self, id: &ScheduleId, attempt: u32) {
        let Some(entry) = self.entries.get(id) else {
            return;
        };
        let script_id = entry.def.script_id.clone();
        let generation = entry.generation;

        if self.in_flight.contains(&script_id) {
            warn!(schedule_id = %id, script_id = %script_id, "previous scheduled run still in flight; firing skipped");
            return;
        }

        match self.executor.trigger_scheduled(&script_id, id, attempt) {
            Ok(ScheduledStart::Started { completion, .. }) => {
                self.in_flight.insert(script_id.clone());
                let tx = self.outcomes_tx.clone();
                let schedule_id = id.clone();
                tokio::spawn(async move {
                    let state = completion.await.unwrap_or(ExecutionState::Failed);
                    let _ = tx.send(AttemptFinished {
                        schedule_id,
                        script_id,
                        generation,
                        attempt,
                        state,
                    });
                });
            }
            Ok(ScheduledStart::Skipped { .. }) => {}
            Err(SchedulerError::ScriptNotFound { .. }) => {
                warn!(schedule_id = %id, script_id = %script_id, "scheduled script no longer exists");
                self.apply(id, attempt, ExecutionState::LaunchError);
            }
            Err(e) => {
                error!(schedule_id = %id, script_id = %script_id, error = %e, "scheduled trigger failed");
            }
        }
    }

    fn handle_outcome(&mut self, done: AttemptFinished) {
        self.in_flight.remove(&done.script_id);
        match self.entries.get(&done.schedule_id) {
            Some(entry) if entry.generation == done.generation => {
                self.apply(&done.schedule_id, done.attempt, done.state);
            }
            _ => debug!(schedule_id = %done.schedule_id, "outcome of superseded firing ignored"),
        }
    }

    fn apply(&mut self, id: &ScheduleId, attempt: u32, state: ExecutionState) {
        let now = self.clock.now();
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        match self
            .policy
            .evaluate(attempt, state, entry.def.consecutive_failures)
        {
            Verdict::Retry { delay } => {
                let due = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                info!(schedule_id = %id, %state, retry_at = %due, "scheduling retry");
                self.retries.insert(
                    id.clone(),
                    PendingRetry {
                        due,
                        generation: entry.generation,
                    },
                );
            }
            Verdict::Settle {
                consecutive_failures,
                deactivate,
            } => {
                entry.def.consecutive_failures = consecutive_failures;
                if let Err(e) =
                    self.store
                        .record_failure_streak(id, consecutive_failures, !deactivate)
                {
                    error!(schedule_id = %id, error = %e, "failed to persist failure streak");
                }
                if deactivate {
                    warn!(schedule_id = %id, consecutive_failures, "schedule deactivated after repeated failures");
                    self.entries.remove(id);
                    self.retries.remove(id);
                } else {
                    debug!(schedule_id = %id, consecutive_failures, %state, "firing settled");
                }
            }
            Verdict::Ignore => debug!(schedule_id = %id, %state, "outcome does not affect streak"),
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Reload(id) => match self.store.get_schedule(&id) {
                Ok(Some(def))
                    if self
                        .entries
                        .get(&id)
                        .is_some_and(|entry| same_definition(&entry.def, &def)) =>
                {
                    // already loaded from this row (created before startup)
                    debug!(schedule_id = %id, "schedule unchanged; reload skipped");
                }
                Ok(Some(def)) if def.active => {
                    let generation = self.bump_generation(&id);
                    self.retries.remove(&id);
                    debug!(schedule_id = %id, next_due = ?def.next_due, "schedule reloaded");
                    self.entries.insert(id, Entry { def, generation });
                }
                Ok(_) => {
                    self.bump_generation(&id);
                    self.retries.remove(&id);
                    self.entries.remove(&id);
                }
                Err(e) => error!(schedule_id = %id, error = %e, "failed to reload schedule"),
            },
            Command::Removed(id) => {
                self.bump_generation(&id);
                self.entries.remove(&id);
                self.retries.remove(&id);
            }
            Command::Wake => {}
        }
    }

    /// Pending retries whose script is free to run. Blocked ones are picked up
    /// when the running attempt reports back.
    fn ready_retries(&self) -> impl Iterator<Item = &PendingRetry> {
        self.retries.iter().filter_map(|(id, retry)| {
            let entry = self.entries.get(id)?;
            (!self.in_flight.contains(&entry.def.script_id)).then_some(retry)
        })
    }

    fn bump_generation(&mut self, id: &ScheduleId) -> u64 {
        let generation = self.generations.entry(id.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn sleep_duration(&self) -> Duration {
        let now = self.clock.now();
        let next = self
            .entries
            .values()
            .filter_map(|e| e.def.next_due)
            .chain(self.ready_retries().map(|r| r.due))
            .min();
        match next {
            Some(at) => (at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.max_sleep),
            None => self.max_sleep,
        }
    }
}

/// True when `stored` carries nothing the loop has not already seen.
fn same_definition(cached: &ScheduleDefinition, stored: &ScheduleDefinition) -> bool {
    cached.updated_at == stored.updated_at
        && cached.active == stored.active
        && cached.script_id == stored.script_id
        && cached.rule == stored.rule
        && cached.next_due == stored.next_due
}
