//! End-to-end scheduling with a manual clock and real shell scripts.
#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use common::{wait_until, Harness};
use scriptflow_core::config::SchedulerConfig;
use scriptflow_core::{
    ExecutionRecord, ExecutionState, Recurrence, ScheduleDefinition, ScheduleDraft, ScheduleId,
    ScheduleRule, ScriptId,
};
use scriptflow_scheduler::{FailurePolicy, ManualClock, SchedulerHandle, SchedulerService};
use scriptflow_store::ExecutionFilter;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(15);

fn at(day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, hour, min, sec).unwrap()
}

fn daily_22() -> ScheduleRule {
    ScheduleRule::new(Recurrence::Daily { hour: 22, minute: 0 })
}

fn draft(script_id: &ScriptId, name: &str) -> ScheduleDraft {
    ScheduleDraft {
        script_id: script_id.clone(),
        name: name.into(),
        description: String::new(),
        rule: daily_22(),
        active: true,
    }
}

struct Running {
    handle: SchedulerHandle,
    clock: Arc<ManualClock>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Running {
    fn start(h: &Harness, policy: Option<FailurePolicy>) -> Self {
        Self::start_after(h, policy, |_| ()).0
    }

    /// Run `setup` against the handle before the loop is spawned.
    fn start_after<T>(
        h: &Harness,
        policy: Option<FailurePolicy>,
        setup: impl FnOnce(&SchedulerHandle) -> T,
    ) -> (Self, T) {
        let clock = Arc::new(ManualClock::new(at(10, 21, 59, 59)));
        let (service, handle) = SchedulerService::new(
            Arc::clone(&h.executor),
            clock.clone(),
            &SchedulerConfig::default(),
        );
        let service = match policy {
            Some(policy) => service.with_policy(policy),
            None => service,
        };
        let prepared = setup(&handle);
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(service.run(rx));
        let running = Self {
            handle,
            clock,
            shutdown,
            task,
        };
        (running, prepared)
    }

    fn jump(&self, to: DateTime<Utc>) {
        self.clock.set(to);
        self.handle.wake();
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.task.await.unwrap();
    }
}

fn quick_retries() -> FailurePolicy {
    FailurePolicy {
        retry_delay: Duration::ZERO,
        max_consecutive_failures: 3,
    }
}

fn history(h: &Harness, id: &ScheduleId) -> Vec<ExecutionRecord> {
    h.store
        .list_executions(&ExecutionFilter {
            schedule_id: Some(id.clone()),
            ..Default::default()
        })
        .unwrap()
}

fn finished_count(h: &Harness, id: &ScheduleId) -> usize {
    history(h, id).iter().filter(|r| r.state.is_terminal()).count()
}

/// Wait until the stored schedule satisfies `pred`.
async fn schedule_where(
    h: &Harness,
    id: &ScheduleId,
    pred: impl Fn(&ScheduleDefinition) -> bool,
) -> ScheduleDefinition {
    wait_until(WAIT, || h.store.get_schedule(id).unwrap().filter(|d| pred(d))).await
}

#[tokio::test]
async fn nightly_backup_runs_at_ten_pm() {
    let h = Harness::new(4);
    let script = h.script("backup.sh", "sleep 0.05\necho backed up\n");
    let sched = Running::start(&h, None);

    let preview = sched.handle.preview_next_runs(&daily_22(), 1).unwrap();
    assert_eq!(preview, vec![at(10, 22, 0, 0)]);

    let def = sched.handle.create(draft(&script, "nightly backup")).unwrap();
    assert_eq!(def.next_due, Some(at(10, 22, 0, 0)));
    assert!(history(&h, &def.id).is_empty());

    sched.jump(at(10, 22, 0, 0));
    let record = wait_until(WAIT, || {
        history(&h, &def.id)
            .into_iter()
            .find(|r| r.state.is_terminal())
    })
    .await;
    assert_eq!(record.state, ExecutionState::Completed);
    assert_eq!(record.attempt, 1);
    assert!(record.duration_ms.unwrap() > 0);
    assert!(record.stdout.contains("backed up"));

    let after = sched.handle.get(&def.id).unwrap();
    assert_eq!(after.consecutive_failures, 0);
    assert_eq!(after.last_run, Some(at(10, 22, 0, 0)));
    assert_eq!(after.next_due, Some(at(11, 22, 0, 0)));

    let stats = sched.handle.stats(&def.id).unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.success_rate, 100.0);
    assert_eq!(stats.last_state, Some(ExecutionState::Completed));

    sched.stop().await;
}

#[tokio::test]
async fn three_failed_firings_deactivate_the_schedule() {
    let h = Harness::new(4);
    let script = h.script("flaky.sh", "echo nope >&2\nexit 1\n");
    let sched = Running::start(&h, Some(quick_retries()));
    let def = sched.handle.create(draft(&script, "always fails")).unwrap();

    for day in 0..3u32 {
        sched.jump(at(10 + day, 22, 0, 0));
        let expected = day + 1;
        schedule_where(&h, &def.id, |d| d.consecutive_failures == expected).await;
        // each firing ran its original attempt and one retry
        assert_eq!(finished_count(&h, &def.id), 2 * expected as usize);
    }

    let dead = sched.handle.get(&def.id).unwrap();
    assert!(!dead.active);
    assert_eq!(dead.next_due, None);
    assert_eq!(dead.consecutive_failures, 3);

    let attempts: Vec<u32> = history(&h, &def.id).iter().map(|r| r.attempt).collect();
    assert_eq!(attempts.iter().filter(|a| **a == 2).count(), 3);

    // an inactive schedule no longer fires
    sched.jump(at(13, 22, 0, 0));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(finished_count(&h, &def.id), 6);

    // re-activation resets the counter
    let revived = sched.handle.set_active(&def.id, true).unwrap();
    assert_eq!(revived.consecutive_failures, 0);
    assert_eq!(revived.next_due, Some(at(14, 22, 0, 0)));

    sched.stop().await;
}

#[tokio::test]
async fn success_resets_the_failure_counter() {
    let h = Harness::new(4);
    let flag = h.dir.path().join("healthy");
    let body = format!("if [ -f '{}' ]; then exit 0; fi\nexit 1\n", flag.display());
    let script = h.script("check.sh", &body);
    let sched = Running::start(&h, Some(quick_retries()));
    let def = sched.handle.create(draft(&script, "health check")).unwrap();

    sched.jump(at(10, 22, 0, 0));
    schedule_where(&h, &def.id, |d| d.consecutive_failures == 1).await;

    std::fs::write(&flag, "").unwrap();
    sched.jump(at(11, 22, 0, 0));
    wait_until(WAIT, || {
        history(&h, &def.id)
            .into_iter()
            .find(|r| r.state == ExecutionState::Completed)
    })
    .await;
    let healed = schedule_where(&h, &def.id, |d| d.consecutive_failures == 0).await;
    assert!(healed.active);
    assert_eq!(finished_count(&h, &def.id), 3);

    sched.stop().await;
}

#[tokio::test]
async fn editing_a_schedule_drops_its_pending_retry() {
    let h = Harness::new(4);
    let script = h.script("broken.sh", "exit 2\n");
    let sched = Running::start(
        &h,
        Some(FailurePolicy {
            retry_delay: Duration::from_secs(3600),
            max_consecutive_failures: 3,
        }),
    );
    let def = sched.handle.create(draft(&script, "report")).unwrap();

    sched.jump(at(10, 22, 0, 0));
    wait_until(WAIT, || (finished_count(&h, &def.id) == 1).then_some(())).await;
    // let the loop register the retry
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut edited = draft(&script, "report (renamed)");
    edited.description = "edited after a failure".into();
    sched.handle.update(&def.id, edited).unwrap();

    // past the retry's due time, before the next regular firing
    sched.jump(at(10, 23, 30, 0));
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(history(&h, &def.id).len(), 1);
    let current = sched.handle.get(&def.id).unwrap();
    assert_eq!(current.consecutive_failures, 0);
    assert_eq!(current.next_due, Some(at(11, 22, 0, 0)));

    sched.stop().await;
}

#[tokio::test]
async fn firing_without_free_slot_is_recorded_as_skipped() {
    let h = Harness::new(1);
    let hog = h.script("hog.sh", "sleep 1\n");
    let nightly = h.script("nightly.sh", "echo ran\n");
    let sched = Running::start(&h, Some(quick_retries()));
    let def = sched.handle.create(draft(&nightly, "nightly")).unwrap();

    let manual = h.executor.trigger_manual(&hog).await.unwrap();
    wait_until(WAIT, || {
        (h.record(&manual).state == ExecutionState::Running).then_some(())
    })
    .await;

    sched.jump(at(10, 22, 0, 0));
    let skipped = wait_until(WAIT, || history(&h, &def.id).into_iter().next()).await;
    assert_eq!(skipped.state, ExecutionState::SkippedNoCapacity);
    assert!(skipped.started_at.is_none());

    h.finished(&manual).await;
    let current = sched.handle.get(&def.id).unwrap();
    assert_eq!(current.consecutive_failures, 0);
    assert!(current.active);
    assert_eq!(current.next_due, Some(at(11, 22, 0, 0)));
    // skipped firings are not retried
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(history(&h, &def.id).len(), 1);

    sched.stop().await;
}

#[tokio::test]
async fn removed_script_counts_as_a_failed_firing() {
    let h = Harness::new(2);
    let script = h.script("gone.sh", "true\n");
    let sched = Running::start(&h, Some(quick_retries()));
    let def = sched.handle.create(draft(&script, "orphan")).unwrap();

    h.store.remove_script(&script).unwrap();
    sched.jump(at(10, 22, 0, 0));

    let after = schedule_where(&h, &def.id, |d| d.consecutive_failures == 1).await;
    assert!(after.active);
    assert!(history(&h, &def.id).is_empty());

    sched.stop().await;
}

#[tokio::test]
async fn deleted_schedule_stops_firing() {
    let h = Harness::new(2);
    let script = h.script("tick.sh", "true\n");
    let sched = Running::start(&h, None);
    let def = sched.handle.create(draft(&script, "tick")).unwrap();

    sched.handle.delete(&def.id).unwrap();
    sched.jump(at(10, 22, 0, 0));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(history(&h, &def.id).is_empty());
    assert!(sched.handle.get(&def.id).is_err());

    sched.stop().await;
}

#[tokio::test]
async fn schedule_created_before_loop_starts_keeps_its_outcomes() {
    let h = Harness::new(4);
    let script = h.script("early.sh", "exit 1\n");
    let (sched, def) = Running::start_after(&h, Some(quick_retries()), |handle| {
        handle.create(draft(&script, "created early")).unwrap()
    });

    sched.jump(at(10, 22, 0, 0));
    let after = schedule_where(&h, &def.id, |d| d.consecutive_failures == 1).await;
    assert!(after.active);
    let attempts: Vec<u32> = history(&h, &def.id).iter().map(|r| r.attempt).collect();
    assert_eq!(attempts.len(), 2);
    assert!(attempts.contains(&1) && attempts.contains(&2));

    sched.stop().await;
}

#[tokio::test]
async fn retry_waits_while_another_schedule_runs_the_script() {
    let h = Harness::new(4);
    let script = h.script("shared.sh", "sleep 1\nexit 1\n");
    let (sched, (first, second)) = Running::start_after(
        &h,
        Some(FailurePolicy {
            retry_delay: Duration::from_secs(180),
            max_consecutive_failures: 3,
        }),
        |handle| {
            let first = handle.create(draft(&script, "first")).unwrap();
            let mut later = draft(&script, "second");
            later.rule = ScheduleRule::new(Recurrence::Daily { hour: 22, minute: 2 });
            (first, handle.create(later).unwrap())
        },
    );

    sched.jump(at(10, 22, 0, 0));
    wait_until(WAIT, || (finished_count(&h, &first.id) == 1).then_some(())).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    sched.jump(at(10, 22, 2, 0));
    wait_until(WAIT, || {
        history(&h, &second.id)
            .into_iter()
            .find(|r| r.state == ExecutionState::Running)
    })
    .await;

    // the first schedule's retry comes due while the second one holds the script
    sched.jump(at(10, 22, 3, 0));
    let settled = schedule_where(&h, &first.id, |d| d.consecutive_failures == 1).await;
    assert!(settled.active);

    let mut attempts: Vec<u32> = history(&h, &first.id).iter().map(|r| r.attempt).collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![1, 2]);
    assert!(history(&h, &first.id)
        .iter()
        .all(|r| r.state == ExecutionState::Failed));

    sched.stop().await;
}
