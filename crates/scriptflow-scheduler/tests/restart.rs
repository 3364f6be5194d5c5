//! Records left behind by a previous process are reconciled on startup.
#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::{settings, wait_until};
use scriptflow_core::config::SchedulerConfig;
use scriptflow_core::{
    ExecutionState, Recurrence, ScheduleDefinition, ScheduleId, ScheduleRule,
};
use scriptflow_scheduler::schedule::next_occurrence;
use scriptflow_scheduler::{
    ExecutionService, ManualClock, ScheduledStart, SchedulerService, SystemClock,
};
use scriptflow_store::{ExecutionFilter, NewExecution, NewScript, Store, TransitionFields};
use tokio::sync::watch;

#[tokio::test]
async fn running_record_from_crashed_process_is_failed_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("scriptflow.db");
    let script_path = dir.path().join("job.sh");
    std::fs::write(&script_path, "echo hi\n").unwrap();

    let schedule_id = ScheduleId::new();
    let (script_id, running_id, pending_id) = {
        let store = Store::open(&db_path).unwrap();
        let script = store
            .register_script(NewScript {
                name: None,
                path: script_path,
                description: String::new(),
                interpreter: None,
            })
            .unwrap();
        let running = store
            .create_execution(NewExecution::manual(script.id.clone()))
            .unwrap();
        store
            .transition(
                &running.id,
                ExecutionState::Running,
                TransitionFields {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .unwrap();
        let pending = store
            .create_execution(NewExecution::scheduled(
                script.id.clone(),
                schedule_id.clone(),
                1,
            ))
            .unwrap();
        (script.id, running.id, pending.id)
        // store dropped here, as if the process died
    };

    let store = Arc::new(Store::open(&db_path).unwrap());
    let executor = ExecutionService::new(Arc::clone(&store), settings(dir.path(), 2));
    let (service, _handle) =
        SchedulerService::new(Arc::clone(&executor), Arc::new(SystemClock), &SchedulerConfig::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(service.run(shutdown_rx));

    for id in [&running_id, &pending_id] {
        let record = wait_until(Duration::from_secs(5), || {
            store
                .get_execution(id)
                .unwrap()
                .filter(|r| r.state == ExecutionState::Failed)
        })
        .await;
        assert!(record.note.unwrap().contains("no live process at startup"));
        assert!(record.finished_at.is_some());
        assert!(record.duration_ms.is_some());
    }
    assert!(store.unfinished_executions().unwrap().is_empty());

    // the reconciled scheduled record no longer blocks a new scheduled run
    match executor.trigger_scheduled(&script_id, &schedule_id, 1).unwrap() {
        ScheduledStart::Started { completion, .. } => {
            assert_eq!(completion.await.unwrap(), ExecutionState::Completed);
        }
        ScheduledStart::Skipped { .. } => panic!("slot should be free"),
    }

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let h = common::Harness::new(1);
    let script = h.script("once.sh", "true\n");
    let stale = h.store.create_execution(NewExecution::manual(script)).unwrap();

    assert_eq!(h.executor.reconcile_stale().unwrap(), 1);
    assert_eq!(h.executor.reconcile_stale().unwrap(), 0);
    assert_eq!(h.record(&stale.id).state, ExecutionState::Failed);
}

#[tokio::test]
async fn overdue_schedule_fires_once_at_startup() {
    let h = common::Harness::new(2);
    let script = h.script("catch_up.sh", "echo caught up\n");
    let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
    let rule = ScheduleRule::new(Recurrence::Daily { hour: 22, minute: 0 });
    let created = now - ChronoDuration::days(5);
    let def = ScheduleDefinition {
        id: ScheduleId::new(),
        script_id: script,
        name: "missed while down".into(),
        description: String::new(),
        rule: rule.clone(),
        active: true,
        consecutive_failures: 0,
        next_due: Some(Utc.with_ymd_and_hms(2025, 6, 7, 22, 0, 0).unwrap()),
        last_run: None,
        created_at: created,
        updated_at: created,
    };
    h.store.insert_schedule(&def).unwrap();

    let (service, _handle) = SchedulerService::new(
        Arc::clone(&h.executor),
        Arc::new(ManualClock::new(now)),
        &SchedulerConfig::default(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(service.run(shutdown_rx));

    let history = || {
        h.store
            .list_executions(&ExecutionFilter {
                schedule_id: Some(def.id.clone()),
                ..Default::default()
            })
            .unwrap()
    };
    let record = wait_until(Duration::from_secs(15), || {
        history().into_iter().find(|r| r.state.is_terminal())
    })
    .await;
    assert_eq!(record.state, ExecutionState::Completed);
    assert_eq!(record.attempt, 1);

    // three missed days, one catch-up run
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(history().len(), 1);

    let stored = h.store.get_schedule(&def.id).unwrap().unwrap();
    assert_eq!(stored.last_run, Some(now));
    assert_eq!(stored.next_due, next_occurrence(&rule, now).unwrap());
    assert_eq!(
        stored.next_due,
        Some(Utc.with_ymd_and_hms(2025, 6, 10, 22, 0, 0).unwrap())
    );

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}
