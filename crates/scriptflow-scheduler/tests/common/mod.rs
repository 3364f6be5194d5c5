//! Shared harness: a file-backed store, `sh` as the shell, short timeouts.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use scriptflow_core::{ExecutionId, ExecutionRecord, ScriptId};
use scriptflow_runner::Interpreters;
use scriptflow_scheduler::{ExecutionService, ExecutionSettings};
use scriptflow_store::{NewScript, Store};
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<Store>,
    pub executor: Arc<ExecutionService>,
}

pub fn settings(root: &Path, max_concurrent: usize) -> ExecutionSettings {
    ExecutionSettings {
        max_concurrent,
        manual_acquire_wait: Duration::from_secs(10),
        timeout: Duration::from_secs(2),
        output_cap_bytes: 64 * 1024,
        work_root: root.join("work"),
        keep_working_dirs: false,
        interpreters: Interpreters {
            python: "python3".into(),
            shell: "sh".into(),
        },
    }
}

impl Harness {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_settings(|root| settings(root, max_concurrent))
    }

    pub fn with_settings(build: impl FnOnce(&Path) -> ExecutionSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("scriptflow.db")).unwrap());
        let executor = ExecutionService::new(Arc::clone(&store), build(dir.path()));
        Self { dir, store, executor }
    }

    pub fn record(&self, id: &ExecutionId) -> ExecutionRecord {
        self.store.get_execution(id).unwrap().unwrap()
    }

    /// Wait for `id` to reach a terminal state.
    pub async fn finished(&self, id: &ExecutionId) -> ExecutionRecord {
        wait_until(Duration::from_secs(15), || {
            Some(self.record(id)).filter(|r| r.state.is_terminal())
        })
        .await
    }

    /// Write `body` to `name` and register it.
    pub fn script(&self, name: &str, body: &str) -> ScriptId {
        self.script_with(name, body, None)
    }

    pub fn script_with(&self, name: &str, body: &str, interpreter: Option<&str>) -> ScriptId {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        self.store
            .register_script(NewScript {
                name: None,
                path,
                description: String::new(),
                interpreter: interpreter.map(str::to_string),
            })
            .unwrap()
            .id
    }
}

/// Poll `check` every 20 ms until it returns `Some`, or panic after `limit`.
pub async fn wait_until<T>(limit: Duration, mut check: impl FnMut() -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if let Some(value) = check() {
            return value;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
