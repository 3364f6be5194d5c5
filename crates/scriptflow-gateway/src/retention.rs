//! Background pruning of old terminal execution records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scriptflow_core::config::RetentionConfig;
use scriptflow_store::Store;
use tokio::sync::watch;
use tracing::{error, info};

/// Prune every `prune_interval_secs` until `shutdown` flips. A `days` of 0
/// disables pruning.
pub async fn run(store: Arc<Store>, config: RetentionConfig, mut shutdown: watch::Receiver<bool>) {
    if config.days == 0 {
        info!("execution retention disabled");
        return;
    }
    let mut ticker = tokio::time::interval(Duration::from_secs(config.prune_interval_secs.max(60)));
    loop {
        tokio::select! {
            _ = ticker.tick() => prune_once(&store, config.days),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn prune_once(store: &Store, days: u32) {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
    match store.prune_executions(cutoff) {
        Ok(0) => {}
        Ok(removed) => info!(removed, days, "pruned old execution records"),
        Err(e) => error!(error = %e, "execution pruning failed"),
    }
}
