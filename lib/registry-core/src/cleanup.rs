//! Background eviction of services that stopped heartbeating

use crate::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle to a running cleanup loop.
///
/// The loop stops when [`shutdown`](Self::shutdown) is called or the handle
/// is dropped.
pub struct CleanupHandle {
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Stop the loop and wait for it to exit
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .map_or(true, |join_handle| join_handle.is_finished())
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn the cleanup loop for `registry`.
///
/// Every clean interval the loop asks the expiry window for candidates and
/// removes those that are still expired.
pub fn start(registry: Arc<Registry>) -> CleanupHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let period = registry.config().clean_interval;

    let join_handle = tokio::spawn(async move {
        info!(
            clean_interval_ms = period.as_millis() as u64,
            expire_time_secs = registry.config().expire_time.as_secs(),
            "Starting registry cleanup loop"
        );

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.sweep(Instant::now()).await;
                    if removed > 0 {
                        debug!("Cleanup sweep evicted {} services", removed);
                    }
                }
            }
        }

        info!("Registry cleanup loop stopped");
    });

    CleanupHandle {
        cancel,
        join_handle: Some(join_handle),
    }
}
