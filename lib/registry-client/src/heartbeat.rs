//! Heartbeat loop keeping a registration alive

use crate::policy::{FailureCounter, HeartbeatPolicy};
use crate::protocol::RegistryApi;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of one registration as seen by the agent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    /// Registered and heartbeating
    Registered,
    /// The heartbeat gave up after too many consecutive failures
    Lost,
    Deregistering,
    Stopped,
}

/// Handle to a running heartbeat loop.
///
/// Cancelling never blocks, even when the loop has already exited on its
/// own. Dropping the handle cancels the loop.
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    pub fn spawn(
        api: RegistryApi,
        service_id: String,
        policy: HeartbeatPolicy,
        state: Arc<watch::Sender<RegistrationState>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(api, service_id, policy, cancel.clone(), state));

        Self {
            cancel,
            task: Some(task),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel the loop and wait until it has exited
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    api: RegistryApi,
    service_id: String,
    policy: HeartbeatPolicy,
    cancel: CancellationToken,
    state: Arc<watch::Sender<RegistrationState>>,
) {
    debug!("Heartbeat loop for {} started", service_id);
    let mut failures = FailureCounter::default();

    loop {
        let delay = policy.next_delay(failures.consecutive());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = time::sleep(delay) => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = api.update(&service_id) => outcome,
        };

        match outcome {
            Ok(()) => {
                if failures.consecutive() > 0 {
                    info!(
                        "Heartbeat for {} recovered after {} failures",
                        service_id,
                        failures.consecutive()
                    );
                }
                failures.record_success();
            }
            Err(e) => {
                let exhausted = failures.record_failure(&policy);
                warn!(
                    service_id = %service_id,
                    failures = failures.consecutive(),
                    error = %e,
                    "Heartbeat failed"
                );

                if exhausted {
                    // Once cancelled, the deregistration owns the state
                    if !cancel.is_cancelled() {
                        error!(
                            "Registration of {} lost after {} consecutive heartbeat failures",
                            service_id,
                            failures.consecutive()
                        );
                        state.send_replace(RegistrationState::Lost);
                    }
                    break;
                }
            }
        }
    }

    debug!("Heartbeat loop for {} stopped", service_id);
}
