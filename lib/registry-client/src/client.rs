//! Registry client used by agents to announce themselves

use crate::heartbeat::{HeartbeatHandle, RegistrationState};
use crate::policy::HeartbeatPolicy;
use crate::protocol::RegistryApi;
use crate::{ClientError, Result};
use registry_core::resolver::SERVICE_ID_TAG;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// What an agent announces when registering
#[derive(Clone, Debug)]
pub struct RegistrationInfo {
    pub service_name: String,
    /// Address other processes dial to reach the agent
    pub addr: SocketAddr,
    /// Must carry the `service_id` tag
    pub tags: HashMap<String, String>,
}

impl RegistrationInfo {
    pub fn new(service_name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            service_name: service_name.into(),
            addr,
            tags: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The `service_id` tag, required by every registry operation
    pub fn service_id(&self) -> Result<&str> {
        self.tags
            .get(SERVICE_ID_TAG)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ClientError::PreconditionFailed(format!("{} tag not found", SERVICE_ID_TAG))
            })
    }
}

struct Registration {
    state: Arc<watch::Sender<RegistrationState>>,
    heartbeat: Option<HeartbeatHandle>,
}

/// Agent-side client of the built-in registry
pub struct RegistryClient {
    api: RegistryApi,
    policy: HeartbeatPolicy,
    registrations: Mutex<HashMap<String, Registration>>,
}

impl RegistryClient {
    /// Connect with the default heartbeat policy
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::with_policy(addr, HeartbeatPolicy::default()).await
    }

    /// Connect to the registry at `addr`.
    ///
    /// Fails unless the registry answers its liveness probe.
    pub async fn with_policy(addr: &str, policy: HeartbeatPolicy) -> Result<Self> {
        let api = RegistryApi::new(addr, policy.request_timeout)?;
        api.ping().await?;
        info!("Connected to registry at {}", api.base_url());

        Ok(Self {
            api,
            policy,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// Register the agent and start heartbeating.
    ///
    /// Registering an id again replaces the previous registration and its
    /// heartbeat.
    pub async fn register(&self, info: &RegistrationInfo) -> Result<()> {
        let service_id = info.service_id()?.to_string();
        let (state, _) = watch::channel(RegistrationState::Registering);
        let state = Arc::new(state);

        let previous = self.registrations.lock().await.insert(
            service_id.clone(),
            Registration {
                state: state.clone(),
                heartbeat: None,
            },
        );
        if let Some(heartbeat) = previous.and_then(|registration| registration.heartbeat) {
            heartbeat.stop().await;
        }

        let host = info.addr.ip().to_string();
        if let Err(e) = self
            .api
            .register(&service_id, &host, info.addr.port())
            .await
        {
            state.send_replace(RegistrationState::Unregistered);
            let mut registrations = self.registrations.lock().await;
            if registrations
                .get(&service_id)
                .is_some_and(|current| Arc::ptr_eq(&current.state, &state))
            {
                registrations.remove(&service_id);
            }
            return Err(e);
        }

        state.send_replace(RegistrationState::Registered);
        let heartbeat = HeartbeatHandle::spawn(
            self.api.clone(),
            service_id.clone(),
            self.policy.clone(),
            state.clone(),
        );

        let mut registrations = self.registrations.lock().await;
        match registrations.get_mut(&service_id) {
            Some(current) if Arc::ptr_eq(&current.state, &state) => {
                current.heartbeat = Some(heartbeat);
            }
            // Deregistered or replaced while the request was in flight
            _ => heartbeat.cancel(),
        }

        info!(
            "Registered {} ({}) at {}",
            service_id, info.service_name, info.addr
        );
        Ok(())
    }

    /// Stop heartbeating and remove the agent from the registry
    pub async fn deregister(&self, info: &RegistrationInfo) -> Result<()> {
        let service_id = info.service_id()?.to_string();
        self.deregister_id(&service_id).await
    }

    /// Deregister every registration this client made
    pub async fn shutdown(&self) -> Result<()> {
        let service_ids: Vec<String> = self.registrations.lock().await.keys().cloned().collect();

        let mut first_error = None;
        for service_id in service_ids {
            if let Err(e) = self.deregister_id(&service_id).await {
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn deregister_id(&self, service_id: &str) -> Result<()> {
        let heartbeat = {
            let mut registrations = self.registrations.lock().await;
            registrations.get_mut(service_id).and_then(|registration| {
                registration.state.send_replace(RegistrationState::Deregistering);
                registration.heartbeat.take()
            })
        };

        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }

        let result = self.api.deregister(service_id).await;

        if let Some(registration) = self.registrations.lock().await.remove(service_id) {
            registration.state.send_replace(RegistrationState::Stopped);
        }

        match &result {
            Ok(()) => info!("Deregistered {}", service_id),
            Err(e) => warn!("Deregistering {} failed: {}", service_id, e),
        }
        result
    }

    /// Current state of the registration for `service_id`
    pub async fn state(&self, service_id: &str) -> RegistrationState {
        self.registrations
            .lock()
            .await
            .get(service_id)
            .map_or(RegistrationState::Unregistered, |registration| {
                *registration.state.borrow()
            })
    }

    /// Wait until the heartbeat for `service_id` ends.
    ///
    /// Returns `RegistrationLost` when the heartbeat gave up; the agent then
    /// decides whether to register again or shut down. Returns `Ok` when the
    /// registration was deregistered.
    pub async fn wait_closed(&self, service_id: &str) -> Result<()> {
        let mut state = self
            .registrations
            .lock()
            .await
            .get(service_id)
            .map(|registration| registration.state.subscribe())
            .ok_or_else(|| ClientError::NotRegistered(service_id.to_string()))?;

        let closed = state
            .wait_for(|state| {
                matches!(
                    state,
                    RegistrationState::Lost
                        | RegistrationState::Stopped
                        | RegistrationState::Unregistered
                )
            })
            .await
            .map(|state| *state);

        match closed {
            Ok(RegistrationState::Lost) => {
                Err(ClientError::RegistrationLost(service_id.to_string()))
            }
            _ => Ok(()),
        }
    }
}
